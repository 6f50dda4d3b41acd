use serde_json::Value;

use crate::document::{Document, Variant};
use crate::error::{EditorError, EditorResult, ValidationError};
use crate::form::FormBridge;
use crate::normalize::normalize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tab {
    pub index: usize,
    pub title: String,
    pub active: bool,
}

/// Ordered, never-empty set of documents with one active document and a
/// variant filter (the mode).
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentCollection {
    documents: Vec<Document>,
    active_index: usize,
    mode: Variant,
}

impl Default for DocumentCollection {
    fn default() -> Self {
        Self::new(Variant::Recipe)
    }
}

impl DocumentCollection {
    pub fn new(mode: Variant) -> Self {
        Self {
            documents: vec![Document::empty(mode)],
            active_index: 0,
            mode,
        }
    }

    /// Rebuilds a collection from persisted parts, repairing an empty list,
    /// an out-of-range index or an active document outside the mode.
    pub fn from_parts(documents: Vec<Document>, active_index: usize, mode: Variant) -> Self {
        if documents.is_empty() {
            return Self::new(mode);
        }
        let active_index = active_index.min(documents.len() - 1);
        let mode = documents[active_index].variant();
        Self {
            documents,
            active_index,
            mode,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn get(&self, index: usize) -> Option<&Document> {
        self.documents.get(index)
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn active(&self) -> &Document {
        &self.documents[self.active_index]
    }

    pub fn active_mut(&mut self) -> &mut Document {
        &mut self.documents[self.active_index]
    }

    pub fn mode(&self) -> Variant {
        self.mode
    }

    pub fn exportable(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter().filter(|doc| doc.is_exportable())
    }

    /// Writes the form's current state into the active document.
    pub fn flush(&mut self, form: &mut dyn FormBridge) {
        form.pull_from_form(&mut self.documents[self.active_index]);
    }

    fn load(&mut self, form: &mut dyn FormBridge) {
        form.push_to_form(&self.documents[self.active_index]);
    }

    fn check_index(&self, index: usize) -> EditorResult<()> {
        if index >= self.documents.len() {
            return Err(EditorError::IndexOutOfRange {
                index,
                len: self.documents.len(),
            });
        }
        Ok(())
    }

    pub fn add_document(&mut self, variant: Variant, form: &mut dyn FormBridge) -> usize {
        self.push_document(Document::empty(variant), form)
    }

    /// Appends an already-canonical document and makes it active; the mode
    /// follows the document's variant so its tab is visible.
    pub fn push_document(&mut self, document: Document, form: &mut dyn FormBridge) -> usize {
        self.flush(form);
        self.mode = document.variant();
        self.documents.push(document);
        self.active_index = self.documents.len() - 1;
        self.load(form);
        self.active_index
    }

    pub fn switch_to(&mut self, index: usize, form: &mut dyn FormBridge) -> EditorResult<()> {
        self.check_index(index)?;
        let actual = self.documents[index].variant();
        if actual != self.mode {
            return Err(EditorError::ModeMismatch {
                index,
                mode: self.mode,
                actual,
            });
        }

        self.flush(form);
        self.active_index = index;
        self.load(form);
        Ok(())
    }

    pub fn remove(&mut self, index: usize, form: &mut dyn FormBridge) -> EditorResult<Document> {
        self.check_index(index)?;
        if self.documents.len() == 1 {
            return Err(EditorError::LastDocument);
        }

        self.flush(form);
        let last = self.documents.len() - 1;
        let active = self.active_index;
        let next_active = if index < active {
            active - 1
        } else if index == active {
            if index < last { index } else { index - 1 }
        } else {
            active
        };
        let removed = self.documents.remove(index);
        self.active_index = next_active;

        if self.documents[self.active_index].variant() != self.mode {
            match self.nearest_in_mode(self.active_index) {
                Some(nearest) => self.active_index = nearest,
                None => self.mode = self.documents[self.active_index].variant(),
            }
        }

        self.load(form);
        Ok(removed)
    }

    fn nearest_in_mode(&self, from: usize) -> Option<usize> {
        let matches = |i: &usize| self.documents[*i].variant() == self.mode;
        (from..self.documents.len())
            .find(matches)
            .or_else(|| (0..from).rev().find(matches))
    }

    /// Switches the variant filter and selects its first document, creating
    /// an empty one when the mode has none. Returns the new active index.
    pub fn set_mode(&mut self, mode: Variant, form: &mut dyn FormBridge) -> usize {
        self.flush(form);
        self.mode = mode;
        match self.documents.iter().position(|doc| doc.variant() == mode) {
            Some(first) => {
                self.active_index = first;
                self.load(form);
            }
            None => {
                self.documents.push(Document::empty(mode));
                self.active_index = self.documents.len() - 1;
                self.load(form);
            }
        }
        self.active_index
    }

    pub fn import_document(
        &mut self,
        raw: &Value,
        source_name: &str,
        form: &mut dyn FormBridge,
    ) -> Result<usize, ValidationError> {
        let document = normalize(raw).inspect_err(|err| {
            tracing::warn!(source = source_name, %err, "rejected imported document");
        })?;
        let index = self.push_document(document, form);
        tracing::info!(source = source_name, index, "imported document");
        Ok(index)
    }

    /// Replaces the document at `index` with an empty one of `variant`,
    /// keeping its id and title.
    pub fn replace_variant(
        &mut self,
        index: usize,
        variant: Variant,
        form: &mut dyn FormBridge,
    ) -> EditorResult<Document> {
        self.check_index(index)?;
        self.flush(form);
        let replacement = self.documents[index].with_variant(variant);
        let previous = std::mem::replace(&mut self.documents[index], replacement);
        if index == self.active_index {
            self.mode = variant;
        }
        self.load(form);
        Ok(previous)
    }

    /// Tabs visible in the current mode, in document order.
    pub fn tabs(&self) -> Vec<Tab> {
        self.documents
            .iter()
            .enumerate()
            .filter(|(_, doc)| doc.variant() == self.mode)
            .enumerate()
            .map(|(position, (index, doc))| {
                let title = doc.title().trim();
                Tab {
                    index,
                    title: if title.is_empty() {
                        format!("{} {}", self.mode.label(), position + 1)
                    } else {
                        title.to_owned()
                    },
                    active: index == self.active_index,
                }
            })
            .collect()
    }

    /// Drops every document and starts over with one empty document.
    pub fn reset(&mut self, form: &mut dyn FormBridge) {
        *self = Self::new(self.mode);
        self.load(form);
    }
}
