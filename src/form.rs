use crate::document::{
    ConfigEntry, Document, FunctionDocument, LinkItem, MediaItem, Parameter, Prerequisite,
    RecipeDocument, Step, StepName,
};
use crate::error::{EditorError, EditorResult};

/// The editable view of the active document.
///
/// `pull_from_form` writes every bound field into the active document;
/// `push_to_form` renders a document into the bound fields. The collection
/// calls both around every switch, import and removal.
pub trait FormBridge: Send {
    fn pull_from_form(&mut self, document: &mut Document);
    fn push_to_form(&mut self, document: &Document);

    /// Applies a typed edit to the bound fields. Forms driven by their own
    /// input events don't accept typed edits.
    fn apply_edit(&mut self, edit: FieldEdit) -> EditorResult<()> {
        Err(EditorError::InvalidEdit(format!(
            "{edit:?}: form does not accept typed edits"
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TextField {
    Title,
    Category,
    #[value(name = "usecase")]
    UseCase,
    Direction,
    Connection,
    Description,
    Syntax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkList {
    Downloadables,
    RelatedDocs,
}

/// One observed form edit. Text values are trimmed the way form inputs are
/// read.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldEdit {
    SetText { field: TextField, value: String },
    SetDspVersion { index: usize, value: String },
    SetPrerequisite { index: usize, description: String },
    SetQuickLink { prerequisite: usize, index: usize, link: LinkItem },
    SetLink { list: LinkList, index: usize, link: LinkItem },
    AddKeyword(String),
    RemoveKeyword(String),
    AddStep,
    RemoveStep(usize),
    SetStepName { step: usize, name: String },
    SetConfig { step: usize, index: usize, field: String, value: String },
    AddMedia { step: usize, media: MediaItem },
    RemoveMedia { step: usize, media: usize },
    SetMediaAlt { step: usize, media: usize, alt: String },
    SetParameter { index: usize, parameter: Parameter },
    SetExample { index: usize, value: String },
    SetRelatedFormula { index: usize, value: String },
    AddTip { parent: Vec<usize>, text: String },
    SetTipText { path: Vec<usize>, text: String },
    RemoveTip(Vec<usize>),
}

/// In-memory form mirror: edits land in a draft that is pulled into the
/// active document.
#[derive(Debug, Clone, Default)]
pub struct DraftForm {
    draft: Option<Document>,
}

impl DraftForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draft(&self) -> Option<&Document> {
        self.draft.as_ref()
    }

    pub fn apply(&mut self, edit: FieldEdit) -> EditorResult<()> {
        let draft = self
            .draft
            .as_mut()
            .ok_or_else(|| EditorError::InvalidEdit("no document loaded into the form".into()))?;
        match draft {
            Document::Recipe(recipe) => apply_recipe(recipe, edit),
            Document::Function(function) => apply_function(function, edit),
        }
    }
}

impl FormBridge for DraftForm {
    fn pull_from_form(&mut self, document: &mut Document) {
        let Some(draft) = &mut self.draft else {
            return;
        };
        if draft.variant() != document.variant() {
            tracing::warn!(
                form = %draft.variant(),
                document = %document.variant(),
                "form holds another document variant; skipping pull"
            );
            return;
        }
        // The draft takes the canonical shape too, so placeholders shown by
        // the document stay addressable by later edits.
        draft.canonicalize();
        *document = draft.clone();
    }

    fn push_to_form(&mut self, document: &Document) {
        self.draft = Some(document.clone());
    }

    fn apply_edit(&mut self, edit: FieldEdit) -> EditorResult<()> {
        self.apply(edit)
    }
}

fn slot<T: Default>(items: &mut Vec<T>, index: usize) -> EditorResult<&mut T> {
    let len = items.len();
    if index == len {
        items.push(T::default());
    }
    items
        .get_mut(index)
        .ok_or(EditorError::IndexOutOfRange { index, len })
}

fn existing<T>(items: &mut [T], index: usize) -> EditorResult<&mut T> {
    let len = items.len();
    items
        .get_mut(index)
        .ok_or(EditorError::IndexOutOfRange { index, len })
}

fn remove_at<T>(items: &mut Vec<T>, index: usize) -> EditorResult<T> {
    if index >= items.len() {
        return Err(EditorError::IndexOutOfRange {
            index,
            len: items.len(),
        });
    }
    Ok(items.remove(index))
}

fn trimmed(value: &str) -> String {
    value.trim().to_owned()
}

fn trimmed_link(link: LinkItem) -> LinkItem {
    LinkItem {
        title: trimmed(&link.title),
        url: trimmed(&link.url),
    }
}

fn unsupported(edit: &FieldEdit, variant: &str) -> EditorError {
    EditorError::InvalidEdit(format!("{edit:?} does not apply to {variant} documents"))
}

fn apply_recipe(recipe: &mut RecipeDocument, edit: FieldEdit) -> EditorResult<()> {
    match edit {
        FieldEdit::SetText { field, value } => {
            let value = trimmed(&value);
            match field {
                TextField::Title => recipe.title = value,
                TextField::Category => recipe.category = value,
                TextField::UseCase => recipe.use_case = value,
                TextField::Direction => recipe.direction = value,
                TextField::Connection => recipe.connection = value,
                TextField::Description | TextField::Syntax => {
                    return Err(unsupported(
                        &FieldEdit::SetText { field, value },
                        "recipe",
                    ));
                }
            }
        }
        FieldEdit::SetDspVersion { index, value } => {
            *slot(&mut recipe.dsp_versions, index)? = trimmed(&value);
        }
        FieldEdit::SetPrerequisite { index, description } => {
            let prerequisite: &mut Prerequisite = slot(&mut recipe.prerequisites, index)?;
            prerequisite.description = trimmed(&description);
        }
        FieldEdit::SetQuickLink {
            prerequisite,
            index,
            link,
        } => {
            let prerequisite = existing(&mut recipe.prerequisites, prerequisite)?;
            *slot(&mut prerequisite.quick_links, index)? = trimmed_link(link);
        }
        FieldEdit::SetLink { list, index, link } => {
            let links = match list {
                LinkList::Downloadables => &mut recipe.downloadables,
                LinkList::RelatedDocs => &mut recipe.related_docs,
            };
            *slot(links, index)? = trimmed_link(link);
        }
        FieldEdit::AddKeyword(keyword) => {
            recipe.add_keyword(&keyword);
        }
        FieldEdit::RemoveKeyword(keyword) => {
            let keyword = keyword.trim();
            recipe.keywords.retain(|k| k != keyword);
        }
        FieldEdit::AddStep => recipe.walkthrough.push(Step::placeholder()),
        FieldEdit::RemoveStep(step) => {
            remove_at(&mut recipe.walkthrough, step)?;
        }
        FieldEdit::SetStepName { step, name } => {
            existing(&mut recipe.walkthrough, step)?.name = StepName::from(trimmed(&name));
        }
        FieldEdit::SetConfig {
            step,
            index,
            field,
            value,
        } => {
            let step = existing(&mut recipe.walkthrough, step)?;
            *slot(&mut step.config, index)? = ConfigEntry {
                field: trimmed(&field),
                value: trimmed(&value),
            };
        }
        FieldEdit::AddMedia { step, media } => {
            existing(&mut recipe.walkthrough, step)?.media.push(media);
        }
        FieldEdit::RemoveMedia { step, media } => {
            remove_at(&mut existing(&mut recipe.walkthrough, step)?.media, media)?;
        }
        FieldEdit::SetMediaAlt { step, media, alt } => {
            let step = existing(&mut recipe.walkthrough, step)?;
            existing(&mut step.media, media)?.alt = trimmed(&alt);
        }
        other => return Err(unsupported(&other, "recipe")),
    }
    Ok(())
}

fn apply_function(function: &mut FunctionDocument, edit: FieldEdit) -> EditorResult<()> {
    match edit {
        FieldEdit::SetText { field, value } => {
            let value = trimmed(&value);
            match field {
                TextField::Title => function.title = value,
                TextField::Description => function.description = value,
                TextField::Syntax => function.syntax = value,
                _ => {
                    return Err(unsupported(
                        &FieldEdit::SetText { field, value },
                        "function",
                    ));
                }
            }
        }
        FieldEdit::SetParameter { index, parameter } => {
            *slot(&mut function.parameters, index)? = Parameter {
                name: trimmed(&parameter.name),
                kind: trimmed(&parameter.kind),
                required: parameter.required,
                description: trimmed(&parameter.description),
            };
        }
        FieldEdit::SetExample { index, value } => {
            *slot(&mut function.examples, index)? = trimmed(&value);
        }
        FieldEdit::SetRelatedFormula { index, value } => {
            *slot(&mut function.related_formulas, index)? = trimmed(&value);
        }
        FieldEdit::AddTip { parent, text } => {
            function.add_child_tip(&parent, &text)?;
        }
        FieldEdit::SetTipText { path, text } => {
            let tip = function.tip_mut(&path).ok_or_else(|| {
                EditorError::InvalidEdit(format!("no tip at path {path:?}"))
            })?;
            tip.text = trimmed(&text);
        }
        FieldEdit::RemoveTip(path) => {
            function.remove_tip(&path)?;
        }
        other => return Err(unsupported(&other, "function")),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{MediaType, Variant};
    use crate::normalize::normalize;

    #[test]
    fn push_then_pull_reproduces_a_normalized_document() -> anyhow::Result<()> {
        let doc = normalize(&serde_json::json!({
            "title": "Nightly Load",
            "category": "etl",
            "walkthrough": [{ "step": "Retrieve", "config": [{ "field": "a", "value": "b" }] }]
        }))?;
        let mut form = DraftForm::new();
        form.push_to_form(&doc);

        let mut pulled = Document::empty(Variant::Recipe);
        form.pull_from_form(&mut pulled);
        assert_eq!(pulled, doc);
        Ok(())
    }

    #[test]
    fn edits_are_trimmed_and_rederive_the_id() -> anyhow::Result<()> {
        let mut form = DraftForm::new();
        form.push_to_form(&Document::empty(Variant::Recipe));
        form.apply(FieldEdit::SetText {
            field: TextField::Title,
            value: "  Order Sync  ".into(),
        })?;
        form.apply(FieldEdit::SetStepName {
            step: 0,
            name: "Verify".into(),
        })?;
        form.apply(FieldEdit::AddKeyword("orders".into()))?;
        form.apply(FieldEdit::AddKeyword("orders".into()))?;

        let mut doc = Document::empty(Variant::Recipe);
        form.pull_from_form(&mut doc);
        let recipe = doc.as_recipe().expect("recipe");
        assert_eq!(recipe.title, "Order Sync");
        assert_eq!(recipe.id, "order-sync");
        assert_eq!(recipe.walkthrough[0].name.as_str(), "Verify");
        assert_eq!(recipe.keywords, vec!["orders".to_owned()]);
        Ok(())
    }

    #[test]
    fn removing_the_last_media_item_leaves_a_placeholder() -> anyhow::Result<()> {
        let mut form = DraftForm::new();
        form.push_to_form(&Document::empty(Variant::Recipe));
        form.apply(FieldEdit::RemoveMedia { step: 0, media: 0 })?;

        let mut doc = Document::empty(Variant::Recipe);
        form.pull_from_form(&mut doc);
        let media = &doc.as_recipe().expect("recipe").walkthrough[0].media;
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].kind, MediaType::Image);
        assert!(media[0].url.is_empty());
        assert_eq!(form.draft(), Some(&doc));
        form.apply(FieldEdit::SetMediaAlt {
            step: 0,
            media: 0,
            alt: "overview".into(),
        })?;
        Ok(())
    }

    #[test]
    fn edits_for_the_other_variant_are_rejected() {
        let mut form = DraftForm::new();
        form.push_to_form(&Document::empty(Variant::Function));
        let err = form.apply(FieldEdit::AddStep).unwrap_err();
        assert!(matches!(err, EditorError::InvalidEdit(_)));

        let err = form
            .apply(FieldEdit::SetText {
                field: TextField::Category,
                value: "x".into(),
            })
            .unwrap_err();
        assert!(matches!(err, EditorError::InvalidEdit(_)));
    }

    #[test]
    fn pull_never_crosses_variants() {
        let mut form = DraftForm::new();
        let mut function = Document::empty(Variant::Function);
        function.set_title("SUM");
        form.push_to_form(&function);

        let mut recipe = Document::empty(Variant::Recipe);
        form.pull_from_form(&mut recipe);
        assert_eq!(recipe, Document::empty(Variant::Recipe));
    }

    #[test]
    fn out_of_range_edits_report_the_index() {
        let mut form = DraftForm::new();
        form.push_to_form(&Document::empty(Variant::Recipe));
        let err = form
            .apply(FieldEdit::SetMediaAlt {
                step: 3,
                media: 0,
                alt: "x".into(),
            })
            .unwrap_err();
        assert!(matches!(err, EditorError::IndexOutOfRange { index: 3, len: 1 }));
    }
}
