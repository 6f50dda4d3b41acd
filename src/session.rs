use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::archive::{ArchiveAssembler, ArchiveBuild, ImportedDocument, read_archive};
use crate::blob_store::BlobStore;
use crate::collection::DocumentCollection;
use crate::config::{EditorConfig, IMAGE_EXTENSIONS};
use crate::document::{ATTACHMENT_DIR, Document, MediaItem, MediaType, Variant};
use crate::error::{EditorError, EditorResult, ValidationError};
use crate::form::{DraftForm, FieldEdit, FormBridge};
use crate::naming::{KeySignals, attachment_key, extension_of, unique_key, used_keys};
use crate::persist::{Clock, FlushScheduler, Snapshot, SnapshotStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Empty,
    Editing,
    Exported,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub failures: Vec<(String, String)>,
}

impl ImportSummary {
    pub fn summary(&self) -> String {
        let mut message = format!(
            "imported {} document(s), {} failed",
            self.imported,
            self.failures.len()
        );
        for (source, reason) in &self.failures {
            message.push_str(&format!("\n  {source}: {reason}"));
        }
        message
    }
}

/// An image to attach to media `media` of walkthrough step `step` of the
/// active recipe. Without a media index the first empty media slot is used,
/// or a new media item is appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentUpload {
    pub step: usize,
    pub media: Option<usize>,
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub alt: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Command {
    AddDocument(Variant),
    RemoveDocument(usize),
    SwitchTo(usize),
    SetMode(Variant),
    Edit(FieldEdit),
    UploadAttachment(AttachmentUpload),
    /// `(source name, JSON text)` pairs.
    ImportJson(Vec<(String, String)>),
    ImportArchive { source: String, bytes: Vec<u8> },
    ExportAll,
    Preview,
    Cleanup,
}

#[derive(Debug)]
pub enum CommandOutcome {
    /// Index of the active document after the command.
    Active(usize),
    Done,
    Attached(String),
    Imported(ImportSummary),
    Exported(ArchiveBuild),
    Preview(String),
}

pub type SharedSession<F = DraftForm> = Arc<Mutex<EditorSession<F>>>;

fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One editing session: the document collection, its form, the attachment
/// blobs and the debounced snapshot.
pub struct EditorSession<F: FormBridge = DraftForm> {
    config: EditorConfig,
    collection: DocumentCollection,
    form: F,
    blobs: Arc<dyn BlobStore>,
    snapshots: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    session_id: String,
    attachment_counter: u64,
    dirty: bool,
    scheduler: FlushScheduler,
    last_saved_digest: Option<String>,
    phase: SessionPhase,
}

impl<F: FormBridge> EditorSession<F> {
    pub fn new(
        config: EditorConfig,
        blobs: Arc<dyn BlobStore>,
        snapshots: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        mut form: F,
    ) -> Self {
        let collection = DocumentCollection::default();
        form.push_to_form(collection.active());
        let scheduler = FlushScheduler::new(config.autosave_debounce);
        Self {
            config,
            collection,
            form,
            blobs,
            snapshots,
            clock,
            session_id: new_session_id(),
            attachment_counter: 0,
            dirty: false,
            scheduler,
            last_saved_digest: None,
            phase: SessionPhase::Empty,
        }
    }

    pub fn into_shared(self) -> SharedSession<F> {
        Arc::new(Mutex::new(self))
    }

    pub fn collection(&self) -> &DocumentCollection {
        &self.collection
    }

    pub fn form(&self) -> &F {
        &self.form
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn attachment_counter(&self) -> u64 {
        self.attachment_counter
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Replaces the session state with the stored snapshot, if any.
    pub async fn restore(&mut self) -> EditorResult<bool> {
        let Some(snapshot) = self.snapshots.load().await? else {
            return Ok(false);
        };
        let digest = snapshot.digest()?;
        let Snapshot {
            session_id,
            documents,
            active_index,
            attachment_counter,
            mode,
        } = snapshot;

        self.collection =
            DocumentCollection::from_parts(documents, active_index, mode.unwrap_or(Variant::Recipe));
        self.form.push_to_form(self.collection.active());
        self.session_id = session_id;
        self.attachment_counter = attachment_counter;
        self.dirty = false;
        self.scheduler.cancel();
        self.last_saved_digest = Some(digest);
        self.phase = SessionPhase::Editing;
        tracing::info!(
            session = %self.session_id,
            documents = self.collection.len(),
            "restored session"
        );
        Ok(true)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            session_id: self.session_id.clone(),
            documents: self.collection.documents().to_vec(),
            active_index: self.collection.active_index(),
            attachment_counter: self.attachment_counter,
            mode: Some(self.collection.mode()),
        }
    }

    fn mark_changed(&mut self) {
        self.dirty = true;
        self.scheduler.schedule_flush(self.clock.now());
        self.phase = SessionPhase::Editing;
    }

    /// Writes the snapshot now. Returns whether anything was written; an
    /// unchanged snapshot is not rewritten. The session stays dirty when the
    /// write fails.
    pub async fn persist(&mut self) -> EditorResult<bool> {
        self.collection.flush(&mut self.form);
        let snapshot = self.snapshot();
        let digest = snapshot.digest()?;
        if self.last_saved_digest.as_deref() == Some(digest.as_str()) {
            self.dirty = false;
            self.scheduler.cancel();
            tracing::debug!(session = %self.session_id, "snapshot unchanged; skipping write");
            return Ok(false);
        }

        if let Err(err) = self.snapshots.save(&snapshot).await {
            tracing::warn!(session = %self.session_id, %err, "snapshot write failed; changes remain unsaved");
            return Err(err);
        }
        self.last_saved_digest = Some(digest);
        self.dirty = false;
        self.scheduler.cancel();
        tracing::debug!(session = %self.session_id, "snapshot written");
        Ok(true)
    }

    /// Persists when a scheduled flush is due.
    pub async fn tick(&mut self) -> EditorResult<bool> {
        if !self.dirty || !self.scheduler.is_due(self.clock.now()) {
            return Ok(false);
        }
        self.persist().await
    }

    pub fn add_document(&mut self, variant: Variant) -> usize {
        let index = self.collection.add_document(variant, &mut self.form);
        self.mark_changed();
        tracing::info!(index, variant = %variant, "added document");
        index
    }

    pub fn switch_to(&mut self, index: usize) -> EditorResult<()> {
        self.collection.switch_to(index, &mut self.form)?;
        self.mark_changed();
        Ok(())
    }

    pub fn set_mode(&mut self, mode: Variant) -> usize {
        let index = self.collection.set_mode(mode, &mut self.form);
        self.mark_changed();
        index
    }

    pub async fn remove_document(&mut self, index: usize) -> EditorResult<Document> {
        let removed = self.collection.remove(index, &mut self.form)?;
        self.mark_changed();
        tracing::info!(index, title = removed.title(), "removed document");
        let keys = removed
            .attachment_keys()
            .into_iter()
            .map(str::to_owned)
            .collect();
        self.release_blobs(keys).await;
        Ok(removed)
    }

    pub async fn apply_edit(&mut self, edit: FieldEdit) -> EditorResult<()> {
        self.collection.flush(&mut self.form);
        let before: Vec<String> = self
            .collection
            .active()
            .attachment_keys()
            .into_iter()
            .map(str::to_owned)
            .collect();

        self.form.apply_edit(edit)?;
        self.collection.flush(&mut self.form);
        self.mark_changed();

        let after: HashSet<&str> = self.collection.active().attachment_keys().into_iter().collect();
        let dropped: Vec<String> = before
            .into_iter()
            .filter(|key| !after.contains(key.as_str()))
            .collect();
        self.release_blobs(dropped).await;
        Ok(())
    }

    fn referenced_keys(&self) -> HashSet<String> {
        self.collection
            .documents()
            .iter()
            .flat_map(Document::attachment_keys)
            .map(str::to_owned)
            .collect()
    }

    /// Deletes blobs no document references any more.
    async fn release_blobs(&self, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }
        let referenced = self.referenced_keys();
        for key in keys.iter().filter(|key| !referenced.contains(*key)) {
            match self.blobs.delete(key).await {
                Ok(existed) => tracing::debug!(key = %key, existed, "released attachment"),
                Err(err) => tracing::warn!(key = %key, %err, "failed to release attachment"),
            }
        }
    }

    fn validate_upload(&self, upload: &AttachmentUpload) -> EditorResult<String> {
        let extension = extension_of(&upload.file_name)
            .filter(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
            .ok_or_else(|| {
                EditorError::InvalidAttachment(format!(
                    "{}: expected one of {}",
                    upload.file_name,
                    IMAGE_EXTENSIONS.join(", ")
                ))
            })?;
        let size = upload.bytes.len() as u64;
        if size > self.config.max_image_bytes {
            return Err(EditorError::InvalidAttachment(format!(
                "{}: {size} bytes exceeds the {} byte limit",
                upload.file_name, self.config.max_image_bytes
            )));
        }
        Ok(extension)
    }

    /// Stores an image blob and points the target media item at it. Nothing
    /// changes when the blob store rejects the write.
    pub async fn upload_attachment(&mut self, upload: AttachmentUpload) -> EditorResult<String> {
        let extension = self.validate_upload(&upload)?;
        self.collection.flush(&mut self.form);

        let index = self.collection.active_index();
        let recipe = self
            .collection
            .active()
            .as_recipe()
            .ok_or(EditorError::NotARecipe { index })?;
        let step = recipe
            .walkthrough
            .get(upload.step)
            .ok_or(EditorError::IndexOutOfRange {
                index: upload.step,
                len: recipe.walkthrough.len(),
            })?;
        let media_index = match upload.media {
            Some(media) if media <= step.media.len() => media,
            Some(media) => {
                return Err(EditorError::IndexOutOfRange {
                    index: media,
                    len: step.media.len(),
                });
            }
            None => step
                .media
                .iter()
                .position(|item| item.url.trim().is_empty())
                .unwrap_or(step.media.len()),
        };

        let alt = upload
            .alt
            .as_deref()
            .map(str::trim)
            .filter(|alt| !alt.is_empty())
            .map(str::to_owned);
        let mut signals = KeySignals::extract(self.collection.active(), upload.step, media_index);
        if let (Some(signals), Some(alt)) = (signals.as_mut(), alt.as_ref()) {
            signals.alt = alt.clone();
        }
        let counter = self.attachment_counter + 1;
        let key = attachment_key(
            signals.as_ref(),
            &used_keys(self.collection.documents()),
            counter,
            Utc::now(),
        );

        self.blobs
            .put(&key, upload.bytes)
            .await
            .inspect_err(|err| tracing::warn!(key = %key, %err, "attachment upload rejected"))?;

        let mut previous = None;
        if let Some(recipe) = self.collection.active_mut().as_recipe_mut()
            && let Some(step) = recipe.walkthrough.get_mut(upload.step)
        {
            if media_index == step.media.len() {
                step.media.push(MediaItem::placeholder());
            }
            let media = &mut step.media[media_index];
            previous = media.blob_key().map(str::to_owned);
            media.kind = MediaType::Image;
            media.url = format!("{ATTACHMENT_DIR}{key}.{extension}");
            media.attachment_key = Some(key.clone());
            if let Some(alt) = alt {
                media.alt = alt;
            }
        }
        self.attachment_counter = counter;
        self.form.push_to_form(self.collection.active());
        self.mark_changed();
        tracing::info!(key = %key, step = upload.step, media = media_index, "attached image");

        if let Some(previous) = previous.filter(|previous| *previous != key) {
            self.release_blobs(vec![previous]).await;
        }
        Ok(key)
    }

    /// Imports each `(source, JSON text)` pair on its own; failures are
    /// collected, not fatal.
    pub fn import_json(&mut self, files: Vec<(String, String)>) -> ImportSummary {
        let mut summary = ImportSummary::default();
        for (source, text) in files {
            let result = serde_json::from_str(&text)
                .map_err(|err| ValidationError::InvalidJson(err.to_string()))
                .and_then(|raw| self.collection.import_document(&raw, &source, &mut self.form));
            match result {
                Ok(_) => summary.imported += 1,
                Err(err) => summary.failures.push((source, err.to_string())),
            }
        }
        if summary.imported > 0 {
            self.mark_changed();
        }
        tracing::info!(
            imported = summary.imported,
            failed = summary.failures.len(),
            "json import finished"
        );
        summary
    }

    pub async fn import_archive(&mut self, source: &str, bytes: &[u8]) -> EditorResult<ImportSummary> {
        let contents = read_archive(bytes)?;
        let mut summary = ImportSummary {
            imported: 0,
            failures: contents
                .failures
                .into_iter()
                .map(|(name, reason)| (format!("{source}:{name}"), reason))
                .collect(),
        };

        for imported in contents.documents {
            let label = format!("{source}:{}", imported.source);
            match self.store_imported(imported).await {
                Ok(document) => {
                    let index = self.collection.push_document(document, &mut self.form);
                    tracing::info!(source = %label, index, "imported archived document");
                    summary.imported += 1;
                }
                Err(err) => {
                    tracing::warn!(source = %label, %err, "archived document not imported");
                    summary.failures.push((label, err.to_string()));
                }
            }
        }

        if summary.imported > 0 {
            self.mark_changed();
        }
        Ok(summary)
    }

    /// Stores the images of an archived document under keys unused in the
    /// collection and rewrites its media to match. On a store failure the
    /// blobs already written for this document are removed again.
    async fn store_imported(&self, imported: ImportedDocument) -> EditorResult<Document> {
        let ImportedDocument {
            mut document,
            images,
            ..
        } = imported;
        let mut used = used_keys(self.collection.documents());
        let mut renames: HashMap<String, String> = HashMap::new();
        let mut stored: Vec<String> = Vec::with_capacity(images.len());

        for (key, bytes) in images {
            let target = unique_key(&key, &used);
            if let Err(err) = self.blobs.put(&target, bytes).await {
                for key in &stored {
                    if let Err(err) = self.blobs.delete(key).await {
                        tracing::warn!(key = %key, %err, "rollback of imported attachment failed");
                    }
                }
                return Err(err);
            }
            used.insert(target.clone());
            stored.push(target.clone());
            if target != key {
                renames.insert(key, target);
            }
        }

        if let Some(recipe) = document.as_recipe_mut() {
            for media in recipe.media_mut() {
                let Some(renamed) = media.blob_key().and_then(|key| renames.get(key)).cloned()
                else {
                    continue;
                };
                media.url = match media.attachment_file_name().and_then(extension_of) {
                    Some(ext) => format!("{ATTACHMENT_DIR}{renamed}.{ext}"),
                    None => format!("{ATTACHMENT_DIR}{renamed}"),
                };
                media.attachment_key = Some(renamed);
            }
        }
        Ok(document)
    }

    pub fn preview(&mut self) -> EditorResult<String> {
        self.collection.flush(&mut self.form);
        self.collection
            .active()
            .preview()
            .map_err(|err| EditorError::Persistence(format!("serialize preview: {err}")))
    }

    pub async fn export_all(&mut self) -> EditorResult<ArchiveBuild> {
        self.collection.flush(&mut self.form);
        let build = ArchiveAssembler::new(self.blobs.as_ref())
            .assemble(self.collection.documents(), Utc::now())
            .await?;
        if build.report.is_partial() {
            tracing::warn!(
                missing = build.report.images_found - build.report.images_resolved,
                "archive exported without some attachments"
            );
        }
        self.phase = SessionPhase::Exported;
        Ok(build)
    }

    /// Clears the stored snapshot, then the blob store, then the collection.
    /// When the snapshot cannot be cleared nothing is touched. When the blob
    /// store cannot be cleared the collection is kept and marked dirty so the
    /// next save writes it back.
    pub async fn cleanup(&mut self) -> EditorResult<()> {
        self.snapshots
            .clear()
            .await
            .inspect_err(|err| tracing::warn!(%err, "cleanup aborted; snapshot not cleared"))?;
        self.last_saved_digest = None;
        if let Err(err) = self.blobs.clear().await {
            tracing::warn!(%err, "cleanup aborted; blob store not cleared");
            self.mark_changed();
            return Err(err);
        }

        self.collection.reset(&mut self.form);
        self.session_id = new_session_id();
        self.attachment_counter = 0;
        self.dirty = false;
        self.scheduler.cancel();
        self.last_saved_digest = None;
        self.phase = SessionPhase::Empty;
        tracing::info!(session = %self.session_id, "session cleaned up");
        Ok(())
    }

    pub async fn dispatch(&mut self, command: Command) -> EditorResult<CommandOutcome> {
        let outcome = match command {
            Command::AddDocument(variant) => CommandOutcome::Active(self.add_document(variant)),
            Command::RemoveDocument(index) => {
                self.remove_document(index).await?;
                CommandOutcome::Active(self.collection.active_index())
            }
            Command::SwitchTo(index) => {
                self.switch_to(index)?;
                CommandOutcome::Active(index)
            }
            Command::SetMode(mode) => CommandOutcome::Active(self.set_mode(mode)),
            Command::Edit(edit) => {
                self.apply_edit(edit).await?;
                CommandOutcome::Done
            }
            Command::UploadAttachment(upload) => {
                CommandOutcome::Attached(self.upload_attachment(upload).await?)
            }
            Command::ImportJson(files) => CommandOutcome::Imported(self.import_json(files)),
            Command::ImportArchive { source, bytes } => {
                CommandOutcome::Imported(self.import_archive(&source, &bytes).await?)
            }
            Command::ExportAll => CommandOutcome::Exported(self.export_all().await?),
            Command::Preview => CommandOutcome::Preview(self.preview()?),
            Command::Cleanup => {
                self.cleanup().await?;
                CommandOutcome::Done
            }
        };
        Ok(outcome)
    }
}
