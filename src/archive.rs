use std::collections::{BTreeMap, HashSet};
use std::io::{Cursor, Read as _, Write as _};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::blob_store::BlobStore;
use crate::document::{ATTACHMENT_DIR, Document, RecipeDocument, Variant};
use crate::error::{EditorError, EditorResult};
use crate::naming::{sanitize_file_stem, strip_extension, unique_key};
use crate::normalize::{normalize_as, parse_document};

pub const RECIPE_FILE: &str = "recipe.json";

const DEFAULT_IMAGE_EXTENSION: &str = "jpg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFailure {
    pub document: String,
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub documents_exported: usize,
    pub images_found: usize,
    pub images_resolved: usize,
    pub failures: Vec<AttachmentFailure>,
}

impl ExportReport {
    pub fn is_partial(&self) -> bool {
        self.images_resolved < self.images_found
    }

    pub fn summary(&self) -> String {
        let mut message = format!(
            "exported {} document(s), {}/{} image(s) resolved",
            self.documents_exported, self.images_resolved, self.images_found
        );
        for failure in &self.failures {
            message.push_str(&format!(
                "\n  {}: {} ({})",
                failure.document, failure.key, failure.reason
            ));
        }
        message
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveBuild {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub report: ExportReport,
}

/// `recipes-batch-<timestamp>.zip`, with the ISO-8601 timestamp's `:` and
/// `.` replaced by `-` and cut to 19 characters.
pub fn archive_file_name(now: DateTime<Utc>) -> String {
    let stamp: String = now
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
        .chars()
        .take(19)
        .collect();
    format!("recipes-batch-{stamp}.zip")
}

/// Keys tried, in order, when resolving an attachment.
pub fn resolution_candidates(key: &str, file_name: Option<&str>) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::with_capacity(4);
    let mut push = |candidate: &str| {
        if !candidate.is_empty() && !candidates.iter().any(|c| c == candidate) {
            candidates.push(candidate.to_owned());
        }
    };
    push(key);
    push(strip_extension(key));
    if let Some(file_name) = file_name {
        push(file_name);
        push(strip_extension(file_name));
    }
    candidates
}

#[derive(Debug)]
enum Entry {
    Directory(String),
    File { path: String, bytes: Vec<u8> },
}

pub struct ArchiveAssembler<'a> {
    store: &'a dyn BlobStore,
}

impl<'a> ArchiveAssembler<'a> {
    pub fn new(store: &'a dyn BlobStore) -> Self {
        Self { store }
    }

    pub async fn assemble(
        &self,
        documents: &[Document],
        now: DateTime<Utc>,
    ) -> EditorResult<ArchiveBuild> {
        let exportable: Vec<&Document> =
            documents.iter().filter(|doc| doc.is_exportable()).collect();
        if exportable.is_empty() {
            return Err(EditorError::NoExportableDocuments);
        }

        let mut report = ExportReport::default();
        let mut entries = Vec::new();
        let mut root_names = HashSet::new();

        for document in exportable {
            match document {
                Document::Function(_) => {
                    let stem = sanitize_file_stem(document.title(), "function");
                    let name = unique_key(&stem, &root_names);
                    root_names.insert(name.clone());
                    entries.push(Entry::File {
                        path: format!("{name}.json"),
                        bytes: clean_json_bytes(document)?,
                    });
                }
                Document::Recipe(recipe) => {
                    let stem = sanitize_file_stem(&recipe.id, "recipe");
                    let folder = unique_key(&stem, &root_names);
                    root_names.insert(folder.clone());
                    self.add_recipe(&folder, recipe, &mut entries, &mut report)
                        .await?;
                }
            }
            report.documents_exported += 1;
        }

        let bytes = tokio::task::spawn_blocking(move || write_zip(entries))
            .await
            .map_err(|err| EditorError::Archive(format!("join zip task: {err}")))??;

        let file_name = archive_file_name(now);
        tracing::info!(
            file = %file_name,
            documents = report.documents_exported,
            images_found = report.images_found,
            images_resolved = report.images_resolved,
            "assembled archive"
        );
        Ok(ArchiveBuild {
            file_name,
            bytes,
            report,
        })
    }

    async fn add_recipe(
        &self,
        folder: &str,
        recipe: &RecipeDocument,
        entries: &mut Vec<Entry>,
        report: &mut ExportReport,
    ) -> EditorResult<()> {
        let mut exported = recipe.clone();
        entries.push(Entry::Directory(format!("{folder}/")));
        entries.push(Entry::Directory(format!("{folder}/{ATTACHMENT_DIR}")));

        for media in exported.media_mut() {
            let Some(key) = media.blob_key().map(str::to_owned) else {
                continue;
            };
            report.images_found += 1;

            let file_name = media
                .attachment_file_name()
                .map(str::to_owned)
                .unwrap_or_else(|| format!("{key}.{DEFAULT_IMAGE_EXTENSION}"));
            match self.resolve(&key, media.attachment_file_name()).await {
                Ok(bytes) => {
                    entries.push(Entry::File {
                        path: format!("{folder}/{ATTACHMENT_DIR}{file_name}"),
                        bytes,
                    });
                    media.url = format!("{ATTACHMENT_DIR}{file_name}");
                    report.images_resolved += 1;
                }
                Err(err) => {
                    tracing::warn!(document = folder, key = %key, %err, "attachment not exported");
                    report.failures.push(AttachmentFailure {
                        document: folder.to_owned(),
                        key,
                        reason: err.to_string(),
                    });
                }
            }
        }

        entries.push(Entry::File {
            path: format!("{folder}/{RECIPE_FILE}"),
            bytes: clean_json_bytes(&Document::Recipe(exported))?,
        });
        Ok(())
    }

    async fn resolve(&self, key: &str, file_name: Option<&str>) -> EditorResult<Vec<u8>> {
        let mut last_error = None;
        for candidate in resolution_candidates(key, file_name) {
            match self.store.get(&candidate).await {
                Ok(Some(bytes)) => {
                    if candidate != key {
                        tracing::debug!(key, candidate = %candidate, "resolved attachment via fallback key");
                    }
                    return Ok(bytes);
                }
                Ok(None) => {}
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error.unwrap_or_else(|| EditorError::AttachmentMissing {
            key: key.to_owned(),
        }))
    }
}

fn clean_json_bytes(document: &Document) -> EditorResult<Vec<u8>> {
    let value = document
        .to_clean_json()
        .map_err(|err| EditorError::Archive(format!("serialize {}: {err}", document.title())))?;
    serde_json::to_vec_pretty(&value)
        .map_err(|err| EditorError::Archive(format!("serialize {}: {err}", document.title())))
}

fn write_zip(entries: Vec<Entry>) -> EditorResult<Vec<u8>> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for entry in entries {
        match entry {
            Entry::Directory(path) => zip.add_directory(path, options)?,
            Entry::File { path, bytes } => {
                zip.start_file(path.as_str(), options)?;
                zip.write_all(&bytes)
                    .map_err(|err| EditorError::Archive(format!("zip write {path}: {err}")))?;
            }
        }
    }

    Ok(zip.finish()?.into_inner())
}

/// A document read back from an archive, with the image bytes its media
/// items reference keyed by attachment key.
#[derive(Debug, Clone)]
pub struct ImportedDocument {
    pub source: String,
    pub document: Document,
    pub images: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveContents {
    pub documents: Vec<ImportedDocument>,
    pub failures: Vec<(String, String)>,
}

/// Reads every recipe folder (`<folder>/recipe.json` + `<folder>/images/`)
/// and every root-level `*.json` document out of a zip archive.
pub fn read_archive(bytes: &[u8]) -> EditorResult<ArchiveContents> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut files: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_owned();
        if name.starts_with("__MACOSX/") {
            continue;
        }
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|err| EditorError::Archive(format!("read {name}: {err}")))?;
        files.insert(name, buf);
    }

    let mut contents = ArchiveContents::default();
    for (name, data) in &files {
        let parts: Vec<&str> = name.split('/').collect();
        match parts.as_slice() {
            [file_name] if file_name.to_ascii_lowercase().ends_with(".json") => {
                match parse_document(&String::from_utf8_lossy(data)) {
                    Ok(document) => contents.documents.push(ImportedDocument {
                        source: name.clone(),
                        document,
                        images: Vec::new(),
                    }),
                    Err(err) => contents.failures.push((name.clone(), err.to_string())),
                }
            }
            [folder, file_name] if *file_name == RECIPE_FILE => {
                match read_recipe_folder(folder, data, &files) {
                    Ok(imported) => contents.documents.push(imported),
                    Err(err) => contents.failures.push((name.clone(), err.to_string())),
                }
            }
            _ => {}
        }
    }

    tracing::info!(
        documents = contents.documents.len(),
        failures = contents.failures.len(),
        "read archive"
    );
    Ok(contents)
}

fn parse_json(data: &[u8]) -> EditorResult<serde_json::Value> {
    serde_json::from_slice(data).map_err(|err| {
        EditorError::Validation(crate::error::ValidationError::InvalidJson(err.to_string()))
    })
}

fn read_recipe_folder(
    folder: &str,
    data: &[u8],
    files: &BTreeMap<String, Vec<u8>>,
) -> EditorResult<ImportedDocument> {
    let raw = parse_json(data)?;
    let mut document = normalize_as(&raw, Variant::Recipe)?;
    let mut images: Vec<(String, Vec<u8>)> = Vec::new();

    if let Some(recipe) = document.as_recipe_mut() {
        for media in recipe.media_mut() {
            let Some(file_name) = media.attachment_file_name().map(str::to_owned) else {
                continue;
            };
            let path = format!("{folder}/{ATTACHMENT_DIR}{file_name}");
            let Some(bytes) = files.get(&path) else {
                tracing::warn!(folder, image = %file_name, "image referenced but missing from archive");
                continue;
            };
            let key = strip_extension(&file_name).to_owned();
            if !images.iter().any(|(existing, _)| *existing == key) {
                images.push((key.clone(), bytes.clone()));
            }
            media.attachment_key = Some(key);
        }
    }

    Ok(ImportedDocument {
        source: format!("{folder}/{RECIPE_FILE}"),
        document,
        images,
    })
}

#[cfg(test)]
mod tests {
    use std::io::{Read as _, Write as _};

    use chrono::TimeZone as _;

    use super::*;
    use crate::blob_store::MemoryBlobStore;
    use crate::document::{FunctionDocument, MediaItem, MediaType, StepName};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap()
    }

    fn demo_recipe(key: &str) -> Document {
        let mut recipe = RecipeDocument::empty();
        recipe.title = "Demo".into();
        recipe.id = "demo".into();
        recipe.category = "setup".into();
        recipe.walkthrough[0].name = StepName::from("Retrieve");
        recipe.walkthrough[0].media[0] = MediaItem {
            kind: MediaType::Image,
            url: format!("images/{key}.png"),
            alt: "screenshot".into(),
            attachment_key: Some(key.into()),
        };
        Document::Recipe(recipe)
    }

    fn zip_names(bytes: &[u8]) -> Vec<String> {
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("zip");
        let mut names: Vec<String> = archive.file_names().map(str::to_owned).collect();
        names.sort();
        names
    }

    fn zip_text(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("zip");
        let mut file = archive.by_name(name).expect("entry");
        let mut text = String::new();
        file.read_to_string(&mut text).expect("read");
        text
    }

    #[test]
    fn file_name_replaces_separators_and_truncates() {
        assert_eq!(
            archive_file_name(now()),
            "recipes-batch-2025-03-04T05-06-07.zip"
        );
    }

    #[test]
    fn candidates_are_deduplicated_in_order() {
        assert_eq!(
            resolution_candidates("shot", Some("shot.png")),
            vec!["shot", "shot.png"]
        );
        assert_eq!(
            resolution_candidates("shot.png", Some("other.jpg")),
            vec!["shot.png", "shot", "other.jpg", "other"]
        );
    }

    #[tokio::test]
    async fn exports_recipe_folder_with_resolved_images() -> anyhow::Result<()> {
        let store = MemoryBlobStore::new();
        store.put("setup-retrieve-screenshot", b"PNG".to_vec()).await?;
        let docs = vec![demo_recipe("setup-retrieve-screenshot")];

        let build = ArchiveAssembler::new(&store).assemble(&docs, now()).await?;
        assert_eq!(build.report.documents_exported, 1);
        assert_eq!(build.report.images_found, 1);
        assert_eq!(build.report.images_resolved, 1);
        assert!(!build.report.is_partial());

        let names = zip_names(&build.bytes);
        assert!(names.contains(&"demo/recipe.json".to_owned()));
        assert!(names.contains(&"demo/images/setup-retrieve-screenshot.png".to_owned()));

        let recipe = zip_text(&build.bytes, "demo/recipe.json");
        assert!(!recipe.contains("attachmentKey"));
        assert!(!recipe.contains("docType"));
        assert!(recipe.contains("images/setup-retrieve-screenshot.png"));
        Ok(())
    }

    #[tokio::test]
    async fn dangling_attachment_is_skipped_and_reported() -> anyhow::Result<()> {
        let store = MemoryBlobStore::new();
        let mut docs = vec![demo_recipe("gone")];
        if let Some(recipe) = docs[0].as_recipe_mut() {
            recipe.walkthrough[0].media.push(MediaItem {
                kind: MediaType::Image,
                url: "images/kept.png".into(),
                alt: String::new(),
                attachment_key: Some("kept".into()),
            });
        }
        store.put("kept", vec![1]).await?;

        let build = ArchiveAssembler::new(&store).assemble(&docs, now()).await?;
        assert_eq!(build.report.images_found, 2);
        assert_eq!(build.report.images_resolved, 1);
        assert!(build.report.is_partial());
        assert_eq!(build.report.failures.len(), 1);
        assert_eq!(build.report.failures[0].key, "gone");

        let names = zip_names(&build.bytes);
        assert!(names.contains(&"demo/images/kept.png".to_owned()));
        assert!(!names.iter().any(|n| n.contains("gone")));
        Ok(())
    }

    #[tokio::test]
    async fn fallback_keys_resolve_legacy_blobs() -> anyhow::Result<()> {
        let store = MemoryBlobStore::new();
        store.put("legacy.png", vec![9]).await?;
        let mut docs = vec![demo_recipe("legacy")];
        if let Some(recipe) = docs[0].as_recipe_mut() {
            recipe.walkthrough[0].media[0].url = "images/legacy.png".into();
        }
        let build = ArchiveAssembler::new(&store).assemble(&docs, now()).await?;
        assert_eq!(build.report.images_resolved, 1);
        Ok(())
    }

    #[tokio::test]
    async fn function_documents_go_to_the_root_without_internal_fields() -> anyhow::Result<()> {
        let store = MemoryBlobStore::new();
        let mut function = FunctionDocument::empty();
        function.title = "VLOOKUP Basics".into();
        function.id = "vlookup-basics".into();
        let docs = vec![
            Document::Function(function.clone()),
            Document::Function(function),
            Document::empty(Variant::Recipe),
        ];

        let build = ArchiveAssembler::new(&store).assemble(&docs, now()).await?;
        assert_eq!(build.report.documents_exported, 2);
        let names = zip_names(&build.bytes);
        assert_eq!(names, vec!["vlookup-basics-2.json", "vlookup-basics.json"]);

        let text = zip_text(&build.bytes, "vlookup-basics.json");
        let value: serde_json::Value = serde_json::from_str(&text)?;
        assert!(value.get("id").is_none());
        assert!(value.get("docType").is_none());
        assert_eq!(value["title"], "VLOOKUP Basics");
        Ok(())
    }

    #[tokio::test]
    async fn nothing_exportable_is_rejected_up_front() {
        let store = MemoryBlobStore::new();
        let docs = vec![Document::empty(Variant::Recipe)];
        let err = ArchiveAssembler::new(&store)
            .assemble(&docs, now())
            .await
            .unwrap_err();
        assert!(matches!(err, EditorError::NoExportableDocuments));
    }

    #[tokio::test]
    async fn exported_archive_reads_back() -> anyhow::Result<()> {
        let store = MemoryBlobStore::new();
        store.put("setup-retrieve-screenshot", b"PNG".to_vec()).await?;
        let mut function = FunctionDocument::empty();
        function.title = "SUM".into();
        let docs = vec![
            demo_recipe("setup-retrieve-screenshot"),
            Document::Function(function),
        ];
        let build = ArchiveAssembler::new(&store).assemble(&docs, now()).await?;

        let contents = read_archive(&build.bytes)?;
        assert!(contents.failures.is_empty());
        assert_eq!(contents.documents.len(), 2);

        let recipe = contents
            .documents
            .iter()
            .find(|d| d.document.variant() == Variant::Recipe)
            .expect("recipe");
        assert_eq!(recipe.source, "demo/recipe.json");
        assert_eq!(
            recipe.images,
            vec![("setup-retrieve-screenshot".to_owned(), b"PNG".to_vec())]
        );
        assert_eq!(
            recipe.document.attachment_keys(),
            vec!["setup-retrieve-screenshot"]
        );
        assert!(
            contents
                .documents
                .iter()
                .any(|d| d.document.variant() == Variant::Function && d.document.title() == "SUM")
        );
        Ok(())
    }

    #[test]
    fn broken_folders_are_reported_per_item() -> anyhow::Result<()> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("bad/recipe.json", options)?;
        zip.write_all(br#"{ "category": "no title" }"#)?;
        zip.start_file("good/recipe.json", options)?;
        zip.write_all(br#"{ "title": "Good" }"#)?;
        zip.start_file("notes.txt", options)?;
        zip.write_all(b"ignored")?;
        let bytes = zip.finish()?.into_inner();

        let contents = read_archive(&bytes)?;
        assert_eq!(contents.documents.len(), 1);
        assert_eq!(contents.documents[0].document.title(), "Good");
        assert_eq!(contents.failures.len(), 1);
        assert_eq!(contents.failures[0].0, "bad/recipe.json");
        assert!(contents.failures[0].1.contains("title"));
        Ok(())
    }
}
