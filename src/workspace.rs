use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;

use crate::blob_store::LocalFsBlobStore;
use crate::cli::{Cli, Command as CliCommand};
use crate::config::EditorConfig;
use crate::form::{DraftForm, FieldEdit, TextField};
use crate::persist::{LocalFsSnapshotStore, SystemClock};
use crate::session::{AttachmentUpload, Command, CommandOutcome, EditorSession, ImportSummary};

pub const BLOB_DIR: &str = "blobs";

/// Opens the session stored in `dir`: the snapshot at its root and one blob
/// file per attachment under `blobs/`.
pub async fn open_session(dir: &Path, config: EditorConfig) -> anyhow::Result<EditorSession> {
    let blobs =
        LocalFsBlobStore::new(dir.join(BLOB_DIR)).with_quota(config.blob_quota_bytes);
    let mut session = EditorSession::new(
        config,
        Arc::new(blobs),
        Arc::new(LocalFsSnapshotStore::new(dir)),
        Arc::new(SystemClock::default()),
        DraftForm::new(),
    );
    let restored = session
        .restore()
        .await
        .with_context(|| format!("restore session from {}", dir.display()))?;
    tracing::debug!(workspace = %dir.display(), restored, "opened workspace");
    Ok(session)
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = EditorConfig::from_env().context("load config")?;
    let dir = PathBuf::from(&cli.workspace);
    let mut session = open_session(&dir, config).await?;
    let persist = cli.command.mutates();

    match cli.command {
        CliCommand::Add(args) => {
            let outcome = session.dispatch(Command::AddDocument(args.variant)).await?;
            if let Some(title) = args.title {
                session
                    .dispatch(Command::Edit(FieldEdit::SetText {
                        field: TextField::Title,
                        value: title,
                    }))
                    .await?;
            }
            if let CommandOutcome::Active(index) = outcome {
                println!("added {} document {index}", args.variant);
            }
        }
        CliCommand::List => {
            let collection = session.collection();
            println!("mode: {}", collection.mode());
            for tab in collection.tabs() {
                let marker = if tab.active { '*' } else { ' ' };
                println!("{marker} {}\t{}", tab.index, tab.title);
            }
        }
        CliCommand::Switch { index } => {
            session.dispatch(Command::SwitchTo(index)).await?;
            println!("active: {index}");
        }
        CliCommand::Remove { index } => {
            if let CommandOutcome::Active(active) =
                session.dispatch(Command::RemoveDocument(index)).await?
            {
                println!("removed {index}; active: {active}");
            }
        }
        CliCommand::Mode { variant } => {
            if let CommandOutcome::Active(active) =
                session.dispatch(Command::SetMode(variant)).await?
            {
                println!("mode: {variant}; active: {active}");
            }
        }
        CliCommand::Set(args) => {
            session
                .dispatch(Command::Edit(FieldEdit::SetText {
                    field: args.field,
                    value: args.value,
                }))
                .await?;
        }
        CliCommand::StepName { step, name } => {
            session
                .dispatch(Command::Edit(FieldEdit::SetStepName { step, name }))
                .await?;
        }
        CliCommand::Alt(args) => {
            session
                .dispatch(Command::Edit(FieldEdit::SetMediaAlt {
                    step: args.step,
                    media: args.media,
                    alt: args.alt,
                }))
                .await?;
        }
        CliCommand::Import(args) => {
            let summary = import_paths(&mut session, &args.paths).await?;
            println!("{}", summary.summary());
        }
        CliCommand::Attach(args) => {
            let path = Path::new(&args.file);
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("read image: {}", path.display()))?;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| args.file.clone());
            let outcome = session
                .dispatch(Command::UploadAttachment(AttachmentUpload {
                    step: args.step,
                    media: args.media,
                    file_name,
                    bytes,
                    alt: args.alt,
                }))
                .await?;
            if let CommandOutcome::Attached(key) = outcome {
                println!("attached {key}");
            }
        }
        CliCommand::Preview => {
            if let CommandOutcome::Preview(json) = session.dispatch(Command::Preview).await? {
                println!("{json}");
            }
        }
        CliCommand::Export(args) => {
            if let CommandOutcome::Exported(build) = session.dispatch(Command::ExportAll).await? {
                let out_dir = PathBuf::from(&args.out);
                tokio::fs::create_dir_all(&out_dir)
                    .await
                    .with_context(|| format!("create output dir: {}", out_dir.display()))?;
                let path = out_dir.join(&build.file_name);
                tokio::fs::write(&path, &build.bytes)
                    .await
                    .with_context(|| format!("write archive: {}", path.display()))?;
                println!("{}", path.display());
                println!("{}", build.report.summary());
            }
        }
        CliCommand::Cleanup => {
            if let Err(err) = session.dispatch(Command::Cleanup).await {
                if session.is_dirty() {
                    session
                        .persist()
                        .await
                        .context("save session after failed cleanup")?;
                }
                return Err(err).context("clean up workspace");
            }
            println!("workspace cleared");
        }
    }

    if persist {
        session.persist().await.context("save session")?;
    }
    Ok(())
}

/// Imports `.zip` paths as archives and everything else as one JSON batch.
/// Unreadable files are reported in the summary like invalid ones.
async fn import_paths(session: &mut EditorSession, paths: &[String]) -> anyhow::Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    let mut json_files = Vec::new();

    for raw in paths {
        let path = Path::new(raw);
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) => {
                summary.failures.push((raw.clone(), format!("read: {err}")));
                continue;
            }
        };
        let is_archive = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
        if is_archive {
            let outcome = session
                .dispatch(Command::ImportArchive {
                    source: raw.clone(),
                    bytes,
                })
                .await;
            match outcome {
                Ok(CommandOutcome::Imported(archive)) => merge(&mut summary, archive),
                Ok(_) => {}
                Err(err) => summary.failures.push((raw.clone(), err.to_string())),
            }
        } else {
            json_files.push((raw.clone(), String::from_utf8_lossy(&bytes).into_owned()));
        }
    }

    if !json_files.is_empty()
        && let CommandOutcome::Imported(json) = session.dispatch(Command::ImportJson(json_files)).await?
    {
        merge(&mut summary, json);
    }
    Ok(summary)
}

fn merge(into: &mut ImportSummary, from: ImportSummary) {
    into.imported += from.imported;
    into.failures.extend(from.failures);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Variant;

    #[tokio::test]
    async fn workspace_session_survives_reopening() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let mut session = open_session(temp.path(), EditorConfig::default()).await?;
        session.add_document(Variant::Function);
        session.persist().await?;

        let reopened = open_session(temp.path(), EditorConfig::default()).await?;
        assert_eq!(reopened.collection().len(), 2);
        assert_eq!(reopened.collection().mode(), Variant::Function);
        assert!(temp.path().join("recipeProducerData.json").exists());
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_import_paths_are_reported() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let good = temp.path().join("good.json");
        std::fs::write(&good, r#"{ "title": "Good" }"#)?;
        let mut session = open_session(temp.path(), EditorConfig::default()).await?;

        let paths = vec![
            good.display().to_string(),
            temp.path().join("missing.json").display().to_string(),
        ];
        let summary = import_paths(&mut session, &paths).await?;
        assert_eq!(summary.imported, 1);
        assert_eq!(summary.failures.len(), 1);
        assert!(summary.failures[0].0.ends_with("missing.json"));
        Ok(())
    }
}
