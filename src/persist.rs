use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use tokio::fs;
use tokio::sync::Mutex;

use crate::document::{Document, Variant};
use crate::error::{EditorError, EditorResult};

/// Name under which the session snapshot is stored.
pub const SNAPSHOT_KEY: &str = "recipeProducerData";

/// Everything needed to restore an editing session except blob payloads.
/// Attachment keys are kept so images resolve again after a reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub session_id: String,
    pub documents: Vec<Document>,
    pub active_index: usize,
    pub attachment_counter: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Variant>,
}

impl Snapshot {
    pub fn digest(&self) -> EditorResult<String> {
        let bytes = serde_json::to_vec(self)
            .map_err(|err| EditorError::Persistence(format!("serialize snapshot: {err}")))?;
        Ok(hex::encode(sha2::Sha256::digest(&bytes)))
    }
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self) -> EditorResult<Option<Snapshot>>;
    async fn save(&self, snapshot: &Snapshot) -> EditorResult<()>;
    async fn clear(&self) -> EditorResult<()>;
}

#[derive(Debug, Clone)]
pub struct LocalFsSnapshotStore {
    dir: PathBuf,
}

impl LocalFsSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{SNAPSHOT_KEY}.json"))
    }
}

fn persistence(err: anyhow::Error) -> EditorError {
    EditorError::Persistence(format!("{err:#}"))
}

#[async_trait]
impl SnapshotStore for LocalFsSnapshotStore {
    async fn load(&self) -> EditorResult<Option<Snapshot>> {
        let path = self.path();
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
            .map_err(persistence)
    }

    async fn save(&self, snapshot: &Snapshot) -> EditorResult<()> {
        write_json_atomic(&self.path(), snapshot)
            .await
            .context("write snapshot")
            .map_err(persistence)
    }

    async fn clear(&self) -> EditorResult<()> {
        let path = self.path();
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(persistence(
                anyhow::Error::from(err).context(format!("remove: {}", path.display())),
            )),
        }
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

/// Snapshot store kept in memory; writes can be made to fail to exercise the
/// unsaved-changes path.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    saved: Arc<Mutex<Option<Snapshot>>>,
    writes: Arc<AtomicU64>,
    unavailable: Arc<AtomicBool>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> EditorResult<Option<Snapshot>> {
        Ok(self.saved.lock().await.clone())
    }

    async fn save(&self, snapshot: &Snapshot) -> EditorResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EditorError::Persistence("snapshot store unavailable".into()));
        }
        *self.saved.lock().await = Some(snapshot.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self) -> EditorResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EditorError::Persistence("snapshot store unavailable".into()));
        }
        *self.saved.lock().await = None;
        Ok(())
    }
}

/// Monotonic time source for the autosave debounce.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

/// Coalesces bursts of changes into one flush `delay` after the last change.
#[derive(Debug, Clone)]
pub struct FlushScheduler {
    delay: Duration,
    deadline: Option<Duration>,
}

impl FlushScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn schedule_flush(&mut self, now: Duration) {
        self.deadline = Some(now + self.delay);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_due(&self, now: Duration) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}
