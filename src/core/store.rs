//! Artifact store: the only coordination medium between stages.
//!
//! Artifacts live at `<root>/<blog>/<run_id>/<artifact>`. Writes are
//! create-if-absent, so replaying a stage can never clobber an artifact
//! another worker already produced. The single exception is `result`, which
//! is updated under an exclusive lock through [`ArtifactStore::update`].

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;

use crate::domain::{ArtifactDocument, ArtifactKey, ArtifactKind, RunId, RunRef};

/// Errors surfaced by an artifact store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("Artifact {key} is not valid: {message}")]
    Corrupt { key: String, message: String },

    #[error("Store task failed: {0}")]
    Task(String),
}

impl StoreError {
    fn io(key: impl ToString, source: io::Error) -> Self {
        Self::Io {
            key: key.to_string(),
            source,
        }
    }
}

/// Result of a create-if-absent write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// Read-modify-write step for [`ArtifactStore::update`].
///
/// Receives the current bytes (if any) and returns the bytes to store.
pub type UpdateFn = Box<dyn FnOnce(Option<Vec<u8>>) -> Result<Vec<u8>, StoreError> + Send>;

/// Durable, hierarchical blob storage shared by every stage
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn exists(&self, key: &ArtifactKey) -> Result<bool, StoreError>;

    /// Atomically create the artifact unless it already exists
    async fn create_if_absent(
        &self,
        key: &ArtifactKey,
        bytes: Vec<u8>,
    ) -> Result<CreateOutcome, StoreError>;

    async fn read(&self, key: &ArtifactKey) -> Result<Option<Vec<u8>>, StoreError>;

    /// Serialized read-modify-write. Only the results logger uses this.
    async fn update(&self, key: &ArtifactKey, apply: UpdateFn) -> Result<Vec<u8>, StoreError>;

    /// Runs of a blog, oldest first
    async fn list_runs(&self, blog: &str) -> Result<Vec<RunId>, StoreError>;

    /// Blogs that have at least one run
    async fn list_blogs(&self) -> Result<Vec<String>, StoreError>;
}

/// Read and decode a typed artifact
pub async fn read_document<T: ArtifactDocument>(
    store: &dyn ArtifactStore,
    run: &RunRef,
) -> Result<Option<T>, StoreError> {
    let key = ArtifactKey::new(run, T::KIND);
    match store.read(&key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Encode and create a typed artifact if it does not exist yet
pub async fn create_document<T: ArtifactDocument>(
    store: &dyn ArtifactStore,
    run: &RunRef,
    document: &T,
) -> Result<CreateOutcome, StoreError> {
    let key = ArtifactKey::new(run, T::KIND);
    let bytes = serde_json::to_vec_pretty(document).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    store.create_if_absent(&key, bytes).await
}

/// Which artifacts of a run currently exist
pub async fn present_artifacts(
    store: &dyn ArtifactStore,
    run: &RunRef,
) -> Result<Vec<ArtifactKind>, StoreError> {
    let mut present = Vec::new();
    for kind in ArtifactKind::ALL {
        if store.exists(&ArtifactKey::new(run, kind)).await? {
            present.push(kind);
        }
    }
    Ok(present)
}

/// File-based store rooted at a directory
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    fn run_dir(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(&key.blog).join(key.run_id.to_string())
    }
}

/// Write to a temp file in the run directory, then link it into place.
/// The link fails if the target exists, so creation is atomic.
fn create_blocking(run_dir: &Path, path: &Path, bytes: &[u8]) -> io::Result<CreateOutcome> {
    std::fs::create_dir_all(run_dir)?;

    let mut tmp = NamedTempFile::new_in(run_dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(CreateOutcome::Created),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(CreateOutcome::AlreadyExists),
        Err(e) => Err(e.error),
    }
}

fn update_blocking(
    run_dir: &Path,
    path: &Path,
    key: &str,
    apply: UpdateFn,
) -> Result<Vec<u8>, StoreError> {
    std::fs::create_dir_all(run_dir).map_err(|e| StoreError::io(key, e))?;

    let lock_path = path.with_extension("lock");
    let lock = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)
        .map_err(|e| StoreError::io(key, e))?;

    lock.lock_exclusive().map_err(|e| StoreError::io(key, e))?;

    let current = match std::fs::File::open(path) {
        Ok(mut file) => {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf).map_err(|e| StoreError::io(key, e))?;
            Some(buf)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(StoreError::io(key, e)),
    };

    let next = apply(current)?;

    let mut tmp = NamedTempFile::new_in(run_dir).map_err(|e| StoreError::io(key, e))?;
    tmp.write_all(&next).map_err(|e| StoreError::io(key, e))?;
    tmp.as_file().sync_all().map_err(|e| StoreError::io(key, e))?;
    tmp.persist(path).map_err(|e| StoreError::io(key, e.error))?;

    // Lock is released when the file is dropped
    drop(lock);
    Ok(next)
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn exists(&self, key: &ArtifactKey) -> Result<bool, StoreError> {
        match fs::metadata(self.path_for(key)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    async fn create_if_absent(
        &self,
        key: &ArtifactKey,
        bytes: Vec<u8>,
    ) -> Result<CreateOutcome, StoreError> {
        let run_dir = self.run_dir(key);
        let path = self.path_for(key);

        tokio::task::spawn_blocking(move || create_blocking(&run_dir, &path, &bytes))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
            .map_err(|e| StoreError::io(key, e))
    }

    async fn read(&self, key: &ArtifactKey) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    async fn update(&self, key: &ArtifactKey, apply: UpdateFn) -> Result<Vec<u8>, StoreError> {
        let run_dir = self.run_dir(key);
        let path = self.path_for(key);
        let key = key.to_string();

        tokio::task::spawn_blocking(move || update_blocking(&run_dir, &path, &key, apply))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }

    async fn list_runs(&self, blog: &str) -> Result<Vec<RunId>, StoreError> {
        let blog_dir = self.root.join(blog);
        let mut runs = Vec::new();

        let mut entries = match fs::read_dir(&blog_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(runs),
            Err(e) => return Err(StoreError::io(blog_dir.display(), e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(blog_dir.display(), e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            let Some(Ok(run_id)) = entry.file_name().to_str().map(str::parse::<RunId>) else {
                continue;
            };
            // A run exists once its marker does; a bare directory is a
            // leftover from a failed create
            let marker = entry.path().join(ArtifactKind::Marker.file_name());
            if fs::metadata(&marker).await.map(|m| m.is_file()).unwrap_or(false) {
                runs.push(run_id);
            }
        }

        runs.sort();
        Ok(runs)
    }

    async fn list_blogs(&self) -> Result<Vec<String>, StoreError> {
        let mut blogs = Vec::new();

        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(blogs),
            Err(e) => return Err(StoreError::io(self.root.display(), e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(self.root.display(), e))?
        {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    blogs.push(name.to_string());
                }
            }
        }

        blogs.sort();
        Ok(blogs)
    }
}

/// In-process store with the same semantics, for tests and embedding
#[derive(Default)]
pub struct MemoryArtifactStore {
    artifacts: Mutex<BTreeMap<ArtifactKey, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys currently stored
    pub async fn keys(&self) -> Vec<ArtifactKey> {
        self.artifacts.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn exists(&self, key: &ArtifactKey) -> Result<bool, StoreError> {
        Ok(self.artifacts.lock().await.contains_key(key))
    }

    async fn create_if_absent(
        &self,
        key: &ArtifactKey,
        bytes: Vec<u8>,
    ) -> Result<CreateOutcome, StoreError> {
        let mut artifacts = self.artifacts.lock().await;
        if artifacts.contains_key(key) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        artifacts.insert(key.clone(), bytes);
        Ok(CreateOutcome::Created)
    }

    async fn read(&self, key: &ArtifactKey) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.artifacts.lock().await.get(key).cloned())
    }

    async fn update(&self, key: &ArtifactKey, apply: UpdateFn) -> Result<Vec<u8>, StoreError> {
        let mut artifacts = self.artifacts.lock().await;
        let next = apply(artifacts.get(key).cloned())?;
        artifacts.insert(key.clone(), next.clone());
        Ok(next)
    }

    async fn list_runs(&self, blog: &str) -> Result<Vec<RunId>, StoreError> {
        let artifacts = self.artifacts.lock().await;
        let mut runs: Vec<RunId> = artifacts
            .keys()
            .filter(|k| k.blog == blog && k.kind == ArtifactKind::Marker)
            .map(|k| k.run_id.clone())
            .collect();
        runs.sort();
        runs.dedup();
        Ok(runs)
    }

    async fn list_blogs(&self) -> Result<Vec<String>, StoreError> {
        let artifacts = self.artifacts.lock().await;
        let mut blogs: Vec<String> = artifacts.keys().map(|k| k.blog.clone()).collect();
        blogs.dedup();
        Ok(blogs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn run() -> RunRef {
        RunRef::new("bakery", "20261016T120000Z-0a1b2c3d".parse().unwrap())
    }

    #[tokio::test]
    async fn test_fs_create_if_absent_keeps_first_writer() {
        let temp = TempDir::new().unwrap();
        let store = FsArtifactStore::new(temp.path());
        let key = ArtifactKey::new(&run(), ArtifactKind::Research);

        assert!(!store.exists(&key).await.unwrap());
        assert_eq!(
            store.create_if_absent(&key, b"first".to_vec()).await.unwrap(),
            CreateOutcome::Created
        );
        assert_eq!(
            store.create_if_absent(&key, b"second".to_vec()).await.unwrap(),
            CreateOutcome::AlreadyExists
        );

        assert!(store.exists(&key).await.unwrap());
        assert_eq!(store.read(&key).await.unwrap(), Some(b"first".to_vec()));
        assert!(temp
            .path()
            .join("bakery/20261016T120000Z-0a1b2c3d/research.json")
            .exists());
    }

    #[tokio::test]
    async fn test_fs_read_missing_is_none() {
        let temp = TempDir::new().unwrap();
        let store = FsArtifactStore::new(temp.path());
        let key = ArtifactKey::new(&run(), ArtifactKind::Content);
        assert_eq!(store.read(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fs_concurrent_creates_single_winner() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FsArtifactStore::new(temp.path()));
        let key = ArtifactKey::new(&run(), ArtifactKind::Marker);

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let store = Arc::clone(&store);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store.create_if_absent(&key, vec![i]).await.unwrap()
            }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() == CreateOutcome::Created {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_fs_update_serializes_writers() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FsArtifactStore::new(temp.path()));
        let key = ArtifactKey::new(&run(), ArtifactKind::Result);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = Arc::clone(&store);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update(
                        &key,
                        Box::new(|current| {
                            let n: u32 = current
                                .map(|b| String::from_utf8_lossy(&b).parse().unwrap_or(0))
                                .unwrap_or(0);
                            Ok((n + 1).to_string().into_bytes())
                        }),
                    )
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.read(&key).await.unwrap(), Some(b"10".to_vec()));
    }

    #[tokio::test]
    async fn test_fs_list_runs_sorted_and_filtered() {
        let temp = TempDir::new().unwrap();
        let store = FsArtifactStore::new(temp.path());

        let late = RunRef::new("bakery", "20261016T120000Z-0a1b2c3d".parse().unwrap());
        let early = RunRef::new("bakery", "20261015T000000Z-ffffffff".parse().unwrap());
        for run in [&late, &early] {
            store
                .create_if_absent(&ArtifactKey::new(run, ArtifactKind::Marker), Vec::new())
                .await
                .unwrap();
        }
        std::fs::create_dir_all(temp.path().join("bakery/not-a-run")).unwrap();

        let runs = store.list_runs("bakery").await.unwrap();
        assert_eq!(runs, vec![early.run_id, late.run_id]);
        assert_eq!(store.list_blogs().await.unwrap(), vec!["bakery".to_string()]);
        assert!(store.list_runs("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fs_list_runs_ignores_run_dir_without_marker() {
        let temp = TempDir::new().unwrap();
        let store = FsArtifactStore::new(temp.path());

        let scheduled = RunRef::new("bakery", "20261016T000000Z-0a1b2c3d".parse().unwrap());
        store
            .create_if_absent(&ArtifactKey::new(&scheduled, ArtifactKind::Marker), Vec::new())
            .await
            .unwrap();

        // Left behind by a marker create that failed after mkdir
        std::fs::create_dir_all(temp.path().join("bakery/20261016T120000Z-ffffffff")).unwrap();

        assert_eq!(
            store.list_runs("bakery").await.unwrap(),
            vec![scheduled.run_id]
        );
    }

    #[tokio::test]
    async fn test_memory_store_semantics() {
        let store = MemoryArtifactStore::new();
        let key = ArtifactKey::new(&run(), ArtifactKind::Marker);

        assert_eq!(
            store.create_if_absent(&key, Vec::new()).await.unwrap(),
            CreateOutcome::Created
        );
        assert_eq!(
            store.create_if_absent(&key, Vec::new()).await.unwrap(),
            CreateOutcome::AlreadyExists
        );
        assert_eq!(store.list_runs("bakery").await.unwrap().len(), 1);
        assert_eq!(store.keys().await.len(), 1);
    }
}
