//! Artifact persistence
//!
//! [`StorageProvider`] is the single contract the scheduler writes through.
//! [`StorageBackend`] is the closed set of shipped variants; its
//! [`StorageBackend::from_config`] factory maps the `provider` discriminator
//! to a variant and rejects unknown names before any capture starts.

use crate::config::{OutputConfig, StorageConfig};
use crate::error::{PageSnapError, Result};
use crate::object_store::ObjectStoreStorage;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Persist `data` under `file_name` and return the backend-specific locator.
    async fn save(&self, file_name: &str, data: Vec<u8>) -> Result<String>;

    /// Drop expired artifacts.
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// Shipped storage variants
pub enum StorageBackend {
    FileSystem(FileSystemStorage),
    InMemory(InMemoryStorage),
    ObjectStore(ObjectStoreStorage),
}

impl StorageBackend {
    /// Select and construct the variant named by `output.storage.provider`.
    pub fn from_config(output: &OutputConfig) -> Result<Self> {
        let storage = &output.storage;
        let backend = match storage.provider.as_str() {
            "filesystem" => StorageBackend::FileSystem(FileSystemStorage::from_config(output)?),
            "in-memory" => StorageBackend::InMemory(InMemoryStorage::from_config(storage)?),
            "s3" => StorageBackend::ObjectStore(ObjectStoreStorage::from_config(storage)?),
            other => {
                return Err(PageSnapError::Configuration(format!(
                    "unknown storage provider '{other}' (expected filesystem, in-memory or s3)"
                )))
            }
        };

        info!("Storage provider: {}", backend.provider_name());
        Ok(backend)
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            StorageBackend::FileSystem(_) => "filesystem",
            StorageBackend::InMemory(_) => "in-memory",
            StorageBackend::ObjectStore(_) => "s3",
        }
    }

    /// Read-back access for the in-memory variant
    pub fn as_in_memory(&self) -> Option<&InMemoryStorage> {
        match self {
            StorageBackend::InMemory(storage) => Some(storage),
            _ => None,
        }
    }
}

#[async_trait]
impl StorageProvider for StorageBackend {
    async fn save(&self, file_name: &str, data: Vec<u8>) -> Result<String> {
        match self {
            StorageBackend::FileSystem(storage) => storage.save(file_name, data).await,
            StorageBackend::InMemory(storage) => storage.save(file_name, data).await,
            StorageBackend::ObjectStore(storage) => storage.save(file_name, data).await,
        }
    }

    async fn cleanup(&self) -> Result<()> {
        match self {
            StorageBackend::FileSystem(storage) => storage.cleanup().await,
            StorageBackend::InMemory(storage) => storage.cleanup().await,
            StorageBackend::ObjectStore(storage) => storage.cleanup().await,
        }
    }
}

/// Writes artifacts below a root directory
pub struct FileSystemStorage {
    root: PathBuf,
    overwrite: bool,
    ttl: Option<Duration>,
}

impl FileSystemStorage {
    pub fn new(root: impl Into<PathBuf>, overwrite: bool) -> Self {
        Self {
            root: root.into(),
            overwrite,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Root is `storage.location` (or `output.location`) resolved against the working directory.
    pub fn from_config(output: &OutputConfig) -> Result<Self> {
        let location = output
            .storage
            .location
            .as_deref()
            .unwrap_or(&output.location);
        let root = std::env::current_dir()?.join(location);

        Ok(Self::new(root, output.storage.overwrite)
            .with_ttl(output.storage.ttl.map(Duration::from_secs)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl StorageProvider for FileSystemStorage {
    async fn save(&self, file_name: &str, data: Vec<u8>) -> Result<String> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            PageSnapError::Storage(format!("cannot create {}: {e}", self.root.display()))
        })?;

        let path = self.root.join(file_name);
        let locator = path.display().to_string();

        let write_failed =
            |e: std::io::Error| PageSnapError::Storage(format!("cannot write {locator}: {e}"));

        if self.overwrite {
            tokio::fs::write(&path, &data).await.map_err(write_failed)?;
        } else {
            // Existence check and creation are one step, so concurrent saves
            // of the same name cannot both write.
            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    warn!("{} already exists, skipping write", locator);
                    return Ok(locator);
                }
                Err(e) => return Err(write_failed(e)),
            };
            file.write_all(&data).await.map_err(write_failed)?;
            file.flush().await.map_err(write_failed)?;
        }

        debug!("Wrote {} bytes to {}", data.len(), locator);
        Ok(locator)
    }

    async fn cleanup(&self) -> Result<()> {
        let Some(ttl) = self.ttl else {
            info!("Cleanup skipped: no TTL configured for filesystem storage");
            return Ok(());
        };

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(PageSnapError::Storage(e.to_string())),
        };

        let now = SystemTime::now();
        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            let expired = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .map(|age| age >= ttl)
                .unwrap_or(false);

            if expired {
                debug!("Removing expired artifact {}", entry.path().display());
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }

        info!("Filesystem cleanup removed {} artifact(s)", removed);
        Ok(())
    }
}

struct CachedArtifact {
    data: Vec<u8>,
    stored_at: Instant,
}

/// Bounded least-recently-used artifact cache
pub struct InMemoryStorage {
    ttl: Option<Duration>,
    entries: Mutex<LruCache<String, CachedArtifact>>,
}

impl InMemoryStorage {
    pub const DEFAULT_MAX_ITEMS: usize = 256;

    pub fn new(max_items: usize) -> Self {
        let capacity = NonZeroUsize::new(max_items).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl: None,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn from_config(storage: &StorageConfig) -> Result<Self> {
        if storage.max_items == 0 {
            return Err(PageSnapError::Configuration(
                "output.storage.maxItems must be greater than 0".to_string(),
            ));
        }
        Ok(Self::new(storage.max_items).with_ttl(storage.ttl.map(Duration::from_secs)))
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<String, CachedArtifact>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn is_expired(&self, artifact: &CachedArtifact) -> bool {
        self.ttl
            .map(|ttl| artifact.stored_at.elapsed() >= ttl)
            .unwrap_or(false)
    }

    /// Bytes stored under `file_name`, marking it most recently used.
    pub fn get(&self, file_name: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries();

        let expired = self.is_expired(entries.peek(file_name)?);
        if expired {
            entries.pop(file_name);
            return None;
        }

        entries.get(file_name).map(|artifact| artifact.data.clone())
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.entries().contains(file_name)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageProvider for InMemoryStorage {
    async fn save(&self, file_name: &str, data: Vec<u8>) -> Result<String> {
        let artifact = CachedArtifact {
            data,
            stored_at: Instant::now(),
        };

        // `push` hands back the old value on a re-save, or the evicted entry
        if let Some((evicted, _)) = self.entries().push(file_name.to_string(), artifact) {
            if evicted != file_name {
                debug!("Evicted {} from in-memory storage", evicted);
            }
        }

        Ok(format!("in-memory://{file_name}"))
    }

    async fn cleanup(&self) -> Result<()> {
        if self.ttl.is_none() {
            return Ok(());
        }

        let mut entries = self.entries();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, artifact)| self.is_expired(artifact))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
        }

        info!("In-memory cleanup removed {} artifact(s)", expired.len());
        Ok(())
    }
}
