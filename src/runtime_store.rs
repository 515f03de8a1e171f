//! The tree-shaped persistence façade backing every registry (§6)
//!
//! Keys are `/`-separated paths (`certificates/authorities`,
//! `things/v1/<name>/certificates/<id>`); values are opaque bytes. Writes are
//! atomic (write-tmp, fsync, rename) so callers never observe torn state.

use crate::traits::RuntimeStore;
use crate::error::{CdaError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// File-backed [`RuntimeStore`]. One file per key under `base_dir`, with the
/// key's `/` segments mapped onto directory components.
pub struct FileRuntimeStore {
    base_dir: PathBuf,
    /// Serialises writes globally, matching the crash-consistency guarantee
    /// in the concurrency model (§5): `RuntimeStore writes are serialised
    /// globally`.
    write_lock: Arc<RwLock<()>>,
}

impl FileRuntimeStore {
    /// Open (creating if absent) a file-backed runtime store rooted at `base_dir`.
    pub async fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).await?;
        set_dir_permissions(&base_dir).await?;
        Ok(Self {
            base_dir,
            write_lock: Arc::new(RwLock::new(())),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains("..") {
            return Err(CdaError::InvalidArgument(format!(
                "invalid runtime store key: {key:?}"
            )));
        }
        Ok(self.base_dir.join(key))
    }
}

#[async_trait]
impl RuntimeStore for FileRuntimeStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CdaError::Io(e)),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.write().await;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, value).await?;
        set_file_permissions(&tmp_path).await?;
        fs::rename(&tmp_path, &path).await?;

        debug!(key, bytes = value.len(), "persisted runtime store key");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.write().await;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CdaError::Io(e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let root = if prefix.is_empty() {
            self.base_dir.clone()
        } else {
            self.path_for(prefix)?
        };
        let mut out = Vec::new();
        walk(&self.base_dir, &root, &mut out).await;
        out.sort();
        Ok(out)
    }
}

fn walk<'a>(
    base_dir: &'a Path,
    dir: &'a Path,
    out: &'a mut Vec<String>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(_) => return,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("tmp") {
                continue;
            }
            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(_) => continue,
            };
            if file_type.is_dir() {
                walk(base_dir, &path, out).await;
            } else if let Ok(relative) = path.strip_prefix(base_dir) {
                if let Some(key) = relative.to_str() {
                    out.push(key.replace(std::path::MAIN_SEPARATOR, "/"));
                }
            }
        }
    })
}

#[cfg(unix)]
async fn set_dir_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = fs::metadata(path).await?;
    let mut perms = metadata.permissions();
    perms.set_mode(0o700);
    fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_dir_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
async fn set_file_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = fs::metadata(path).await?;
    let mut perms = metadata.permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_file_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// In-memory [`RuntimeStore`], for tests and ephemeral usage.
#[derive(Default)]
pub struct MemoryRuntimeStore {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryRuntimeStore {
    /// Create an empty in-memory runtime store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuntimeStore for MemoryRuntimeStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.data
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let data = self.data.read().await;
        let keys: BTreeMap<&String, &Vec<u8>> =
            data.iter().filter(|(k, _)| k.starts_with(prefix)).collect();
        Ok(keys.keys().map(|k| k.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRuntimeStore::new(dir.path()).await.unwrap();
        store.put("certificates/authorities", b"pem-blob").await.unwrap();
        assert_eq!(
            store.get("certificates/authorities").await.unwrap(),
            Some(b"pem-blob".to_vec())
        );
        assert_eq!(store.get("missing/key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_lists_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRuntimeStore::new(dir.path()).await.unwrap();
        store.put("things/v1/camera-01/certificates/abc", b"1").await.unwrap();
        store.put("things/v1/camera-02/certificates/def", b"1").await.unwrap();
        store.put("certificates/authorities", b"x").await.unwrap();

        let things = store.list("things/v1").await.unwrap();
        assert_eq!(things.len(), 2);
        assert!(things.iter().all(|k| k.starts_with("things/v1")));
    }

    #[tokio::test]
    async fn file_store_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileRuntimeStore::new(dir.path()).await.unwrap();
        store.delete("never/existed").await.unwrap();
        store.put("k", b"v").await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryRuntimeStore::new();
        store.put("ca_passphrase", b"secret").await.unwrap();
        assert_eq!(
            store.get("ca_passphrase").await.unwrap(),
            Some(b"secret".to_vec())
        );
        store.delete("ca_passphrase").await.unwrap();
        assert_eq!(store.get("ca_passphrase").await.unwrap(), None);
    }
}
