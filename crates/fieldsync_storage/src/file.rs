//! File-based key/value store for persistent queues.

use crate::backend::{Entry, KeyValueStore};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Entry file magic.
const MAGIC: &[u8; 4] = b"FSKV";
/// Magic, little-endian revision and little-endian key length.
const HEADER_LEN: usize = 16;

const ENTRY_EXT: &str = "entry";

/// A file-based key/value store.
///
/// Every key lives in its own file under one directory. Data survives
/// process restarts. File names are the hex SHA-256 of the key, so keys of
/// any length and content map to short, portable names; the key itself is
/// kept in the entry header.
///
/// # File Layout
///
/// ```text
/// <dir>/<sha256(key)>.entry   "FSKV" | revision (u64 LE) | key len (u32 LE) | key | value
/// <dir>/<sha256(key)>.lock    advisory lock, empty
/// ```
///
/// # Durability
///
/// A write goes to a temporary file, is synced, and is then renamed over
/// the entry file, so readers see either the old or the new value.
///
/// # Multi-process Safety
///
/// The revision check and the rename run under an exclusive advisory lock
/// on the key's `.lock` file. A foreground application and a background
/// process sharing the directory therefore serialize their writes and the
/// loser of a race gets [`StorageError::RevisionConflict`].
///
/// # Example
///
/// ```no_run
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use fieldsync_storage::{FileStore, KeyValueStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("queues")).unwrap();
/// let revision = store.put("offline-queue:J1", b"[]".to_vec(), 0).await.unwrap();
/// assert_eq!(revision, 1);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Returns the directory holding the entry files.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn stem(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    fn entry_path(dir: &Path, key: &str) -> PathBuf {
        dir.join(format!("{}.{ENTRY_EXT}", Self::stem(key)))
    }

    fn read_entry(path: &Path, key: &str) -> StorageResult<Option<Entry>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (stored, entry) = decode_entry(&bytes)?;
        if stored != key {
            return Err(StorageError::Corrupted(format!(
                "entry for {key:?} holds key {stored:?}"
            )));
        }
        Ok(Some(entry))
    }

    fn put_blocking(
        dir: &Path,
        key: &str,
        value: &[u8],
        expected_revision: u64,
    ) -> StorageResult<u64> {
        let stem = Self::stem(key);
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(dir.join(format!("{stem}.lock")))?;
        // Released when `lock` is dropped.
        FileExt::lock_exclusive(&lock)?;

        let path = Self::entry_path(dir, key);
        let actual = Self::read_entry(&path, key)?.map_or(0, |e| e.revision);
        if actual != expected_revision {
            return Err(StorageError::RevisionConflict {
                key: key.to_string(),
                expected: expected_revision,
                actual,
            });
        }

        let revision = actual + 1;
        let tmp = dir.join(format!("{stem}.tmp"));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(MAGIC)?;
            file.write_all(&revision.to_le_bytes())?;
            file.write_all(&key_len(key)?.to_le_bytes())?;
            file.write_all(key.as_bytes())?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        // Directory fsync is not supported everywhere.
        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }

        Ok(revision)
    }

    fn keys_blocking(dir: &Path, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for dirent in fs::read_dir(dir)? {
            let path = dirent?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                // Replaced by a concurrent rename between listing and reading.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let (key, _) = decode_entry(&bytes)?;
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn key_len(key: &str) -> StorageResult<u32> {
    u32::try_from(key.len()).map_err(|_| {
        std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("key of {} bytes is too long", key.len()),
        )
        .into()
    })
}

fn decode_entry(bytes: &[u8]) -> StorageResult<(String, Entry)> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(StorageError::Corrupted("entry header missing".into()));
    }
    let mut revision = [0u8; 8];
    revision.copy_from_slice(&bytes[4..12]);
    let mut len = [0u8; 4];
    len.copy_from_slice(&bytes[12..HEADER_LEN]);
    let key_end = HEADER_LEN + u32::from_le_bytes(len) as usize;

    let key = bytes
        .get(HEADER_LEN..key_end)
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .ok_or_else(|| StorageError::Corrupted("entry key truncated".into()))?;
    Ok((
        key.to_string(),
        Entry {
            revision: u64::from_le_bytes(revision),
            value: bytes[key_end..].to_vec(),
        },
    ))
}

async fn blocking<T, F>(f: F) -> StorageResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StorageResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Unavailable(format!("storage task failed: {e}")))?
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Entry>> {
        let path = Self::entry_path(&self.dir, key);
        let key = key.to_string();
        blocking(move || Self::read_entry(&path, &key)).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, expected_revision: u64) -> StorageResult<u64> {
        let dir = self.dir.clone();
        let key = key.to_string();
        blocking(move || Self::put_blocking(&dir, &key, &value, expected_revision)).await
    }

    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let dir = self.dir.clone();
        let prefix = prefix.to_string();
        blocking(move || Self::keys_blocking(&dir, &prefix)).await
    }
}
