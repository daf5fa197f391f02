//! Filesystem payload store.
//!
//! Layout: `<root>/<first two key chars>/<key>`. Payloads are written to
//! `<root>/.tmp/` and published with a hard link, which never replaces an
//! existing file, so readers only ever see complete payloads.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{FileStore, Payload, StoredObject};
use crate::error::{AppError, AppResult};

const TMP_DIR: &str = ".tmp";
const CHUNK_SIZE: usize = 64 * 1024;

static KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-f]{32}(\.[a-z0-9]{1,10})?$").expect("valid key pattern"));

/// Payload store rooted in a local directory
#[derive(Debug, Clone)]
pub struct LocalFileService {
    root: PathBuf,
    max_size: u64,
}

impl LocalFileService {
    pub fn new(root: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            root: root.into(),
            max_size,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of a payload, or None when the key could not have been issued
    fn path_for(&self, storage_key: &str) -> Option<PathBuf> {
        if !KEY_RE.is_match(storage_key) {
            return None;
        }
        Some(self.root.join(&storage_key[..2]).join(storage_key))
    }

    async fn write_payload(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        tmp_path: &Path,
        cancel: &CancellationToken,
    ) -> AppResult<(u64, String)> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(tmp_path)
            .await
            .map_err(|e| storage_error("create temp file", tmp_path, e))?;

        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                read = reader.read(&mut buf) => read
                    .map_err(|e| AppError::Storage(format!("Failed to read upload: {}", e)))?,
            };
            if read == 0 {
                break;
            }
            size += read as u64;
            if size > self.max_size {
                return Err(AppError::Validation(format!(
                    "File exceeds the maximum size of {} bytes",
                    self.max_size
                )));
            }
            hasher.update(&buf[..read]);
            file.write_all(&buf[..read])
                .await
                .map_err(|e| storage_error("write", tmp_path, e))?;
        }

        file.flush()
            .await
            .map_err(|e| storage_error("flush", tmp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| storage_error("sync", tmp_path, e))?;

        Ok((size, hex::encode(hasher.finalize())))
    }

    async fn publish(&self, tmp_path: &Path, storage_key: &str) -> AppResult<()> {
        let final_path = self
            .path_for(storage_key)
            .ok_or_else(|| AppError::Internal(format!("Generated invalid storage key {}", storage_key)))?;
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error("create directory", parent, e))?;
        }
        fs::hard_link(tmp_path, &final_path)
            .await
            .map_err(|e| storage_error("publish", &final_path, e))?;
        let _ = fs::remove_file(tmp_path).await;
        Ok(())
    }
}

#[async_trait]
impl FileStore for LocalFileService {
    async fn store(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        suggested_name: &str,
        cancel: &CancellationToken,
    ) -> AppResult<StoredObject> {
        let storage_key = generate_key(suggested_name);
        let tmp_dir = self.root.join(TMP_DIR);
        fs::create_dir_all(&tmp_dir)
            .await
            .map_err(|e| storage_error("create directory", &tmp_dir, e))?;
        let tmp_path = tmp_dir.join(format!("{}.part", storage_key));

        let written = match self.write_payload(reader, &tmp_path, cancel).await {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(e);
            }
        };
        if let Err(e) = self.publish(&tmp_path, &storage_key).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        let (size, sha256) = written;
        tracing::debug!("Stored payload {} ({} bytes)", storage_key, size);
        Ok(StoredObject {
            storage_key,
            size,
            sha256,
        })
    }

    async fn retrieve(&self, storage_key: &str, cancel: &CancellationToken) -> AppResult<Payload> {
        let path = self
            .path_for(storage_key)
            .ok_or_else(|| AppError::NotFound("File content not found".to_string()))?;

        let file = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            opened = fs::File::open(&path) => opened,
        };
        let file = match file {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AppError::NotFound("File content not found".to_string()))
            }
            Err(e) => return Err(storage_error("open", &path, e)),
        };
        let size = file
            .metadata()
            .await
            .map_err(|e| storage_error("stat", &path, e))?
            .len();

        Ok(Payload {
            reader: Box::pin(file),
            size,
        })
    }

    async fn delete(&self, storage_key: &str) -> AppResult<()> {
        let Some(path) = self.path_for(storage_key) else {
            return Ok(());
        };
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!("Deleted payload {}", storage_key);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("delete", &path, e)),
        }
    }

    async fn list_keys(&self) -> AppResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut shards = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(storage_error("list", &self.root, e)),
        };

        while let Some(shard) = shards
            .next_entry()
            .await
            .map_err(|e| storage_error("list", &self.root, e))?
        {
            let shard_name = shard.file_name().to_string_lossy().into_owned();
            if shard_name == TMP_DIR || shard_name.len() != 2 {
                continue;
            }
            let shard_path = shard.path();
            if !shard_path.is_dir() {
                continue;
            }
            let mut entries = fs::read_dir(&shard_path)
                .await
                .map_err(|e| storage_error("list", &shard_path, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| storage_error("list", &shard_path, e))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                if KEY_RE.is_match(&name) && name.starts_with(&shard_name) {
                    keys.push(name);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn stored_at(&self, storage_key: &str) -> AppResult<Option<SystemTime>> {
        let Some(path) = self.path_for(storage_key) else {
            return Ok(None);
        };
        match fs::metadata(&path).await {
            Ok(meta) => meta
                .modified()
                .map(Some)
                .map_err(|e| storage_error("stat", &path, e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error("stat", &path, e)),
        }
    }
}

/// New random key carrying the sanitized extension of `suggested_name`
fn generate_key(suggested_name: &str) -> String {
    let extension = Path::new(suggested_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        });

    let id = Uuid::new_v4().simple().to_string();
    match extension {
        Some(ext) => format!("{}.{}", id, ext),
        None => id,
    }
}

fn storage_error(action: &str, path: &Path, e: std::io::Error) -> AppError {
    AppError::Storage(format!("Failed to {} {}: {}", action, path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;

    fn service(dir: &tempfile::TempDir) -> LocalFileService {
        LocalFileService::new(dir.path(), 1024 * 1024)
    }

    async fn read_all(payload: Payload) -> Vec<u8> {
        let mut reader = payload.reader;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.unwrap();
        data
    }

    async fn tmp_entries(dir: &tempfile::TempDir) -> usize {
        let mut count = 0;
        if let Ok(mut entries) = fs::read_dir(dir.path().join(TMP_DIR)).await {
            while entries.next_entry().await.unwrap().is_some() {
                count += 1;
            }
        }
        count
    }

    #[test]
    fn test_generate_key_keeps_safe_extension() {
        let key = generate_key("Cover Image.JPG");
        assert!(KEY_RE.is_match(&key));
        assert!(key.ends_with(".jpg"));

        assert!(!generate_key("../../etc/passwd").contains('.'));
        assert!(!generate_key("archive.tar.g$z").contains('$'));
    }

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let dir = tempfile::tempdir().unwrap();
        let files = service(&dir);
        let cancel = CancellationToken::new();

        let mut reader: &[u8] = b"hello library";
        let stored = files.store(&mut reader, "note.txt", &cancel).await.unwrap();

        assert_eq!(stored.size, 13);
        assert_eq!(stored.sha256, hex::encode(Sha256::digest(b"hello library")));
        assert!(stored.storage_key.ends_with(".txt"));

        let payload = files.retrieve(&stored.storage_key, &cancel).await.unwrap();
        assert_eq!(payload.size, 13);
        assert_eq!(read_all(payload).await, b"hello library");
        assert_eq!(tmp_entries(&dir).await, 0);
        assert!(files.stored_at(&stored.storage_key).await.unwrap().is_some());
        assert_eq!(files.list_keys().await.unwrap(), vec![stored.storage_key]);
    }

    #[tokio::test]
    async fn test_unknown_key_not_found_and_delete_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let files = service(&dir);
        let cancel = CancellationToken::new();
        let never_issued = generate_key("x.pdf");

        assert!(matches!(
            files.retrieve(&never_issued, &cancel).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            files.retrieve("../config/default.toml", &cancel).await,
            Err(AppError::NotFound(_))
        ));
        files.delete(&never_issued).await.unwrap();
        files.delete("../../outside").await.unwrap();
        assert_eq!(files.stored_at(&never_issued).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_removes_payload() {
        let dir = tempfile::tempdir().unwrap();
        let files = service(&dir);
        let cancel = CancellationToken::new();

        let mut reader: &[u8] = b"temporary";
        let stored = files.store(&mut reader, "a.bin", &cancel).await.unwrap();
        files.delete(&stored.storage_key).await.unwrap();
        files.delete(&stored.storage_key).await.unwrap();

        assert!(matches!(
            files.retrieve(&stored.storage_key, &cancel).await,
            Err(AppError::NotFound(_))
        ));
        assert!(files.list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_stores_get_distinct_keys() {
        let dir = tempfile::tempdir().unwrap();
        let files = service(&dir);

        let mut handles = Vec::new();
        for i in 0..16u8 {
            let files = files.clone();
            handles.push(tokio::spawn(async move {
                let data = vec![i; 100];
                let mut reader: &[u8] = &data;
                files
                    .store(&mut reader, "same-name.dat", &CancellationToken::new())
                    .await
                    .unwrap()
            }));
        }

        let mut keys = HashSet::new();
        for handle in handles {
            keys.insert(handle.await.unwrap().storage_key);
        }
        assert_eq!(keys.len(), 16);
        assert_eq!(files.list_keys().await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let files = service(&dir);

        let mut reader = tokio_test::io::Builder::new()
            .read(b"partial data")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "client went away"))
            .build();
        let result = files.store(&mut reader, "broken.pdf", &CancellationToken::new()).await;

        assert!(matches!(result, Err(AppError::Storage(_))));
        assert!(files.list_keys().await.unwrap().is_empty());
        assert_eq!(tmp_entries(&dir).await, 0);
    }

    #[tokio::test]
    async fn test_oversized_upload_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let files = LocalFileService::new(dir.path(), 8);

        let mut reader: &[u8] = b"more than eight bytes";
        let result = files.store(&mut reader, "big.txt", &CancellationToken::new()).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(files.list_keys().await.unwrap().is_empty());
        assert_eq!(tmp_entries(&dir).await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_store_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let files = service(&dir);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut reader: &[u8] = b"never stored";
        let result = files.store(&mut reader, "c.txt", &cancel).await;

        assert!(matches!(result, Err(AppError::Cancelled)));
        assert!(files.list_keys().await.unwrap().is_empty());
        assert_eq!(tmp_entries(&dir).await, 0);
    }
}
