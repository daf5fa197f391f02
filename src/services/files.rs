//! File service: keeps metadata rows and stored payloads consistent.
//!
//! Uploads store the payload first and insert the row afterwards, so a reader
//! never sees a row without a payload. Deletes commit the row removal first
//! and drop the payload afterwards; if that last step fails the payload is
//! leaked (and later swept by `reconcile`), never left dangling.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tokio::io::AsyncRead;

use crate::{
    context::RequestContext,
    error::{AppError, AppResult},
    models::binary_file::{BinaryFile, BinaryFileQuery, ReconcileReport},
    repository::{cancellable, Repository},
    storage::{FileStore, Payload, StoredObject},
};

/// Payloads younger than this may belong to an upload whose row is not
/// committed yet, so `reconcile` leaves them alone
const ORPHAN_GRACE: Duration = Duration::from_secs(15 * 60);

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Clone)]
pub struct FilesService {
    repository: Repository,
    store: Arc<dyn FileStore>,
}

impl FilesService {
    pub fn new(repository: Repository, store: Arc<dyn FileStore>) -> Self {
        Self { repository, store }
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        query: &BinaryFileQuery,
    ) -> AppResult<(Vec<BinaryFile>, i64)> {
        cancellable(&ctx.cancel, self.repository.binary_files.list(query)).await
    }

    pub async fn get_by_id(&self, ctx: &RequestContext, id: i32) -> AppResult<BinaryFile> {
        cancellable(&ctx.cancel, self.repository.binary_files.get_by_id(id)).await
    }

    /// Store an uploaded payload and record its metadata
    pub async fn upload(
        &self,
        ctx: &RequestContext,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        file_name: &str,
        content_type: Option<&str>,
    ) -> AppResult<BinaryFile> {
        let file_name = clean_file_name(file_name);
        let stored = self.store.store(reader, &file_name, &ctx.cancel).await?;

        let file = BinaryFile {
            id: 0,
            file_name,
            content_type: content_type
                .map(str::trim)
                .filter(|ct| !ct.is_empty())
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string(),
            size: stored.size as i64,
            storage_key: stored.storage_key.clone(),
            sha256: stored.sha256.clone(),
            created_at: Utc::now(),
        };

        let recorded = cancellable(&ctx.cancel, async {
            let mut uow = self.repository.begin().await?;
            let created = self.repository.binary_files.add(&mut uow, &file).await?;
            uow.commit().await?;
            Ok(created)
        })
        .await;

        match recorded {
            Ok(created) => {
                tracing::info!("Stored file {} '{}' ({} bytes)", created.id, created.file_name, created.size);
                Ok(created)
            }
            Err(e) => {
                self.abandon(&stored).await;
                Err(e)
            }
        }
    }

    /// Metadata and an open reader for the payload
    pub async fn open(&self, ctx: &RequestContext, id: i32) -> AppResult<(BinaryFile, Payload)> {
        let file = self.get_by_id(ctx, id).await?;
        match self.store.retrieve(&file.storage_key, &ctx.cancel).await {
            Ok(payload) => Ok((file, payload)),
            Err(AppError::NotFound(_)) => {
                tracing::warn!("File {} has no payload under {}", file.id, file.storage_key);
                Err(AppError::NotFound(format!("Content of file {} is missing", id)))
            }
            Err(e) => Err(e),
        }
    }

    /// Delete a file that no book owns
    pub async fn delete(&self, ctx: &RequestContext, id: i32) -> AppResult<()> {
        let removed = cancellable(&ctx.cancel, async {
            let mut uow = self.repository.begin().await?;
            let removed = self.repository.binary_files.delete(&mut uow, id).await?;
            uow.commit().await?;
            Ok(removed)
        })
        .await?;

        self.release(&removed).await;
        Ok(())
    }

    /// Remove the payload of a row that was deleted and committed. Failure
    /// only leaks space, so it is logged rather than returned.
    pub(crate) async fn release(&self, file: &BinaryFile) {
        match self.store.delete(&file.storage_key).await {
            Ok(()) => tracing::info!("Deleted file {} '{}'", file.id, file.file_name),
            Err(e) => tracing::warn!(
                "File {} removed but its payload {} was leaked: {}",
                file.id,
                file.storage_key,
                e
            ),
        }
    }

    /// Undo a store whose row never got committed
    async fn abandon(&self, stored: &StoredObject) {
        if let Err(e) = self.store.delete(&stored.storage_key).await {
            tracing::warn!("Could not remove abandoned payload {}: {}", stored.storage_key, e);
        }
    }

    /// Remove payloads that have no row and report rows whose payload is gone
    pub async fn reconcile(&self, ctx: &RequestContext) -> AppResult<ReconcileReport> {
        let rows = cancellable(&ctx.cancel, self.repository.binary_files.all_keys()).await?;
        let stored: HashSet<String> = self.store.list_keys().await?.into_iter().collect();
        let known: HashSet<&str> = rows.iter().map(|(_, key)| key.as_str()).collect();

        let mut report = ReconcileReport::default();
        let now = SystemTime::now();
        for key in stored.iter().filter(|key| !known.contains(key.as_str())) {
            if ctx.cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            let fresh = match self.store.stored_at(key).await? {
                Some(at) => now.duration_since(at).unwrap_or_default() < ORPHAN_GRACE,
                None => continue,
            };
            if fresh {
                continue;
            }
            self.store.delete(key).await?;
            report.removed_orphans += 1;
        }

        report.dangling_file_ids = rows
            .iter()
            .filter(|(_, key)| !stored.contains(key))
            .map(|(id, _)| *id)
            .collect();

        if report.removed_orphans > 0 || !report.dangling_file_ids.is_empty() {
            tracing::warn!(
                "Reconcile removed {} orphan payload(s); {} file(s) lack a payload: {:?}",
                report.removed_orphans,
                report.dangling_file_ids.len(),
                report.dangling_file_ids
            );
        }
        Ok(report)
    }
}

/// Last path component of a client-supplied name, never empty
fn clean_file_name(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    if base.is_empty() || base == "." || base == ".." {
        "file".to_string()
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_file_name() {
        assert_eq!(clean_file_name("C:\\Users\\me\\cover.png"), "cover.png");
        assert_eq!(clean_file_name("../../etc/passwd"), "passwd");
        assert_eq!(clean_file_name("  "), "file");
        assert_eq!(clean_file_name("a/.."), "file");
        assert_eq!(clean_file_name("war\nand peace.pdf"), "warand peace.pdf");
    }
}
