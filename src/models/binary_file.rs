//! Binary file metadata model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};

use super::paging::Paging;

/// Metadata row for a stored payload. The payload itself lives in the file store
/// under `storage_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct BinaryFile {
    pub id: i32,
    pub file_name: String,
    pub content_type: String,
    pub size: i64,
    #[serde(skip_serializing)]
    pub storage_key: String,
    /// Hex SHA-256 of the payload
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

/// Binary file query parameters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct BinaryFileQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl BinaryFileQuery {
    pub fn paging(&self) -> Paging {
        Paging::new(self.page, self.per_page)
    }
}

/// Outcome of a storage/metadata consistency pass
#[derive(Debug, Default, Clone, PartialEq, Serialize, ToSchema)]
pub struct ReconcileReport {
    /// Payloads without a metadata row that were removed
    pub removed_orphans: usize,
    /// Ids of metadata rows whose payload is missing
    pub dangling_file_ids: Vec<i32>,
}
