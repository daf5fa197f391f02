//! Binary file metadata repository

use sqlx::{Pool, Postgres};
use tokio_stream::{Stream, StreamExt};

use super::{lock_for_delete, UnitOfWork};
use crate::{
    error::{AppError, AppResult},
    models::binary_file::{BinaryFile, BinaryFileQuery},
};

#[derive(Clone)]
pub struct BinaryFilesRepository {
    pool: Pool<Postgres>,
}

impl BinaryFilesRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn find(&self, id: i32) -> AppResult<Option<BinaryFile>> {
        let file = sqlx::query_as::<_, BinaryFile>("SELECT * FROM binary_files WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(file)
    }

    pub async fn get_by_id(&self, id: i32) -> AppResult<BinaryFile> {
        self.find(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("File {} not found", id)))
    }

    pub fn stream(
        &self,
        query: &BinaryFileQuery,
    ) -> impl Stream<Item = AppResult<BinaryFile>> + Send + '_ {
        let paging = query.paging();
        sqlx::query_as::<_, BinaryFile>("SELECT * FROM binary_files ORDER BY id LIMIT $1 OFFSET $2")
            .bind(paging.per_page)
            .bind(paging.offset())
            .fetch(&self.pool)
            .map(|row| row.map_err(AppError::from))
    }

    pub async fn list(&self, query: &BinaryFileQuery) -> AppResult<(Vec<BinaryFile>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM binary_files")
            .fetch_one(&self.pool)
            .await?;
        let rows = self.stream(query).collect::<AppResult<Vec<_>>>().await?;
        Ok((rows, total))
    }

    /// Every (id, storage key) pair, for consistency checks
    pub async fn all_keys(&self) -> AppResult<Vec<(i32, String)>> {
        let rows = sqlx::query_as::<_, (i32, String)>(
            "SELECT id, storage_key FROM binary_files ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Id of the book that owns the file, if any
    pub async fn owner(&self, id: i32) -> AppResult<Option<i32>> {
        let owner = sqlx::query_scalar("SELECT id FROM books WHERE binary_file_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(owner)
    }

    pub async fn add(&self, uow: &mut UnitOfWork, file: &BinaryFile) -> AppResult<BinaryFile> {
        sqlx::query_as::<_, BinaryFile>(
            r#"
            INSERT INTO binary_files (file_name, content_type, size, storage_key, sha256)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&file.file_name)
        .bind(&file.content_type)
        .bind(file.size)
        .bind(&file.storage_key)
        .bind(&file.sha256)
        .fetch_one(uow.conn())
        .await
        .map_err(|e| AppError::from_constraint(e, AppError::Validation("Invalid file".to_string())))
    }

    /// Delete a metadata row that no book owns and return it, so the caller can
    /// remove the payload once the unit of work has committed
    pub async fn delete(&self, uow: &mut UnitOfWork, id: i32) -> AppResult<BinaryFile> {
        lock_for_delete(uow.conn(), "binary_files", "File", id).await?;

        let owner: Option<i32> = sqlx::query_scalar("SELECT id FROM books WHERE binary_file_id = $1")
            .bind(id)
            .fetch_optional(uow.conn())
            .await?;
        if let Some(book_id) = owner {
            return Err(AppError::ReferentialIntegrity(format!(
                "File {} is attached to book {}; detach or delete the book first",
                id, book_id
            )));
        }

        Self::remove_row(uow, id).await
    }

    /// Delete a row without the ownership check. Used when the owning book is
    /// deleted or switches to another file in the same unit of work.
    pub(crate) async fn remove_row(uow: &mut UnitOfWork, id: i32) -> AppResult<BinaryFile> {
        sqlx::query_as::<_, BinaryFile>("DELETE FROM binary_files WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(uow.conn())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("File {} not found", id)))
    }
}
