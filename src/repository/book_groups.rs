//! Book groups (series) repository

use sqlx::{Pool, Postgres};
use tokio_stream::{Stream, StreamExt};

use super::{check_version, like_pattern, lock_for_delete, UnitOfWork};
use crate::{
    error::{AppError, AppResult},
    models::book_group::{BookGroup, BookGroupQuery},
};

#[derive(Clone)]
pub struct BookGroupsRepository {
    pool: Pool<Postgres>,
}

impl BookGroupsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn find(&self, id: i32) -> AppResult<Option<BookGroup>> {
        let group = sqlx::query_as::<_, BookGroup>("SELECT * FROM book_groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(group)
    }

    pub async fn get_by_id(&self, id: i32) -> AppResult<BookGroup> {
        self.find(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book group {} not found", id)))
    }

    pub fn stream(
        &self,
        query: &BookGroupQuery,
    ) -> impl Stream<Item = AppResult<BookGroup>> + Send + '_ {
        let paging = query.paging();
        sqlx::query_as::<_, BookGroup>(
            r#"
            SELECT * FROM book_groups
            WHERE ($1::text IS NULL OR name ILIKE $1)
            ORDER BY name, id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(like_pattern(query.name.as_deref()))
        .bind(paging.per_page)
        .bind(paging.offset())
        .fetch(&self.pool)
        .map(|row| row.map_err(AppError::from))
    }

    pub async fn list(&self, query: &BookGroupQuery) -> AppResult<(Vec<BookGroup>, i64)> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM book_groups WHERE ($1::text IS NULL OR name ILIKE $1)",
        )
        .bind(like_pattern(query.name.as_deref()))
        .fetch_one(&self.pool)
        .await?;

        let rows = self.stream(query).collect::<AppResult<Vec<_>>>().await?;
        Ok((rows, total))
    }

    pub async fn add(&self, uow: &mut UnitOfWork, group: &BookGroup) -> AppResult<BookGroup> {
        sqlx::query_as::<_, BookGroup>(
            "INSERT INTO book_groups (name, description) VALUES ($1, $2) RETURNING *",
        )
        .bind(&group.name)
        .bind(&group.description)
        .fetch_one(uow.conn())
        .await
        .map_err(|e| {
            AppError::from_constraint(e, AppError::Validation("Invalid book group".to_string()))
        })
    }

    pub async fn update(&self, uow: &mut UnitOfWork, group: &BookGroup) -> AppResult<BookGroup> {
        check_version(uow.conn(), "book_groups", "Book group", group.id, group.version).await?;

        sqlx::query_as::<_, BookGroup>(
            r#"
            UPDATE book_groups
            SET name = $1, description = $2, version = version + 1, updated_at = NOW()
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(&group.name)
        .bind(&group.description)
        .bind(group.id)
        .fetch_one(uow.conn())
        .await
        .map_err(|e| {
            AppError::from_constraint(e, AppError::Validation("Invalid book group".to_string()))
        })
    }

    /// Delete a group. Member books stay in the catalog without a group;
    /// returns how many were detached.
    pub async fn delete(&self, uow: &mut UnitOfWork, id: i32) -> AppResult<u64> {
        lock_for_delete(uow.conn(), "book_groups", "Book group", id).await?;

        let detached = sqlx::query(
            r#"
            UPDATE books
            SET book_group_id = NULL, group_position = NULL,
                version = version + 1, updated_at = NOW()
            WHERE book_group_id = $1
            "#,
        )
        .bind(id)
        .execute(uow.conn())
        .await?
        .rows_affected();

        sqlx::query("DELETE FROM book_groups WHERE id = $1")
            .bind(id)
            .execute(uow.conn())
            .await?;
        Ok(detached)
    }
}
