//! Genres repository

use sqlx::{Pool, Postgres};
use tokio_stream::{Stream, StreamExt};

use super::{check_version, like_pattern, lock_for_delete, UnitOfWork};
use crate::{
    error::{AppError, AppResult},
    models::genre::{Genre, GenreQuery},
};

#[derive(Clone)]
pub struct GenresRepository {
    pool: Pool<Postgres>,
}

impl GenresRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get genre by ID, `None` when absent
    pub async fn find(&self, id: i32) -> AppResult<Option<Genre>> {
        let genre = sqlx::query_as::<_, Genre>("SELECT * FROM genres WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(genre)
    }

    /// Get genre by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Genre> {
        self.find(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Genre {} not found", id)))
    }

    /// Lazily stream one page of genres ordered by name then id
    pub fn stream(&self, query: &GenreQuery) -> impl Stream<Item = AppResult<Genre>> + Send + '_ {
        let paging = query.paging();
        sqlx::query_as::<_, Genre>(
            r#"
            SELECT * FROM genres
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

    /// List one page of genres with the total count
    pub async fn list(&self, query: &GenreQuery) -> AppResult<(Vec<Genre>, i64)> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM genres WHERE ($1::text IS NULL OR name ILIKE $1)",
        )
        .bind(like_pattern(query.name.as_deref()))
        .fetch_one(&self.pool)
        .await?;

        let rows = self.stream(query).collect::<AppResult<Vec<_>>>().await?;
        Ok((rows, total))
    }

    /// Insert a genre; id, version and timestamps are generated
    pub async fn add(&self, uow: &mut UnitOfWork, genre: &Genre) -> AppResult<Genre> {
        sqlx::query_as::<_, Genre>(
            "INSERT INTO genres (name, description) VALUES ($1, $2) RETURNING *",
        )
        .bind(&genre.name)
        .bind(&genre.description)
        .fetch_one(uow.conn())
        .await
        .map_err(|e| {
            AppError::from_constraint(e, AppError::Validation("Invalid genre".to_string()))
        })
    }

    /// Update a genre read at `genre.version`
    pub async fn update(&self, uow: &mut UnitOfWork, genre: &Genre) -> AppResult<Genre> {
        check_version(uow.conn(), "genres", "Genre", genre.id, genre.version).await?;

        sqlx::query_as::<_, Genre>(
            r#"
            UPDATE genres
            SET name = $1, description = $2, version = version + 1, updated_at = NOW()
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(&genre.name)
        .bind(&genre.description)
        .bind(genre.id)
        .fetch_one(uow.conn())
        .await
        .map_err(|e| {
            AppError::from_constraint(e, AppError::Validation("Invalid genre".to_string()))
        })
    }

    /// Delete a genre. Genres still used by books are kept.
    pub async fn delete(&self, uow: &mut UnitOfWork, id: i32) -> AppResult<()> {
        lock_for_delete(uow.conn(), "genres", "Genre", id).await?;

        let books: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books WHERE genre_id = $1")
            .bind(id)
            .fetch_one(uow.conn())
            .await?;
        if books > 0 {
            return Err(in_use(id, books));
        }

        sqlx::query("DELETE FROM genres WHERE id = $1")
            .bind(id)
            .execute(uow.conn())
            .await
            .map_err(|e| AppError::from_constraint(e, in_use(id, 1)))?;
        Ok(())
    }
}

fn in_use(id: i32, books: i64) -> AppError {
    AppError::ReferentialIntegrity(format!(
        "Genre {} is used by {} book(s); reassign them before deleting it",
        id, books
    ))
}
