//! Authors repository

use std::collections::HashMap;

use sqlx::{FromRow, PgConnection, Pool, Postgres};
use tokio_stream::{Stream, StreamExt};

use super::{check_version, like_pattern, lock_for_delete, UnitOfWork};
use crate::{
    error::{AppError, AppResult},
    models::author::{format_name, Author, AuthorQuery, AuthorRef},
};

const FILTER: &str = "($1::text IS NULL OR last_name ILIKE $1 OR first_name ILIKE $1)";

/// Author joined to the book it is attached to
#[derive(Debug, FromRow)]
struct BookAuthorRow {
    book_id: i32,
    author_id: i32,
    first_name: Option<String>,
    last_name: String,
}

#[derive(Clone)]
pub struct AuthorsRepository {
    pool: Pool<Postgres>,
}

impl AuthorsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn find(&self, id: i32) -> AppResult<Option<Author>> {
        let author = sqlx::query_as::<_, Author>("SELECT * FROM authors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(author)
    }

    /// Get author by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Author> {
        self.find(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Author {} not found", id)))
    }

    /// Lazily stream one page of authors ordered by name then id
    pub fn stream(&self, query: &AuthorQuery) -> impl Stream<Item = AppResult<Author>> + Send + '_ {
        let paging = query.paging();
        sqlx::query_as::<_, Author>(
            r#"
            SELECT * FROM authors
            WHERE ($1::text IS NULL OR last_name ILIKE $1 OR first_name ILIKE $1)
            ORDER BY last_name, first_name NULLS FIRST, id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(like_pattern(query.name.as_deref()))
        .bind(paging.per_page)
        .bind(paging.offset())
        .fetch(&self.pool)
        .map(|row| row.map_err(AppError::from))
    }

    pub async fn list(&self, query: &AuthorQuery) -> AppResult<(Vec<Author>, i64)> {
        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM authors WHERE {}", FILTER))
            .bind(like_pattern(query.name.as_deref()))
            .fetch_one(&self.pool)
            .await?;

        let rows = self.stream(query).collect::<AppResult<Vec<_>>>().await?;
        Ok((rows, total))
    }

    /// Authors of each book, in book order
    pub async fn refs_for_books(&self, book_ids: &[i32]) -> AppResult<HashMap<i32, Vec<AuthorRef>>> {
        let rows = sqlx::query_as::<_, BookAuthorRow>(
            r#"
            SELECT ba.book_id, a.id AS author_id, a.first_name, a.last_name
            FROM book_authors ba
            JOIN authors a ON a.id = ba.author_id
            WHERE ba.book_id = ANY($1)
            ORDER BY ba.book_id, ba.position, a.id
            "#,
        )
        .bind(book_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_book: HashMap<i32, Vec<AuthorRef>> = HashMap::new();
        for row in rows {
            by_book.entry(row.book_id).or_default().push(AuthorRef {
                id: row.author_id,
                name: format_name(row.first_name.as_deref(), &row.last_name),
            });
        }
        Ok(by_book)
    }

    /// Ids among `ids` that have no author row, locking the ones that do
    /// against deletion until the unit of work ends
    pub(crate) async fn missing_ids(conn: &mut PgConnection, ids: &[i32]) -> AppResult<Vec<i32>> {
        let found: Vec<i32> =
            sqlx::query_scalar("SELECT id FROM authors WHERE id = ANY($1) FOR KEY SHARE")
                .bind(ids)
                .fetch_all(&mut *conn)
                .await?;
        Ok(ids.iter().copied().filter(|id| !found.contains(id)).collect())
    }

    /// Insert an author; id, version and timestamps are generated
    pub async fn add(&self, uow: &mut UnitOfWork, author: &Author) -> AppResult<Author> {
        let row = sqlx::query_as::<_, Author>(
            "INSERT INTO authors (first_name, last_name, bio) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(&author.first_name)
        .bind(&author.last_name)
        .bind(&author.bio)
        .fetch_one(uow.conn())
        .await?;
        Ok(row)
    }

    /// Update an author read at `author.version`
    pub async fn update(&self, uow: &mut UnitOfWork, author: &Author) -> AppResult<Author> {
        check_version(uow.conn(), "authors", "Author", author.id, author.version).await?;

        let row = sqlx::query_as::<_, Author>(
            r#"
            UPDATE authors
            SET first_name = $1, last_name = $2, bio = $3, version = version + 1, updated_at = NOW()
            WHERE id = $4
            RETURNING *
            "#,
        )
        .bind(&author.first_name)
        .bind(&author.last_name)
        .bind(&author.bio)
        .bind(author.id)
        .fetch_one(uow.conn())
        .await?;
        Ok(row)
    }

    /// Delete an author. Authors still credited on a book are kept.
    pub async fn delete(&self, uow: &mut UnitOfWork, id: i32) -> AppResult<()> {
        lock_for_delete(uow.conn(), "authors", "Author", id).await?;

        let books: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM book_authors WHERE author_id = $1")
                .bind(id)
                .fetch_one(uow.conn())
                .await?;
        if books > 0 {
            return Err(in_use(id, books));
        }

        sqlx::query("DELETE FROM authors WHERE id = $1")
            .bind(id)
            .execute(uow.conn())
            .await
            .map_err(|e| AppError::from_constraint(e, in_use(id, 1)))?;
        Ok(())
    }
}

fn in_use(id: i32, books: i64) -> AppError {
    AppError::ReferentialIntegrity(format!(
        "Author {} is credited on {} book(s); remove them from those books first",
        id, books
    ))
}
