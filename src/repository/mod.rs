//! Repository layer: the only code that talks to the database

pub mod authors;
pub mod binary_files;
pub mod book_groups;
pub mod books;
pub mod genres;
pub mod unit_of_work;
pub mod users;

use sqlx::{PgConnection, Pool, Postgres};

use crate::error::{AppError, AppResult};

pub use unit_of_work::{cancellable, UnitOfWork};

/// Main repository struct holding database connection pool
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
    pub books: books::BooksRepository,
    pub authors: authors::AuthorsRepository,
    pub genres: genres::GenresRepository,
    pub book_groups: book_groups::BookGroupsRepository,
    pub binary_files: binary_files::BinaryFilesRepository,
    pub users: users::UsersRepository,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            books: books::BooksRepository::new(pool.clone()),
            authors: authors::AuthorsRepository::new(pool.clone()),
            genres: genres::GenresRepository::new(pool.clone()),
            book_groups: book_groups::BookGroupsRepository::new(pool.clone()),
            binary_files: binary_files::BinaryFilesRepository::new(pool.clone()),
            users: users::UsersRepository::new(pool.clone()),
            pool,
        }
    }

    /// Start a unit of work on a pooled connection
    pub async fn begin(&self) -> AppResult<UnitOfWork> {
        UnitOfWork::begin(&self.pool).await
    }
}

/// Lock a versioned row and compare its version with the one the caller read
pub(crate) async fn check_version(
    conn: &mut PgConnection,
    table: &'static str,
    label: &str,
    id: i32,
    expected: i32,
) -> AppResult<()> {
    let sql = format!("SELECT version FROM {} WHERE id = $1 FOR UPDATE", table);
    let current: Option<i32> = sqlx::query_scalar(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match current {
        None => Err(AppError::NotFound(format!("{} {} not found", label, id))),
        Some(version) if version != expected => Err(AppError::Concurrency(format!(
            "{} {} was modified by someone else (expected version {}, found {})",
            label, id, expected, version
        ))),
        Some(_) => Ok(()),
    }
}

/// Lock a row for deletion, failing with `NotFound` when it is absent
pub(crate) async fn lock_for_delete(
    conn: &mut PgConnection,
    table: &'static str,
    label: &str,
    id: i32,
) -> AppResult<()> {
    let sql = format!("SELECT id FROM {} WHERE id = $1 FOR UPDATE", table);
    sqlx::query_scalar::<_, i32>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound(format!("{} {} not found", label, id)))
}

/// ILIKE pattern matching `term` anywhere, with wildcards in `term` escaped
pub(crate) fn like_pattern(term: Option<&str>) -> Option<String> {
    term.map(str::trim).filter(|t| !t.is_empty()).map(|t| {
        let escaped = t
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        format!("%{}%", escaped)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern() {
        assert_eq!(like_pattern(None), None);
        assert_eq!(like_pattern(Some("  ")), None);
        assert_eq!(like_pattern(Some("war")), Some("%war%".to_string()));
        assert_eq!(like_pattern(Some("100%_")), Some("%100\\%\\_%".to_string()));
    }
}
