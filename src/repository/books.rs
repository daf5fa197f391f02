//! Books repository
//!
//! A book row owns its author associations and, optionally, one stored file.
//! Author associations are loaded explicitly and reconciled by key on update
//! so that unchanged rows are left alone.

use sqlx::{PgConnection, Pool, Postgres};
use tokio_stream::{Stream, StreamExt};

use super::{
    authors::AuthorsRepository, binary_files::BinaryFilesRepository, check_version,
    like_pattern, lock_for_delete, UnitOfWork,
};
use crate::{
    error::{AppError, AppResult},
    mapper::merge_by_key,
    models::{
        binary_file::BinaryFile,
        book::{Book, BookAuthor, BookQuery},
    },
};

macro_rules! book_filter {
    () => {
        r#"
        ($1::text IS NULL OR title ILIKE $1 OR description ILIKE $1 OR isbn ILIKE $1)
        AND ($2::int IS NULL OR genre_id = $2)
        AND ($3::int IS NULL OR book_group_id = $3)
        AND ($4::int IS NULL OR EXISTS (
            SELECT 1 FROM book_authors ba WHERE ba.book_id = books.id AND ba.author_id = $4
        ))
        "#
    };
}

const COUNT_BOOKS: &str = concat!("SELECT COUNT(*) FROM books WHERE ", book_filter!());
const SELECT_BY_TITLE: &str = concat!(
    "SELECT * FROM books WHERE ",
    book_filter!(),
    " ORDER BY title, id LIMIT $5 OFFSET $6"
);
// Inside a series the reading order wins over the title
const SELECT_BY_GROUP_POSITION: &str = concat!(
    "SELECT * FROM books WHERE ",
    book_filter!(),
    " ORDER BY group_position NULLS LAST, id LIMIT $5 OFFSET $6"
);

#[derive(Clone)]
pub struct BooksRepository {
    pool: Pool<Postgres>,
}

impl BooksRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get a book with its author associations, `None` when absent
    pub async fn find(&self, id: i32) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match book {
            Some(mut book) => {
                let mut conn = self.pool.acquire().await?;
                book.authors = Self::authors_of(&mut conn, id).await?;
                Ok(Some(book))
            }
            None => Ok(None),
        }
    }

    pub async fn get_by_id(&self, id: i32) -> AppResult<Book> {
        self.find(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book {} not found", id)))
    }

    /// Lazily stream one page of books. Author associations are not loaded.
    pub fn stream(&self, query: &BookQuery) -> impl Stream<Item = AppResult<Book>> + Send + '_ {
        let paging = query.paging();
        let sql = if query.book_group_id.is_some() {
            SELECT_BY_GROUP_POSITION
        } else {
            SELECT_BY_TITLE
        };

        sqlx::query_as::<_, Book>(sql)
            .bind(like_pattern(query.search.as_deref()))
            .bind(query.genre_id)
            .bind(query.book_group_id)
            .bind(query.author_id)
            .bind(paging.per_page)
            .bind(paging.offset())
            .fetch(&self.pool)
            .map(|row| row.map_err(AppError::from))
    }

    pub async fn count(&self, query: &BookQuery) -> AppResult<i64> {
        let total = sqlx::query_scalar(COUNT_BOOKS)
            .bind(like_pattern(query.search.as_deref()))
            .bind(query.genre_id)
            .bind(query.book_group_id)
            .bind(query.author_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }

    /// List one page of books with the total count
    pub async fn list(&self, query: &BookQuery) -> AppResult<(Vec<Book>, i64)> {
        let total = self.count(query).await?;
        let rows = self.stream(query).collect::<AppResult<Vec<_>>>().await?;
        Ok((rows, total))
    }

    async fn authors_of(conn: &mut PgConnection, book_id: i32) -> AppResult<Vec<BookAuthor>> {
        let rows = sqlx::query_as::<_, BookAuthor>(
            "SELECT author_id, position FROM book_authors WHERE book_id = $1 ORDER BY position, author_id",
        )
        .bind(book_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    /// Check that everything the book points at exists, and lock those rows
    /// against deletion until the unit of work ends
    async fn check_references(conn: &mut PgConnection, book: &Book) -> AppResult<()> {
        let genre: Option<i32> =
            sqlx::query_scalar("SELECT id FROM genres WHERE id = $1 FOR KEY SHARE")
                .bind(book.genre_id)
                .fetch_optional(&mut *conn)
                .await?;
        if genre.is_none() {
            return Err(AppError::Validation(format!("Genre {} does not exist", book.genre_id)));
        }

        if let Some(group_id) = book.book_group_id {
            let group: Option<i32> =
                sqlx::query_scalar("SELECT id FROM book_groups WHERE id = $1 FOR KEY SHARE")
                    .bind(group_id)
                    .fetch_optional(&mut *conn)
                    .await?;
            if group.is_none() {
                return Err(AppError::Validation(format!("Book group {} does not exist", group_id)));
            }
        }

        if let Some(file_id) = book.binary_file_id {
            let file: Option<i32> =
                sqlx::query_scalar("SELECT id FROM binary_files WHERE id = $1 FOR KEY SHARE")
                    .bind(file_id)
                    .fetch_optional(&mut *conn)
                    .await?;
            if file.is_none() {
                return Err(AppError::Validation(format!("File {} does not exist", file_id)));
            }

            let owner: Option<i32> = sqlx::query_scalar(
                "SELECT id FROM books WHERE binary_file_id = $1 AND id <> $2",
            )
            .bind(file_id)
            .bind(book.id)
            .fetch_optional(&mut *conn)
            .await?;
            if let Some(owner) = owner {
                return Err(AppError::Validation(format!(
                    "File {} is already attached to book {}",
                    file_id, owner
                )));
            }
        }

        if book.authors.is_empty() {
            return Err(AppError::Validation("A book needs at least one author".to_string()));
        }
        let author_ids: Vec<i32> = book.authors.iter().map(|a| a.author_id).collect();
        let missing = AuthorsRepository::missing_ids(conn, &author_ids).await?;
        if !missing.is_empty() {
            return Err(AppError::Validation(format!("Unknown author id(s): {:?}", missing)));
        }

        Ok(())
    }

    /// Insert a book and its author associations
    pub async fn add(&self, uow: &mut UnitOfWork, book: &Book) -> AppResult<Book> {
        Self::check_references(uow.conn(), book).await?;

        let mut created = sqlx::query_as::<_, Book>(
            r#"
            INSERT INTO books (title, description, isbn, publication_year, language,
                               genre_id, book_group_id, group_position, binary_file_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(&book.title)
        .bind(&book.description)
        .bind(&book.isbn)
        .bind(book.publication_year)
        .bind(&book.language)
        .bind(book.genre_id)
        .bind(book.book_group_id)
        .bind(book.group_position)
        .bind(book.binary_file_id)
        .fetch_one(uow.conn())
        .await
        .map_err(|e| AppError::from_constraint(e, reference_gone()))?;

        for author in &book.authors {
            insert_author(uow.conn(), created.id, author).await?;
        }
        created.authors = Self::authors_of(uow.conn(), created.id).await?;
        Ok(created)
    }

    /// Update a book read at `book.version`.
    ///
    /// Author associations are merged by author id. When the book switches to
    /// another file (or drops it), the previous metadata row is deleted and
    /// returned so the caller can remove the payload after commit.
    pub async fn update(
        &self,
        uow: &mut UnitOfWork,
        book: &Book,
    ) -> AppResult<(Book, Option<BinaryFile>)> {
        check_version(uow.conn(), "books", "Book", book.id, book.version).await?;
        Self::check_references(uow.conn(), book).await?;

        let previous_file: Option<i32> =
            sqlx::query_scalar("SELECT binary_file_id FROM books WHERE id = $1")
                .bind(book.id)
                .fetch_one(uow.conn())
                .await?;

        let current = Self::authors_of(uow.conn(), book.id).await?;
        let plan = merge_by_key(&current, &book.authors, |a| a.author_id);

        if !plan.remove.is_empty() {
            let removed: Vec<i32> = plan.remove.iter().map(|a| a.author_id).collect();
            sqlx::query("DELETE FROM book_authors WHERE book_id = $1 AND author_id = ANY($2)")
                .bind(book.id)
                .bind(&removed)
                .execute(uow.conn())
                .await?;
        }
        for author in &plan.update {
            sqlx::query("UPDATE book_authors SET position = $1 WHERE book_id = $2 AND author_id = $3")
                .bind(author.position)
                .bind(book.id)
                .bind(author.author_id)
                .execute(uow.conn())
                .await?;
        }
        for author in &plan.add {
            insert_author(uow.conn(), book.id, author).await?;
        }

        let mut updated = sqlx::query_as::<_, Book>(
            r#"
            UPDATE books
            SET title = $1, description = $2, isbn = $3, publication_year = $4, language = $5,
                genre_id = $6, book_group_id = $7, group_position = $8, binary_file_id = $9,
                version = version + 1, updated_at = NOW()
            WHERE id = $10
            RETURNING *
            "#,
        )
        .bind(&book.title)
        .bind(&book.description)
        .bind(&book.isbn)
        .bind(book.publication_year)
        .bind(&book.language)
        .bind(book.genre_id)
        .bind(book.book_group_id)
        .bind(book.group_position)
        .bind(book.binary_file_id)
        .bind(book.id)
        .fetch_one(uow.conn())
        .await
        .map_err(|e| AppError::from_constraint(e, reference_gone()))?;
        updated.authors = Self::authors_of(uow.conn(), book.id).await?;

        let released = match previous_file {
            Some(old) if Some(old) != book.binary_file_id => {
                Some(BinaryFilesRepository::remove_row(uow, old).await?)
            }
            _ => None,
        };

        Ok((updated, released))
    }

    /// Delete a book. Its author associations go with it, and so does its
    /// file metadata row, which is returned for payload cleanup after commit.
    pub async fn delete(&self, uow: &mut UnitOfWork, id: i32) -> AppResult<Option<BinaryFile>> {
        lock_for_delete(uow.conn(), "books", "Book", id).await?;

        let file_id: Option<i32> =
            sqlx::query_scalar("DELETE FROM books WHERE id = $1 RETURNING binary_file_id")
                .bind(id)
                .fetch_one(uow.conn())
                .await?;

        match file_id {
            Some(file_id) => Ok(Some(BinaryFilesRepository::remove_row(uow, file_id).await?)),
            None => Ok(None),
        }
    }
}

async fn insert_author(conn: &mut PgConnection, book_id: i32, author: &BookAuthor) -> AppResult<()> {
    sqlx::query("INSERT INTO book_authors (book_id, author_id, position) VALUES ($1, $2, $3)")
        .bind(book_id)
        .bind(author.author_id)
        .bind(author.position)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::from_constraint(e, reference_gone()))?;
    Ok(())
}

fn reference_gone() -> AppError {
    AppError::Validation("A referenced genre, group, author or file no longer exists".to_string())
}
