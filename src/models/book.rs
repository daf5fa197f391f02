//! Book model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::{
    author::AuthorRef, binary_file::BinaryFile, book_group::BookGroup, genre::Genre,
    paging::Paging,
};

/// Book-author association row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct BookAuthor {
    pub author_id: i32,
    /// Order of the author on the book (0-based)
    pub position: i16,
}

/// Full book entity. Author associations are loaded explicitly by the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub description: Option<String>,
    pub isbn: Option<String>,
    pub publication_year: Option<i32>,
    pub language: Option<String>,
    pub genre_id: i32,
    pub book_group_id: Option<i32>,
    pub group_position: Option<i32>,
    pub binary_file_id: Option<i32>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(default)]
    pub authors: Vec<BookAuthor>,
}

impl Book {
    pub fn author_ids(&self) -> Vec<i32> {
        let mut authors = self.authors.clone();
        authors.sort_by_key(|a| a.position);
        authors.into_iter().map(|a| a.author_id).collect()
    }
}

/// Relations fetched for a book detail view
#[derive(Debug, Clone)]
pub struct BookRelations {
    pub authors: Vec<AuthorRef>,
    pub genre: Genre,
    pub book_group: Option<BookGroup>,
    pub file: Option<BinaryFile>,
}

/// Book detail view
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BookDetails {
    pub id: i32,
    pub title: String,
    pub description: Option<String>,
    pub isbn: Option<String>,
    pub publication_year: Option<i32>,
    pub language: Option<String>,
    pub authors: Vec<AuthorRef>,
    pub genre: Genre,
    pub book_group: Option<BookGroup>,
    pub group_position: Option<i32>,
    pub file: Option<BinaryFile>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Short book representation for lists
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BookSummary {
    pub id: i32,
    pub title: String,
    pub isbn: Option<String>,
    pub publication_year: Option<i32>,
    pub genre_id: i32,
    pub book_group_id: Option<i32>,
    pub group_position: Option<i32>,
    pub has_file: bool,
    pub authors: Vec<AuthorRef>,
}

/// Create book request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 1, max = 500, message = "Title must be 1-500 characters"))]
    pub title: String,
    pub description: Option<String>,
    #[validate(length(max = 20, message = "ISBN is too long"))]
    pub isbn: Option<String>,
    pub publication_year: Option<i32>,
    #[validate(length(min = 2, max = 10, message = "Language code must be 2-10 characters"))]
    pub language: Option<String>,
    pub genre_id: i32,
    pub book_group_id: Option<i32>,
    pub group_position: Option<i32>,
    pub binary_file_id: Option<i32>,
    /// Authors in display order
    #[validate(length(min = 1, max = 100, message = "A book needs 1-100 authors"))]
    pub author_ids: Vec<i32>,
}

/// Update book request. Replaces every editable field.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateBook {
    pub version: i32,
    #[validate(length(min = 1, max = 500, message = "Title must be 1-500 characters"))]
    pub title: String,
    pub description: Option<String>,
    #[validate(length(max = 20, message = "ISBN is too long"))]
    pub isbn: Option<String>,
    pub publication_year: Option<i32>,
    #[validate(length(min = 2, max = 10, message = "Language code must be 2-10 characters"))]
    pub language: Option<String>,
    pub genre_id: i32,
    pub book_group_id: Option<i32>,
    pub group_position: Option<i32>,
    pub binary_file_id: Option<i32>,
    #[validate(length(min = 1, max = 100, message = "A book needs 1-100 authors"))]
    pub author_ids: Vec<i32>,
}

/// Book query parameters
#[derive(Debug, Default, Clone, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct BookQuery {
    /// Case-insensitive search in title, description and ISBN
    pub search: Option<String>,
    pub genre_id: Option<i32>,
    pub book_group_id: Option<i32>,
    pub author_id: Option<i32>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl BookQuery {
    pub fn paging(&self) -> Paging {
        Paging::new(self.page, self.per_page)
    }
}
