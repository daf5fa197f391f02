//! Author model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::paging::Paging;

/// Full author model from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Author {
    pub id: i32,
    pub first_name: Option<String>,
    pub last_name: String,
    pub bio: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Author {
    pub fn display_name(&self) -> String {
        format_name(self.first_name.as_deref(), &self.last_name)
    }
}

/// "First Last", or just the last name
pub fn format_name(first_name: Option<&str>, last_name: &str) -> String {
    match first_name.map(str::trim) {
        Some(first) if !first.is_empty() => format!("{} {}", first, last_name),
        _ => last_name.to_string(),
    }
}

/// Author reference embedded in book views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuthorRef {
    pub id: i32,
    pub name: String,
}

impl From<&Author> for AuthorRef {
    fn from(author: &Author) -> Self {
        Self {
            id: author.id,
            name: author.display_name(),
        }
    }
}

/// Create author request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateAuthor {
    pub first_name: Option<String>,
    #[validate(length(min = 1, max = 200, message = "Last name must be 1-200 characters"))]
    pub last_name: String,
    pub bio: Option<String>,
}

/// Update author request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateAuthor {
    pub version: i32,
    pub first_name: Option<String>,
    #[validate(length(min = 1, max = 200, message = "Last name must be 1-200 characters"))]
    pub last_name: String,
    pub bio: Option<String>,
}

/// Author query parameters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct AuthorQuery {
    /// Case-insensitive search in first or last name
    pub name: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl AuthorQuery {
    pub fn paging(&self) -> Paging {
        Paging::new(self.page, self.per_page)
    }
}
