//! Book group (series) model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use super::paging::Paging;

/// Series of books
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct BookGroup {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create book group request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateBookGroup {
    #[validate(length(min = 1, max = 300, message = "Name must be 1-300 characters"))]
    pub name: String,
    pub description: Option<String>,
}

/// Update book group request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateBookGroup {
    pub version: i32,
    #[validate(length(min = 1, max = 300, message = "Name must be 1-300 characters"))]
    pub name: String,
    pub description: Option<String>,
}

/// Book group query parameters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct BookGroupQuery {
    pub name: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl BookGroupQuery {
    pub fn paging(&self) -> Paging {
        Paging::new(self.page, self.per_page)
    }
}
