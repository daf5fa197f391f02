//! BookLibrary server
//!
//! Catalog of books, authors, genres, series and stored files behind a REST
//! JSON API, with role-based access and localized error messages.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod i18n;
pub mod mapper;
pub mod models;
pub mod pipeline;
pub mod repository;
pub mod services;
pub mod storage;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
