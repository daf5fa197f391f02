//! Business logic services

pub mod authors;
pub mod book_groups;
pub mod books;
pub mod files;
pub mod genres;
pub mod identity;

use std::sync::Arc;

use crate::{config::AuthConfig, error::AppResult, repository::Repository, storage::FileStore};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub books: books::BooksService,
    pub authors: authors::AuthorsService,
    pub genres: genres::GenresService,
    pub book_groups: book_groups::BookGroupsService,
    pub files: files::FilesService,
    pub identity: identity::IdentityService,
    repository: Repository,
}

impl Services {
    /// Create all services with the given repository and payload store
    pub fn new(repository: Repository, store: Arc<dyn FileStore>, auth_config: AuthConfig) -> Self {
        let files = files::FilesService::new(repository.clone(), store);
        Self {
            books: books::BooksService::new(repository.clone(), files.clone()),
            authors: authors::AuthorsService::new(repository.clone()),
            genres: genres::GenresService::new(repository.clone()),
            book_groups: book_groups::BookGroupsService::new(repository.clone()),
            identity: identity::IdentityService::new(repository.clone(), auth_config),
            files,
            repository,
        }
    }

    /// Round-trip to the database
    pub async fn check_database(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.repository.pool).await?;
        Ok(())
    }
}
