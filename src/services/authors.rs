//! Author service

use validator::Validate;

use crate::{
    context::RequestContext,
    error::AppResult,
    mapper::MapOnto,
    models::author::{Author, AuthorQuery, CreateAuthor, UpdateAuthor},
    repository::{cancellable, Repository},
};

#[derive(Clone)]
pub struct AuthorsService {
    repository: Repository,
}

impl AuthorsService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    pub async fn list(&self, ctx: &RequestContext, query: &AuthorQuery) -> AppResult<(Vec<Author>, i64)> {
        cancellable(&ctx.cancel, self.repository.authors.list(query)).await
    }

    pub async fn get_by_id(&self, ctx: &RequestContext, id: i32) -> AppResult<Author> {
        cancellable(&ctx.cancel, self.repository.authors.get_by_id(id)).await
    }

    pub async fn create(&self, ctx: &RequestContext, data: CreateAuthor) -> AppResult<Author> {
        data.validate()?;
        let author = Author::from(data);

        cancellable(&ctx.cancel, async {
            let mut uow = self.repository.begin().await?;
            let created = self.repository.authors.add(&mut uow, &author).await?;
            uow.commit().await?;
            Ok(created)
        })
        .await
    }

    pub async fn update(&self, ctx: &RequestContext, id: i32, data: UpdateAuthor) -> AppResult<Author> {
        data.validate()?;

        cancellable(&ctx.cancel, async {
            let mut author = self.repository.authors.get_by_id(id).await?;
            data.map_onto(&mut author);

            let mut uow = self.repository.begin().await?;
            let updated = self.repository.authors.update(&mut uow, &author).await?;
            uow.commit().await?;
            Ok(updated)
        })
        .await
    }

    pub async fn delete(&self, ctx: &RequestContext, id: i32) -> AppResult<()> {
        cancellable(&ctx.cancel, async {
            let mut uow = self.repository.begin().await?;
            self.repository.authors.delete(&mut uow, id).await?;
            uow.commit().await
        })
        .await?;
        tracing::info!("Deleted author {}", id);
        Ok(())
    }
}
