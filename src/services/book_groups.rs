//! Book group (series) service

use validator::Validate;

use crate::{
    context::RequestContext,
    error::AppResult,
    mapper::MapOnto,
    models::book_group::{BookGroup, BookGroupQuery, CreateBookGroup, UpdateBookGroup},
    repository::{cancellable, Repository},
};

#[derive(Clone)]
pub struct BookGroupsService {
    repository: Repository,
}

impl BookGroupsService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        query: &BookGroupQuery,
    ) -> AppResult<(Vec<BookGroup>, i64)> {
        cancellable(&ctx.cancel, self.repository.book_groups.list(query)).await
    }

    pub async fn get_by_id(&self, ctx: &RequestContext, id: i32) -> AppResult<BookGroup> {
        cancellable(&ctx.cancel, self.repository.book_groups.get_by_id(id)).await
    }

    pub async fn create(&self, ctx: &RequestContext, data: CreateBookGroup) -> AppResult<BookGroup> {
        data.validate()?;
        let group = BookGroup::from(data);

        cancellable(&ctx.cancel, async {
            let mut uow = self.repository.begin().await?;
            let created = self.repository.book_groups.add(&mut uow, &group).await?;
            uow.commit().await?;
            Ok(created)
        })
        .await
    }

    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: i32,
        data: UpdateBookGroup,
    ) -> AppResult<BookGroup> {
        data.validate()?;

        cancellable(&ctx.cancel, async {
            let mut group = self.repository.book_groups.get_by_id(id).await?;
            data.map_onto(&mut group);

            let mut uow = self.repository.begin().await?;
            let updated = self.repository.book_groups.update(&mut uow, &group).await?;
            uow.commit().await?;
            Ok(updated)
        })
        .await
    }

    /// Delete a series; its books stay in the catalog
    pub async fn delete(&self, ctx: &RequestContext, id: i32) -> AppResult<()> {
        let detached = cancellable(&ctx.cancel, async {
            let mut uow = self.repository.begin().await?;
            let detached = self.repository.book_groups.delete(&mut uow, id).await?;
            uow.commit().await?;
            Ok(detached)
        })
        .await?;
        tracing::info!("Deleted book group {} ({} book(s) detached)", id, detached);
        Ok(())
    }
}
