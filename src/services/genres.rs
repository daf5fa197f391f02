//! Genre service

use validator::Validate;

use crate::{
    context::RequestContext,
    error::AppResult,
    mapper::MapOnto,
    models::genre::{CreateGenre, Genre, GenreQuery, UpdateGenre},
    repository::{cancellable, Repository},
};

#[derive(Clone)]
pub struct GenresService {
    repository: Repository,
}

impl GenresService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    pub async fn list(&self, ctx: &RequestContext, query: &GenreQuery) -> AppResult<(Vec<Genre>, i64)> {
        cancellable(&ctx.cancel, self.repository.genres.list(query)).await
    }

    pub async fn get_by_id(&self, ctx: &RequestContext, id: i32) -> AppResult<Genre> {
        cancellable(&ctx.cancel, self.repository.genres.get_by_id(id)).await
    }

    pub async fn create(&self, ctx: &RequestContext, data: CreateGenre) -> AppResult<Genre> {
        data.validate()?;
        let genre = Genre::from(data);

        cancellable(&ctx.cancel, async {
            let mut uow = self.repository.begin().await?;
            let created = self.repository.genres.add(&mut uow, &genre).await?;
            uow.commit().await?;
            Ok(created)
        })
        .await
    }

    pub async fn update(&self, ctx: &RequestContext, id: i32, data: UpdateGenre) -> AppResult<Genre> {
        data.validate()?;

        cancellable(&ctx.cancel, async {
            let mut genre = self.repository.genres.get_by_id(id).await?;
            data.map_onto(&mut genre);

            let mut uow = self.repository.begin().await?;
            let updated = self.repository.genres.update(&mut uow, &genre).await?;
            uow.commit().await?;
            Ok(updated)
        })
        .await
    }

    pub async fn delete(&self, ctx: &RequestContext, id: i32) -> AppResult<()> {
        cancellable(&ctx.cancel, async {
            let mut uow = self.repository.begin().await?;
            self.repository.genres.delete(&mut uow, id).await?;
            uow.commit().await
        })
        .await?;
        tracing::info!("Deleted genre {}", id);
        Ok(())
    }
}
