//! Book service

use validator::Validate;

use super::files::FilesService;
use crate::{
    context::RequestContext,
    error::AppResult,
    mapper::MapOnto,
    models::book::{Book, BookDetails, BookQuery, BookRelations, BookSummary, CreateBook, UpdateBook},
    repository::{cancellable, Repository},
};

#[derive(Clone)]
pub struct BooksService {
    repository: Repository,
    files: FilesService,
}

impl BooksService {
    pub fn new(repository: Repository, files: FilesService) -> Self {
        Self { repository, files }
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        query: &BookQuery,
    ) -> AppResult<(Vec<BookSummary>, i64)> {
        cancellable(&ctx.cancel, async {
            let (books, total) = self.repository.books.list(query).await?;
            let ids: Vec<i32> = books.iter().map(|b| b.id).collect();
            let mut authors = self.repository.authors.refs_for_books(&ids).await?;

            let summaries = books
                .into_iter()
                .map(|book| {
                    let refs = authors.remove(&book.id).unwrap_or_default();
                    BookSummary::from((book, refs))
                })
                .collect();
            Ok((summaries, total))
        })
        .await
    }

    pub async fn get_by_id(&self, ctx: &RequestContext, id: i32) -> AppResult<BookDetails> {
        cancellable(&ctx.cancel, async {
            let book = self.repository.books.get_by_id(id).await?;
            self.details(book).await
        })
        .await
    }

    /// Load everything a book points at
    async fn details(&self, book: Book) -> AppResult<BookDetails> {
        let authors = self
            .repository
            .authors
            .refs_for_books(&[book.id])
            .await?
            .remove(&book.id)
            .unwrap_or_default();
        let genre = self.repository.genres.get_by_id(book.genre_id).await?;
        let book_group = match book.book_group_id {
            Some(id) => self.repository.book_groups.find(id).await?,
            None => None,
        };
        let file = match book.binary_file_id {
            Some(id) => self.repository.binary_files.find(id).await?,
            None => None,
        };

        let relations = BookRelations {
            authors,
            genre,
            book_group,
            file,
        };
        Ok(BookDetails::from((book, relations)))
    }

    pub async fn create(&self, ctx: &RequestContext, data: CreateBook) -> AppResult<BookDetails> {
        data.validate()?;
        let book = Book::from(data);

        let created = cancellable(&ctx.cancel, async {
            let mut uow = self.repository.begin().await?;
            let created = self.repository.books.add(&mut uow, &book).await?;
            uow.commit().await?;
            Ok(created)
        })
        .await?;

        tracing::info!("Created book {} '{}'", created.id, created.title);
        cancellable(&ctx.cancel, self.details(created)).await
    }

    /// Replace the editable fields of a book. A file the book no longer
    /// references is deleted along with the update.
    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: i32,
        data: UpdateBook,
    ) -> AppResult<BookDetails> {
        data.validate()?;

        let (updated, released) = cancellable(&ctx.cancel, async {
            let mut book = self.repository.books.get_by_id(id).await?;
            data.map_onto(&mut book);

            let mut uow = self.repository.begin().await?;
            let result = self.repository.books.update(&mut uow, &book).await?;
            uow.commit().await?;
            Ok(result)
        })
        .await?;

        if let Some(file) = released {
            self.files.release(&file).await;
        }
        cancellable(&ctx.cancel, self.details(updated)).await
    }

    /// Delete a book together with its file
    pub async fn delete(&self, ctx: &RequestContext, id: i32) -> AppResult<()> {
        let released = cancellable(&ctx.cancel, async {
            let mut uow = self.repository.begin().await?;
            let released = self.repository.books.delete(&mut uow, id).await?;
            uow.commit().await?;
            Ok(released)
        })
        .await?;

        if let Some(file) = released {
            self.files.release(&file).await;
        }
        tracing::info!("Deleted book {}", id);
        Ok(())
    }
}
