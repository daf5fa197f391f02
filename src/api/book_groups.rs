//! Book group endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::{
    context::RequestContext,
    error::AppResult,
    models::{
        book::{BookQuery, BookSummary},
        book_group::{BookGroup, BookGroupQuery, CreateBookGroup, UpdateBookGroup},
        PaginatedResponse,
    },
    AppState,
};

/// List book groups
#[utoipa::path(
    get,
    path = "/book-groups",
    tag = "book-groups",
    security(("bearer_auth" = [])),
    params(BookGroupQuery),
    responses(
        (status = 200, description = "List of book groups", body = PaginatedResponse<BookGroup>),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_book_groups(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<BookGroupQuery>,
) -> AppResult<Json<PaginatedResponse<BookGroup>>> {
    let (book_groups, total) = state.services.book_groups.list(&ctx, &query).await?;
    Ok(Json(PaginatedResponse::new(book_groups, total, query.paging())))
}

/// Get book group by ID
#[utoipa::path(
    get,
    path = "/book-groups/{id}",
    tag = "book-groups",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Book group ID")),
    responses(
        (status = 200, description = "Book group", body = BookGroup),
        (status = 404, description = "Book group not found")
    )
)]
pub async fn get_book_group(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i32>,
) -> AppResult<Json<BookGroup>> {
    let book_group = state.services.book_groups.get_by_id(&ctx, id).await?;
    Ok(Json(book_group))
}

/// Create a book group
#[utoipa::path(
    post,
    path = "/book-groups",
    tag = "book-groups",
    security(("bearer_auth" = [])),
    request_body = CreateBookGroup,
    responses(
        (status = 201, description = "Book group created", body = BookGroup),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Book group already exists")
    )
)]
pub async fn create_book_group(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(data): Json<CreateBookGroup>,
) -> AppResult<(StatusCode, Json<BookGroup>)> {
    let created = state.services.book_groups.create(&ctx, data).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Update a book group
#[utoipa::path(
    put,
    path = "/book-groups/{id}",
    tag = "book-groups",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Book group ID")),
    request_body = UpdateBookGroup,
    responses(
        (status = 200, description = "Book group updated", body = BookGroup),
        (status = 404, description = "Book group not found"),
        (status = 409, description = "Book group was modified concurrently")
    )
)]
pub async fn update_book_group(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i32>,
    Json(data): Json<UpdateBookGroup>,
) -> AppResult<Json<BookGroup>> {
    let updated = state.services.book_groups.update(&ctx, id, data).await?;
    Ok(Json(updated))
}

/// Delete a book group. Its books stay in the catalog without a group.
#[utoipa::path(
    delete,
    path = "/book-groups/{id}",
    tag = "book-groups",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Book group ID")),
    responses(
        (status = 204, description = "Book group deleted"),
        (status = 404, description = "Book group not found")
    )
)]
pub async fn delete_book_group(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    state.services.book_groups.delete(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Query parameters for the books of a series
#[derive(Debug, Default, serde::Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct GroupBooksQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// List the books of a group in reading order
#[utoipa::path(
    get,
    path = "/book-groups/{id}/books",
    tag = "book-groups",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "Book group ID"), GroupBooksQuery),
    responses(
        (status = 200, description = "Books of the group", body = PaginatedResponse<BookSummary>),
        (status = 404, description = "Book group not found")
    )
)]
pub async fn list_group_books(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i32>,
    Query(query): Query<GroupBooksQuery>,
) -> AppResult<Json<PaginatedResponse<BookSummary>>> {
    state.services.book_groups.get_by_id(&ctx, id).await?;

    let books_query = BookQuery {
        book_group_id: Some(id),
        page: query.page,
        per_page: query.per_page,
        ..Default::default()
    };
    let (books, total) = state.services.books.list(&ctx, &books_query).await?;
    Ok(Json(PaginatedResponse::new(books, total, books_query.paging())))
}
