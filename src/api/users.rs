//! User administration endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};

use crate::{
    context::RequestContext,
    error::AppResult,
    models::{
        user::{UpdateUserRoles, User, UserQuery},
        PaginatedResponse,
    },
    AppState,
};

/// List users
#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    security(("bearer_auth" = [])),
    params(UserQuery),
    responses(
        (status = 200, description = "List of users", body = PaginatedResponse<User>),
        (status = 403, description = "Admin role required")
    )
)]
pub async fn list_users(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<UserQuery>,
) -> AppResult<Json<PaginatedResponse<User>>> {
    let (users, total) = state.services.identity.list_users(&ctx, &query).await?;
    Ok(Json(PaginatedResponse::new(users, total, query.paging())))
}

/// Get user by ID
#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "users",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "User ID")),
    responses(
        (status = 200, description = "User", body = User),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i32>,
) -> AppResult<Json<User>> {
    let user = state.services.identity.get_user(&ctx, id).await?;
    Ok(Json(user))
}

/// Replace the roles of a user
#[utoipa::path(
    put,
    path = "/users/{id}/roles",
    tag = "users",
    security(("bearer_auth" = [])),
    params(("id" = i32, Path, description = "User ID")),
    request_body = UpdateUserRoles,
    responses(
        (status = 200, description = "Roles updated", body = User),
        (status = 404, description = "User not found")
    )
)]
pub async fn update_user_roles(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<i32>,
    Json(data): Json<UpdateUserRoles>,
) -> AppResult<Json<User>> {
    let user = state.services.identity.set_roles(&ctx, id, data.roles).await?;
    Ok(Json(user))
}
