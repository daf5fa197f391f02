//! Authentication endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use super::AuthenticatedUser;
use crate::{
    context::RequestContext,
    error::AppResult,
    models::user::{LoginRequest, LoginResponse, RegisterUser, User},
    AppState,
};

#[derive(Serialize, ToSchema)]
pub struct LogoutResponse {
    pub message: String,
}

/// Create a reader account
#[utoipa::path(
    post,
    path = "/auth/register",
    tag = "auth",
    request_body = RegisterUser,
    responses(
        (status = 201, description = "Account created", body = User),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Login already taken")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(data): Json<RegisterUser>,
) -> AppResult<(StatusCode, Json<User>)> {
    let user = state.services.identity.register(&ctx, data).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Login with username and password
#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(data): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let response = state.services.identity.login(&ctx, data).await?;
    Ok(Json(response))
}

/// End the session. Tokens are stateless, so the client simply drops its token.
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Logged out", body = LogoutResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn logout(AuthenticatedUser(claims): AuthenticatedUser) -> Json<LogoutResponse> {
    tracing::info!("User {} logged out", claims.sub);
    Json(LogoutResponse {
        message: "Logged out".to_string(),
    })
}

/// Get current user information
#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn me(
    State(state): State<AppState>,
    ctx: RequestContext,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<User>> {
    let user = state.services.identity.get_user(&ctx, claims.user_id).await?;
    Ok(Json(user))
}
