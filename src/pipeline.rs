//! Request pipeline.
//!
//! Stages, outermost first: panic capture and error rendering, HTTPS
//! enforcement (outside development), static files, routing, authentication,
//! authorization, request culture, handler. Static files are served before
//! routing and never see the authentication stages.

use std::any::Any;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath, Query, Request, State},
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post, put},
    Router,
};
use axum_extra::{
    extract::CookieJar,
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{Any as AnyOrigin, CorsLayer},
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::{
    api,
    error::{AppError, ErrorCode, ErrorResponse},
    i18n::{self, Cultures, Locale, CULTURE_COOKIE},
    models::user::{Role, UserClaims},
    AppState,
};

const API_PREFIX: &str = "/api/v1";
const HSTS: &str = "max-age=31536000; includeSubDomains";

/// Access rule of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Requires(Role),
}

/// Access rule for a matched route template (e.g. `/books/:id`), with or
/// without the API prefix
pub fn required_access(method: &Method, route: &str) -> Access {
    let route = route.strip_prefix(API_PREFIX).unwrap_or(route);
    match route {
        "/health" | "/ready" | "/auth/login" | "/auth/register" => Access::Public,
        "/files/reconcile" => Access::Requires(Role::Admin),
        r if r == "/users" || r.starts_with("/users/") => Access::Requires(Role::Admin),
        "/auth/me" | "/auth/logout" => Access::Requires(Role::Reader),
        _ if method == Method::GET || method == Method::HEAD => Access::Requires(Role::Reader),
        _ => Access::Requires(Role::Librarian),
    }
}

/// Build the application with every pipeline stage in place
pub fn build_router(state: AppState) -> Router {
    let cultures = Cultures::from_tags(
        &state.config.localization.default_culture,
        &state.config.localization.supported_cultures,
    );

    let api_v1 = Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        .route("/ready", get(api::health::readiness_check))
        // Authentication
        .route("/auth/register", post(api::auth::register))
        .route("/auth/login", post(api::auth::login))
        .route("/auth/logout", post(api::auth::logout))
        .route("/auth/me", get(api::auth::me))
        // Books
        .route("/books", get(api::books::list_books).post(api::books::create_book))
        .route(
            "/books/:id",
            get(api::books::get_book)
                .put(api::books::update_book)
                .delete(api::books::delete_book),
        )
        // Authors
        .route("/authors", get(api::authors::list_authors).post(api::authors::create_author))
        .route(
            "/authors/:id",
            get(api::authors::get_author)
                .put(api::authors::update_author)
                .delete(api::authors::delete_author),
        )
        // Genres
        .route("/genres", get(api::genres::list_genres).post(api::genres::create_genre))
        .route(
            "/genres/:id",
            get(api::genres::get_genre)
                .put(api::genres::update_genre)
                .delete(api::genres::delete_genre),
        )
        // Book groups
        .route(
            "/book-groups",
            get(api::book_groups::list_book_groups).post(api::book_groups::create_book_group),
        )
        .route(
            "/book-groups/:id",
            get(api::book_groups::get_book_group)
                .put(api::book_groups::update_book_group)
                .delete(api::book_groups::delete_book_group),
        )
        .route("/book-groups/:id/books", get(api::book_groups::list_group_books))
        // Files
        .route(
            "/files",
            get(api::files::list_files)
                .post(api::files::upload_file)
                .layer(DefaultBodyLimit::disable()),
        )
        .route("/files/reconcile", post(api::files::reconcile_files))
        .route(
            "/files/:id",
            get(api::files::get_file).delete(api::files::delete_file),
        )
        .route("/files/:id/content", get(api::files::download_file))
        // Users
        .route("/users", get(api::users::list_users))
        .route("/users/:id", get(api::users::get_user))
        .route("/users/:id/roles", put(api::users::update_user_roles))
        .with_state(state.clone())
        // Router::layer runs after routing; the last layer added runs first
        .layer(middleware::from_fn_with_state(cultures.clone(), establish_locale))
        .layer(middleware::from_fn(authorize))
        .layer(middleware::from_fn_with_state(state.clone(), authenticate));

    let routed = Router::new()
        .nest(API_PREFIX, api_v1)
        .merge(api::openapi::create_openapi_router());

    let static_files = ServeDir::new(&state.config.server.static_dir)
        .append_index_html_on_directories(false)
        .call_fallback_on_method_not_allowed(true)
        .fallback(routed);

    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    let mut app = Router::new()
        .fallback_service(static_files)
        .layer(middleware::from_fn(request_cancellation))
        .layer(TimeoutLayer::new(Duration::from_secs(
            state.config.server.request_timeout_secs,
        )))
        .layer(CompressionLayer::new())
        .layer(cors);

    if !state.config.server.is_development() {
        app = app.layer(middleware::from_fn(enforce_https));
    }

    app.layer(middleware::from_fn_with_state(cultures, render_errors))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    AppError::Internal(format!("Handler panicked: {}", detail)).into_response()
}

/// Render error bodies in the request culture and echo the culture
async fn render_errors(State(cultures): State<Cultures>, req: Request, next: Next) -> Response {
    let negotiated = negotiate(&cultures, &req);
    let response = next.run(req).await;

    let locale = response.extensions().get::<Locale>().copied().unwrap_or(negotiated);
    let code = response.extensions().get::<ErrorCode>().copied();

    let (mut parts, body) = response.into_parts();
    parts
        .headers
        .entry(header::CONTENT_LANGUAGE)
        .or_insert(HeaderValue::from_static(locale.tag()));

    match code.and_then(|code| i18n::error_message(code, locale).map(|msg| (code, msg))) {
        Some((code, message)) => match serde_json::to_vec(&ErrorResponse::new(code, message.to_string())) {
            Ok(localized) => {
                parts.headers.remove(header::CONTENT_LENGTH);
                Response::from_parts(parts, Body::from(localized))
            }
            Err(_) => Response::from_parts(parts, body),
        },
        None => Response::from_parts(parts, body),
    }
}

/// Redirect plain HTTP to HTTPS and mark HTTPS responses with HSTS
async fn enforce_https(req: Request, next: Next) -> Response {
    let forwarded_https = req
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("https"));
    let is_https = forwarded_https
        .or_else(|| req.uri().scheme_str().map(|s| s.eq_ignore_ascii_case("https")))
        .unwrap_or(false);

    if !is_https {
        let Some(host) = req.headers().get(header::HOST).and_then(|h| h.to_str().ok()) else {
            return AppError::BadRequest("HTTPS is required".to_string()).into_response();
        };
        let path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        return Redirect::permanent(&format!("https://{}{}", host, path)).into_response();
    }

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert(header::STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS));
    response
}

/// Give the request a token that fires when the request future is dropped,
/// which happens when the client disconnects or the timeout elapses
async fn request_cancellation(mut req: Request, next: Next) -> Response {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    req.extensions_mut().insert(cancel);
    next.run(req).await
}

/// Identify the caller from its bearer token. Requests without a token pass
/// through anonymously; invalid tokens are rejected.
async fn authenticate(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(TypedHeader(Authorization(bearer))) = bearer {
        match state.services.identity.verify_token(bearer.token()) {
            Ok(claims) => {
                req.extensions_mut().insert(claims);
            }
            Err(e) => return e.into_response(),
        }
    }
    next.run(req).await
}

/// Apply the access rule of the matched route
async fn authorize(req: Request, next: Next) -> Response {
    let Some(route) = req.extensions().get::<MatchedPath>().map(|m| m.as_str().to_string()) else {
        // Unmatched requests fall through to the not-found handler
        return next.run(req).await;
    };

    if let Access::Requires(role) = required_access(req.method(), &route) {
        let result = match req.extensions().get::<UserClaims>() {
            None => Err(AppError::Authentication("Authentication required".to_string())),
            Some(claims) => claims.require_role(role),
        };
        if let Err(e) = result {
            tracing::debug!("{} {} denied: {}", req.method(), route, e);
            return e.into_response();
        }
    }

    next.run(req).await
}

#[derive(Debug, Deserialize)]
struct CultureParam {
    culture: Option<String>,
}

fn negotiate(cultures: &Cultures, req: &Request) -> Locale {
    let query = Query::<CultureParam>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(p)| p.culture);
    let jar = CookieJar::from_headers(req.headers());
    let cookie = jar.get(CULTURE_COOKIE).map(|c| c.value().to_string());
    let accept_language = req
        .headers()
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok());

    cultures.negotiate(query.as_deref(), cookie.as_deref(), accept_language)
}

/// Establish the request culture for handlers
async fn establish_locale(State(cultures): State<Cultures>, mut req: Request, next: Next) -> Response {
    let locale = negotiate(&cultures, &req);
    req.extensions_mut().insert(locale);

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert(header::CONTENT_LANGUAGE, HeaderValue::from_static(locale.tag()));
    response.extensions_mut().insert(locale);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{body::to_bytes, http::StatusCode};
    use chrono::Utc;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use crate::{
        config::AppConfig, repository::Repository, services::Services, storage::LocalFileService,
    };

    fn app_with(config: AppConfig, dir: &tempfile::TempDir) -> Router {
        let pool = PgPoolOptions::new()
            .connect_lazy(&config.database.url)
            .unwrap();
        let store = Arc::new(LocalFileService::new(dir.path(), config.storage.max_upload_bytes));
        let services = Services::new(Repository::new(pool), store, config.auth.clone());
        build_router(AppState {
            config: Arc::new(config),
            services: Arc::new(services),
        })
    }

    fn token(roles: Vec<Role>) -> String {
        let now = Utc::now().timestamp();
        UserClaims {
            sub: "tester".to_string(),
            user_id: 1,
            roles,
            exp: now + 600,
            iat: now,
        }
        .create_token(&AppConfig::default().auth.jwt_secret)
        .unwrap()
    }

    fn request(method: Method, uri: &str, bearer: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_access_rules() {
        assert_eq!(required_access(&Method::GET, "/api/v1/health"), Access::Public);
        assert_eq!(required_access(&Method::POST, "/auth/login"), Access::Public);
        assert_eq!(
            required_access(&Method::GET, "/api/v1/books/:id"),
            Access::Requires(Role::Reader)
        );
        assert_eq!(
            required_access(&Method::DELETE, "/api/v1/genres/:id"),
            Access::Requires(Role::Librarian)
        );
        assert_eq!(
            required_access(&Method::GET, "/api/v1/users"),
            Access::Requires(Role::Admin)
        );
        assert_eq!(
            required_access(&Method::POST, "/api/v1/files/reconcile"),
            Access::Requires(Role::Admin)
        );
        assert_eq!(
            required_access(&Method::POST, "/api/v1/auth/logout"),
            Access::Requires(Role::Reader)
        );
    }

    #[tokio::test]
    async fn test_public_route_needs_no_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(AppConfig::default(), &dir);

        let response = app
            .oneshot(request(Method::GET, "/api/v1/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LANGUAGE], "en-US");
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthenticated() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(AppConfig::default(), &dir);

        let response = app
            .oneshot(request(Method::GET, "/api/v1/books", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["code"], ErrorCode::NotAuthenticated as u32);
    }

    #[tokio::test]
    async fn test_invalid_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(AppConfig::default(), &dir);

        let response = app
            .oneshot(request(Method::GET, "/api/v1/books", Some("not-a-jwt")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_reader_cannot_write() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(AppConfig::default(), &dir);
        let reader = token(vec![Role::Reader]);

        let response = app
            .oneshot(request(Method::DELETE, "/api/v1/genres/1", Some(&reader)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_librarian_cannot_manage_users() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(AppConfig::default(), &dir);
        let librarian = token(vec![Role::Librarian]);

        let response = app
            .oneshot(request(Method::GET, "/api/v1/users", Some(&librarian)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_errors_rendered_in_request_culture() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(AppConfig::default(), &dir);

        let req = axum::http::Request::builder()
            .uri("/api/v1/books")
            .header(header::ACCEPT_LANGUAGE, "ru-RU,ru;q=0.9,en;q=0.5")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::CONTENT_LANGUAGE], "ru-RU");
        let body = body_json(response).await;
        assert_eq!(body["message"], "Требуется вход в систему");
        assert_eq!(body["code"], ErrorCode::NotAuthenticated as u32);
    }

    #[tokio::test]
    async fn test_culture_query_beats_cookie() {
        let dir = tempfile::tempdir().unwrap();
        let app = app_with(AppConfig::default(), &dir);

        let req = axum::http::Request::builder()
            .uri("/api/v1/health?culture=ru-RU")
            .header(header::COOKIE, "culture=en-US")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.headers()[header::CONTENT_LANGUAGE], "ru-RU");
    }

    #[tokio::test]
    async fn test_static_files_bypass_authentication() {
        let dir = tempfile::tempdir().unwrap();
        let static_dir = tempfile::tempdir().unwrap();
        std::fs::write(static_dir.path().join("robots.txt"), "User-agent: *\n").unwrap();

        let mut config = AppConfig::default();
        config.server.static_dir = static_dir.path().to_path_buf();
        let app = app_with(config, &dir);

        let response = app
            .oneshot(request(Method::GET, "/robots.txt", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"User-agent: *\n");
    }

    #[tokio::test]
    async fn test_plain_http_redirected_outside_development() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.server.environment = "production".to_string();
        let app = app_with(config, &dir);

        let req = axum::http::Request::builder()
            .uri("/api/v1/health?x=1")
            .header(header::HOST, "library.example")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://library.example/api/v1/health?x=1"
        );

        let req = axum::http::Request::builder()
            .uri("/api/v1/health")
            .header(header::HOST, "library.example")
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::STRICT_TRANSPORT_SECURITY], HSTS);
    }

    #[tokio::test]
    async fn test_request_token_cancelled_when_request_dropped() {
        let (tx, rx) = tokio::sync::oneshot::channel::<CancellationToken>();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));

        let app = Router::new()
            .route(
                "/slow",
                get(move |ctx: crate::context::RequestContext| {
                    let tx = tx.clone();
                    async move {
                        let sender = tx.lock().unwrap().take();
                        if let Some(sender) = sender {
                            let _ = sender.send(ctx.cancel.clone());
                        }
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        StatusCode::OK
                    }
                }),
            )
            .layer(middleware::from_fn(request_cancellation));

        let call = tokio::spawn(app.oneshot(request(Method::GET, "/slow", None)));
        let cancel = rx.await.unwrap();
        assert!(!cancel.is_cancelled());

        call.abort();
        tokio::time::timeout(Duration::from_secs(5), cancel.cancelled())
            .await
            .unwrap();
    }
}
