//! Per-request context handed from handlers to services

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tokio_util::sync::CancellationToken;

use crate::{i18n::Locale, models::user::UserClaims};

/// What a service needs to know about the request it works for
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Fires when the client goes away or the request times out
    pub cancel: CancellationToken,
    /// Authenticated caller, `None` on public routes
    pub user: Option<UserClaims>,
    pub locale: Locale,
}

impl RequestContext {
    /// Context for work not tied to a request (startup, tests)
    pub fn background() -> Self {
        Self::default()
    }

    pub fn user_id(&self) -> Option<i32> {
        self.user.as_ref().map(|u| u.user_id)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self {
            cancel: parts
                .extensions
                .get::<CancellationToken>()
                .cloned()
                .unwrap_or_default(),
            user: parts.extensions.get::<UserClaims>().cloned(),
            locale: parts.extensions.get::<Locale>().copied().unwrap_or_default(),
        })
    }
}
