//! Identity provider: credentials, roles and bearer tokens

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use validator::Validate;

use crate::{
    config::AuthConfig,
    context::RequestContext,
    error::{AppError, AppResult},
    models::user::{
        satisfies, Identity, LoginRequest, LoginResponse, RegisterUser, Role, User, UserClaims,
        UserQuery,
    },
    repository::{cancellable, Repository},
};

const INVALID_CREDENTIALS: &str = "Invalid login or password";

/// Contract consumed by the request pipeline
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Check credentials
    async fn authenticate(&self, login: &str, password: &str) -> AppResult<Identity>;

    /// Whether the user holds `required` or a more privileged role
    async fn authorize(&self, user_id: i32, required: Role) -> AppResult<bool>;
}

#[derive(Clone)]
pub struct IdentityService {
    repository: Repository,
    config: AuthConfig,
}

impl IdentityService {
    pub fn new(repository: Repository, config: AuthConfig) -> Self {
        Self { repository, config }
    }

    /// Create a reader account
    pub async fn register(&self, ctx: &RequestContext, data: RegisterUser) -> AppResult<User> {
        let data = data.normalized();
        data.validate()?;
        let password_hash = hash_password(data.password).await?;
        let now = Utc::now();

        let user = User {
            id: 0,
            login: data.login,
            email: data.email,
            display_name: data.display_name,
            password_hash,
            locale: data.locale,
            created_at: now,
            updated_at: now,
            roles: vec![Role::Reader],
        };

        let created = cancellable(&ctx.cancel, async {
            let mut uow = self.repository.begin().await?;
            let created = self.repository.users.create(&mut uow, &user).await?;
            uow.commit().await?;
            Ok(created)
        })
        .await?;

        tracing::info!("Registered user {} ({})", created.id, created.login);
        Ok(created)
    }

    /// Authenticate and issue a bearer token
    pub async fn login(&self, ctx: &RequestContext, data: LoginRequest) -> AppResult<LoginResponse> {
        data.validate()?;
        let identity = cancellable(&ctx.cancel, self.authenticate(&data.login, &data.password)).await?;
        let user = cancellable(&ctx.cancel, self.repository.users.get_by_id(identity.user_id)).await?;

        let (token, expires_in) = self.issue_token(&identity)?;
        tracing::info!("User {} logged in", identity.login);
        Ok(LoginResponse {
            token,
            token_type: "Bearer".to_string(),
            expires_in,
            user,
        })
    }

    fn issue_token(&self, identity: &Identity) -> AppResult<(String, i64)> {
        let now = Utc::now().timestamp();
        let expires_in = self.config.jwt_expiration_hours as i64 * 3600;
        let claims = UserClaims {
            sub: identity.login.clone(),
            user_id: identity.user_id,
            roles: identity.roles.clone(),
            exp: now + expires_in,
            iat: now,
        };
        let token = claims
            .create_token(&self.config.jwt_secret)
            .map_err(|e| AppError::Internal(format!("Failed to create token: {}", e)))?;
        Ok((token, expires_in))
    }

    /// Decode a bearer token
    pub fn verify_token(&self, token: &str) -> AppResult<UserClaims> {
        UserClaims::from_token(token, &self.config.jwt_secret)
            .map_err(|_| AppError::Authentication("Invalid or expired token".to_string()))
    }

    pub async fn get_user(&self, ctx: &RequestContext, id: i32) -> AppResult<User> {
        cancellable(&ctx.cancel, self.repository.users.get_by_id(id)).await
    }

    pub async fn list_users(&self, ctx: &RequestContext, query: &UserQuery) -> AppResult<(Vec<User>, i64)> {
        cancellable(&ctx.cancel, self.repository.users.list(query)).await
    }

    /// Replace the role set of a user. An administrator cannot drop their own
    /// admin role, so the last administrator cannot lock everyone out.
    pub async fn set_roles(&self, ctx: &RequestContext, id: i32, roles: Vec<Role>) -> AppResult<User> {
        // Tokens outlive role changes; confirm the caller is still an administrator
        if let Some(caller) = ctx.user_id() {
            if !cancellable(&ctx.cancel, self.authorize(caller, Role::Admin)).await? {
                return Err(AppError::Authorization("The admin role is required".to_string()));
            }
        }
        if ctx.user_id() == Some(id) && !roles.contains(&Role::Admin) {
            return Err(AppError::Validation(
                "You cannot remove the admin role from your own account".to_string(),
            ));
        }

        cancellable(&ctx.cancel, async {
            self.repository.users.get_by_id(id).await?;
            let mut uow = self.repository.begin().await?;
            self.repository.users.set_roles(&mut uow, id, &roles).await?;
            uow.commit().await?;
            self.repository.users.get_by_id(id).await
        })
        .await
    }

    /// Create the configured administrator when no account holds the admin role
    pub async fn bootstrap_admin(&self) -> AppResult<()> {
        let (Some(login), Some(password)) = (&self.config.admin_login, &self.config.admin_password) else {
            return Ok(());
        };
        if self.repository.users.has_admin().await? {
            return Ok(());
        }

        if let Some(existing) = self.repository.users.find_by_login(login).await? {
            let mut roles = existing.roles.clone();
            roles.push(Role::Admin);
            let mut uow = self.repository.begin().await?;
            self.repository.users.set_roles(&mut uow, existing.id, &roles).await?;
            uow.commit().await?;
            tracing::warn!("Granted the admin role to existing user {}", login);
            return Ok(());
        }

        let now = Utc::now();
        let admin = User {
            id: 0,
            login: login.clone(),
            email: None,
            display_name: Some("Administrator".to_string()),
            password_hash: hash_password(password.clone()).await?,
            locale: None,
            created_at: now,
            updated_at: now,
            roles: vec![Role::Reader, Role::Librarian, Role::Admin],
        };
        let mut uow = self.repository.begin().await?;
        self.repository.users.create(&mut uow, &admin).await?;
        uow.commit().await?;
        tracing::info!("Created bootstrap administrator {}", login);
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for IdentityService {
    async fn authenticate(&self, login: &str, password: &str) -> AppResult<Identity> {
        let Some(user) = self.repository.users.find_by_login(login.trim()).await? else {
            // Unknown logins cost a full verification too
            verify_against_decoy(password.to_string()).await?;
            return Err(AppError::Authentication(INVALID_CREDENTIALS.to_string()));
        };

        if !verify_password(password.to_string(), user.password_hash.clone()).await? {
            return Err(AppError::Authentication(INVALID_CREDENTIALS.to_string()));
        }

        Ok(Identity {
            user_id: user.id,
            login: user.login,
            roles: user.roles,
        })
    }

    async fn authorize(&self, user_id: i32, required: Role) -> AppResult<bool> {
        let user = match self.repository.users.get_by_id(user_id).await {
            Ok(user) => user,
            Err(AppError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        Ok(satisfies(&user.roles, required))
    }
}

/// Hash a password using Argon2, off the async workers
async fn hash_password(password: String) -> AppResult<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
    })
    .await
    .map_err(|e| AppError::Internal(format!("Password hashing task failed: {}", e)))?
}

/// Hash of a throwaway password, checked when the login does not exist
static DECOY_HASH: Lazy<Option<String>> = Lazy::new(|| {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(b"no-such-account", &salt)
        .map(|hash| hash.to_string())
        .ok()
});

async fn verify_against_decoy(password: String) -> AppResult<()> {
    tokio::task::spawn_blocking(move || {
        if let Some(parsed) = DECOY_HASH.as_deref().and_then(|h| PasswordHash::new(h).ok()) {
            let _ = Argon2::default().verify_password(password.as_bytes(), &parsed);
        }
    })
    .await
    .map_err(|e| AppError::Internal(format!("Password check task failed: {}", e)))
}

async fn verify_password(password: String, hash: String) -> AppResult<bool> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash)
            .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|e| AppError::Internal(format!("Password check task failed: {}", e)))?
}
