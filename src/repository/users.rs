//! Users repository for database operations

use std::collections::HashMap;

use sqlx::{PgConnection, Pool, Postgres};

use super::{like_pattern, UnitOfWork};
use crate::{
    error::{AppError, AppResult},
    mapper::merge_by_key,
    models::user::{Role, User, UserQuery},
};

#[derive(Clone)]
pub struct UsersRepository {
    pool: Pool<Postgres>,
}

impl UsersRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get user by ID, roles included
    pub async fn get_by_id(&self, id: i32) -> AppResult<User> {
        let mut user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))?;

        let mut conn = self.pool.acquire().await?;
        user.roles = Self::roles_of(&mut conn, id).await?;
        Ok(user)
    }

    /// Get user by login (case-insensitive), roles included
    pub async fn find_by_login(&self, login: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(login) = LOWER($1)")
            .bind(login)
            .fetch_optional(&self.pool)
            .await?;

        match user {
            Some(mut user) => {
                let mut conn = self.pool.acquire().await?;
                user.roles = Self::roles_of(&mut conn, user.id).await?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    /// List users ordered by login
    pub async fn list(&self, query: &UserQuery) -> AppResult<(Vec<User>, i64)> {
        let paging = query.paging();
        let pattern = like_pattern(query.login.as_deref());

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE ($1::text IS NULL OR login ILIKE $1)")
                .bind(&pattern)
                .fetch_one(&self.pool)
                .await?;

        let mut users = sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE ($1::text IS NULL OR login ILIKE $1)
            ORDER BY LOWER(login), id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(&pattern)
        .bind(paging.per_page)
        .bind(paging.offset())
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<i32> = users.iter().map(|u| u.id).collect();
        let rows = sqlx::query_as::<_, (i32, Role)>(
            r#"
            SELECT ur.user_id, r.name
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = ANY($1)
            ORDER BY r.id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_user: HashMap<i32, Vec<Role>> = HashMap::new();
        for (user_id, role) in rows {
            by_user.entry(user_id).or_default().push(role);
        }
        for user in &mut users {
            user.roles = by_user.remove(&user.id).unwrap_or_default();
        }

        Ok((users, total))
    }

    /// Roles granted to a user, least privileged first
    pub(crate) async fn roles_of(conn: &mut PgConnection, user_id: i32) -> AppResult<Vec<Role>> {
        let roles = sqlx::query_scalar::<_, Role>(
            r#"
            SELECT r.name FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = $1
            ORDER BY r.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(roles)
    }

    /// Insert a user and its roles
    pub async fn create(&self, uow: &mut UnitOfWork, user: &User) -> AppResult<User> {
        let mut created = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (login, email, display_name, password_hash, locale)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&user.login)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(&user.locale)
        .fetch_one(uow.conn())
        .await
        .map_err(|e| match AppError::from_constraint(e, AppError::Validation("Invalid user".into())) {
            AppError::Conflict(_) => AppError::Conflict(format!("Login '{}' is already taken", user.login)),
            other => other,
        })?;

        created.roles = self.set_roles(uow, created.id, &user.roles).await?;
        Ok(created)
    }

    /// Reconcile the role set of a user with `roles`
    pub async fn set_roles(&self, uow: &mut UnitOfWork, user_id: i32, roles: &[Role]) -> AppResult<Vec<Role>> {
        let current = Self::roles_of(uow.conn(), user_id).await?;
        let plan = merge_by_key(&current, roles, |r| *r);

        for role in &plan.remove {
            sqlx::query(
                "DELETE FROM user_roles WHERE user_id = $1 AND role_id = (SELECT id FROM roles WHERE name = $2)",
            )
            .bind(user_id)
            .bind(role)
            .execute(uow.conn())
            .await?;
        }
        for role in &plan.add {
            sqlx::query(
                "INSERT INTO user_roles (user_id, role_id) SELECT $1, id FROM roles WHERE name = $2",
            )
            .bind(user_id)
            .bind(role)
            .execute(uow.conn())
            .await
            .map_err(|e| {
                AppError::from_constraint(e, AppError::NotFound(format!("User with id {} not found", user_id)))
            })?;
        }

        Self::roles_of(uow.conn(), user_id).await
    }

    /// Whether any account holds the admin role
    pub async fn has_admin(&self) -> AppResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM user_roles ur JOIN roles r ON r.id = ur.role_id WHERE r.name = 'admin'
            )
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
