use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{DuplicateKey, NewUser, ProfileChanges, User};

const USER_COLUMNS: &str = "id, email, username, password_hash, fullname, age, gender, country, \
     preferred_language, height, weight, social_login, is_social_login, created_at, updated_at";

/// Durable identity facts. Consumed by the auth orchestrator and the profile
/// handlers.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    /// Users holding either the email or the username.
    async fn find_conflicts(&self, email: &str, username: &str) -> anyhow::Result<Vec<User>>;
    /// Fails with [`DuplicateKey`] when email or username is taken.
    async fn create(&self, user: NewUser) -> anyhow::Result<User>;
    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        social_login: bool,
    ) -> anyhow::Result<()>;
    async fn update_profile(&self, id: Uuid, changes: ProfileChanges)
        -> anyhow::Result<Option<User>>;
    async fn update_measurements(&self, id: Uuid, height: f64, weight: f64) -> anyhow::Result<()>;
    /// `false` if the user did not exist.
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Turns a unique violation into [`DuplicateKey`] naming the column.
fn map_unique(e: sqlx::Error) -> anyhow::Error {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            let field = match db_err.constraint() {
                Some(c) if c.contains("username") => "username",
                _ => "email",
            };
            return DuplicateKey(field).into();
        }
    }
    e.into()
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_conflicts(&self, email: &str, username: &str) -> anyhow::Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 OR username = $2"
        ))
        .bind(email)
        .bind(username)
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    async fn create(&self, user: NewUser) -> anyhow::Result<User> {
        let created = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, username, password_hash, fullname, age, gender, country,
                               preferred_language, height, weight, social_login, is_social_login)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.fullname)
        .bind(user.age)
        .bind(&user.gender)
        .bind(&user.country)
        .bind(&user.preferred_language)
        .bind(user.height)
        .bind(user.weight)
        .bind(user.social_login)
        .fetch_one(&self.db)
        .await
        .map_err(map_unique)?;
        Ok(created)
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        social_login: bool,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2, social_login = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .bind(social_login)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        changes: ProfileChanges,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET fullname = COALESCE($2, fullname),
                username = COALESCE($3, username),
                age = COALESCE($4, age),
                gender = COALESCE($5, gender),
                country = COALESCE($6, country),
                preferred_language = COALESCE($7, preferred_language),
                updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.fullname)
        .bind(changes.username)
        .bind(changes.age)
        .bind(changes.gender)
        .bind(changes.country)
        .bind(changes.preferred_language)
        .fetch_optional(&self.db)
        .await
        .map_err(map_unique)?;
        Ok(user)
    }

    async fn update_measurements(&self, id: Uuid, height: f64, weight: f64) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET height = $2, weight = $3, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(height)
            .bind(weight)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        // bmi_records cascade
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
