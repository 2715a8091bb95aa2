// Users, roles and authentication tokens
//
// Repository traits used by the admin bootstrapper, and their MySQL implementation over the
// application's `users`, `profiles`, `roles` and `authentication_tokens` tables.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::info;
use std::sync::Arc;

use crate::database::connection::MySqlConnectionRegistry;
use crate::models::user::{AuthenticationToken, TokenType, UserData, UserEntity};
use crate::utils::logging::mask_sensitive;

#[async_trait]
pub trait RoleRepository: Send + Sync {
    /// Identifier of the role called `name`, if it exists.
    async fn get_id_by_name(&self, name: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Build and validate an entity. `role_id` and `deleted` override the data.
    fn build_entity(&self, data: &UserData, role_id: &str, deleted: bool) -> UserEntity {
        UserEntity::build(data, role_id, deleted)
    }

    /// Persist a valid entity and set its id. Rule violations (e.g. a taken username) are
    /// added to the entity's errors instead; `Err` is reserved for storage failures.
    async fn save(&self, entity: &mut UserEntity) -> Result<()>;
}

#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Create an active token of `token_type` for `user_id`. Rule violations are reported in the
    /// returned token's errors.
    async fn generate_token(&self, user_id: &str, token_type: TokenType) -> Result<AuthenticationToken>;
}

/// MySQL-backed store for the three repositories.
pub struct SqlUserStore {
    registry: Arc<MySqlConnectionRegistry>,
    connection_name: String,
}

impl SqlUserStore {
    pub fn new(registry: Arc<MySqlConnectionRegistry>, connection_name: impl Into<String>) -> Self {
        Self {
            registry,
            connection_name: connection_name.into(),
        }
    }

    async fn pool(&self) -> Result<sqlx::MySqlPool> {
        self.registry
            .pool(&self.connection_name)
            .await
            .ok_or_else(|| {
                anyhow::anyhow!("No connection registered under '{}'", self.connection_name)
            })
    }
}

#[async_trait]
impl RoleRepository for SqlUserStore {
    async fn get_id_by_name(&self, name: &str) -> Result<Option<String>> {
        let pool = self.pool().await?;
        sqlx::query_scalar::<_, String>("SELECT id FROM roles WHERE name = ? LIMIT 1")
            .bind(name)
            .fetch_optional(&pool)
            .await
            .with_context(|| format!("Failed to look up role '{}'", name))
    }
}

#[async_trait]
impl UserRepository for SqlUserStore {
    async fn save(&self, entity: &mut UserEntity) -> Result<()> {
        if entity.has_errors() {
            return Ok(());
        }
        let pool = self.pool().await?;

        let taken: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE username = ? AND deleted = 0",
        )
        .bind(&entity.username)
        .fetch_one(&pool)
        .await
        .context("Failed to check username uniqueness")?;
        if taken > 0 {
            entity.add_error("username", "The username is already in use.");
            return Ok(());
        }

        let user_id = uuid::Uuid::new_v4().to_string();
        let profile_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let mut tx = pool.begin().await.context("Failed to begin transaction")?;
        sqlx::query(
            "INSERT INTO users (id, role_id, username, active, deleted, created, modified) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user_id)
        .bind(&entity.role_id)
        .bind(&entity.username)
        .bind(entity.active)
        .bind(entity.deleted)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to insert user")?;

        sqlx::query(
            "INSERT INTO profiles (id, user_id, first_name, last_name, created, modified) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&profile_id)
        .bind(&user_id)
        .bind(&entity.first_name)
        .bind(&entity.last_name)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to insert profile")?;

        tx.commit().await.context("Failed to commit user")?;

        info!(
            "[PHASE: install] [STEP: first_user] User saved (user_id={})",
            user_id
        );
        entity.id = Some(user_id);
        Ok(())
    }
}

#[async_trait]
impl TokenRepository for SqlUserStore {
    async fn generate_token(&self, user_id: &str, token_type: TokenType) -> Result<AuthenticationToken> {
        let mut token = AuthenticationToken::new_register(user_id);
        token.token_type = token_type;
        if uuid::Uuid::parse_str(user_id).is_err() {
            token
                .errors
                .entry("user_id".to_string())
                .or_default()
                .push("The user identifier should be a valid UUID.".to_string());
            return Ok(token);
        }

        let pool = self.pool().await?;
        let token_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        sqlx::query(
            "INSERT INTO authentication_tokens (id, token, user_id, type, active, created, modified) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&token_id)
        .bind(&token.token)
        .bind(user_id)
        .bind(token.token_type.as_str())
        .bind(token.active)
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .context("Failed to insert authentication token")?;

        info!(
            "[PHASE: install] [STEP: first_user] {} token created (user_id={}, token={})",
            token.token_type.as_str(),
            user_id,
            mask_sensitive(&token.token)
        );
        token.id = Some(token_id);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SqlUserStore {
        SqlUserStore::new(Arc::new(MySqlConnectionRegistry::new()), "default")
    }

    #[tokio::test]
    async fn invalid_entity_is_not_saved() {
        let data = json!({"username": "not-an-email", "first_name": "Ada", "last_name": "Lovelace"});
        let store = store();
        let mut entity = store.build_entity(data.as_object().unwrap(), "role-id", false);

        // No connection is registered; reaching the database would fail.
        store.save(&mut entity).await.unwrap();

        assert!(entity.id.is_none());
        assert!(entity.errors().contains_key("username"));
    }

    #[tokio::test]
    async fn token_for_invalid_user_id_reports_errors() {
        let token = store()
            .generate_token("not-a-uuid", TokenType::Register)
            .await
            .unwrap();
        assert!(token.has_errors());
        assert!(token.errors.contains_key("user_id"));
    }

    #[tokio::test]
    async fn valid_entity_without_connection_is_a_storage_error() {
        let data = json!({"username": "ada@x.com", "first_name": "Ada", "last_name": "Lovelace"});
        let store = store();
        let mut entity = store.build_entity(data.as_object().unwrap(), "role-id", false);

        let err = store.save(&mut entity).await.unwrap_err();
        assert!(err.to_string().contains("No connection registered"));
    }
}
