// Database connection management
//
// The application talks to one named connection ("default"). The installer builds its
// configuration from the wizard's `database` answers, registers it (replacing whatever was
// registered before), and hands the name to the migration and user-store collaborators.
//
// ConnectionRegistry is the seam: production uses MySqlConnectionRegistry; tests stub it.

use async_trait::async_trait;
use log::{info, warn};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;

use crate::models::settings::DatabaseSettings;
use crate::utils::logging::describe_database_target;

/// Tables a populated schema must contain.
pub const EXPECTED_SCHEMA_TABLES: &[&str] = &[
    "authentication_tokens",
    "gpgkeys",
    "groups",
    "groups_users",
    "permissions",
    "profiles",
    "resources",
    "roles",
    "secrets",
    "users",
];

/// Error returned by connection attempts.
/// Keeps user-friendly messages separate from internal details.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{user_message}")]
pub struct ConnectError {
    /// User-friendly message (safe to show in UI)
    pub user_message: String,
    /// Internal details for logging (never contains the password)
    pub internal_details: String,
}

impl ConnectError {
    fn unreachable(details: impl std::fmt::Display) -> Self {
        ConnectError {
            user_message: "A connection could not be established with the credentials provided. Please verify the settings.".to_string(),
            internal_details: details.to_string(),
        }
    }

    fn timed_out(what: &str) -> Self {
        ConnectError {
            user_message: "Connection timed out. Check network connectivity and firewall."
                .to_string(),
            internal_details: format!("{} timed out", what),
        }
    }
}

/// Connection configuration for the application database.
#[derive(Clone, PartialEq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub encoding: String,
    pub timezone: String,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("database", &self.database)
            .field("encoding", &self.encoding)
            .field("timezone", &self.timezone)
            .finish()
    }
}

impl DatabaseConfig {
    /// Build the connection configuration from the wizard's database answers.
    pub fn build_config(settings: &DatabaseSettings) -> Self {
        Self {
            host: settings.host.trim().to_string(),
            port: settings.port,
            username: settings.username.trim().to_string(),
            password: settings.password.clone(),
            database: settings.database.trim().to_string(),
            encoding: "utf8".to_string(),
            timezone: "UTC".to_string(),
        }
    }

    pub fn describe(&self) -> String {
        describe_database_target(&self.host, self.port, &self.database, &self.username)
    }

    /// MySQL session time zone for the configured zone name.
    fn session_time_zone(&self) -> String {
        match self.timezone.as_str() {
            "UTC" | "utc" | "Z" => "+00:00".to_string(),
            other => other.to_string(),
        }
    }

    pub fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
            .database(&self.database)
            .charset(&self.encoding)
            .timezone(Some(self.session_time_zone()))
    }
}

/// Named connection registry.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Register `config` under `name`, replacing any existing registration.
    async fn replace(&self, name: &str, config: &DatabaseConfig) -> Result<(), ConnectError>;

    /// Names currently registered.
    async fn registered(&self) -> Vec<String>;

    /// Get the timeout duration for connection attempts.
    fn timeout_duration(&self) -> Duration {
        Duration::from_secs(20)
    }
}

/// Registry of MySQL pools. Pools connect lazily; the first query opens a connection.
#[derive(Default)]
pub struct MySqlConnectionRegistry {
    pools: RwLock<HashMap<String, MySqlPool>>,
}

impl MySqlConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pool(&self, name: &str) -> Option<MySqlPool> {
        self.pools.read().await.get(name).cloned()
    }

    async fn require_pool(&self, name: &str) -> Result<MySqlPool, ConnectError> {
        self.pool(name).await.ok_or_else(|| ConnectError {
            user_message: "The database connection is not configured.".to_string(),
            internal_details: format!("no connection registered under '{}'", name),
        })
    }

    /// Execute a trivial statement on the named connection.
    pub async fn test_connection(&self, name: &str) -> Result<(), ConnectError> {
        let pool = self.require_pool(name).await?;
        match timeout(self.timeout_duration(), sqlx::query("SHOW TABLES").fetch_all(&pool)).await {
            Ok(Ok(_)) => {
                info!(
                    "[PHASE: database] [STEP: test_connection] Connection '{}' is usable",
                    name
                );
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(
                    "[PHASE: database] [STEP: test_connection] Connection '{}' failed: {}",
                    name, e
                );
                Err(ConnectError::unreachable(e))
            }
            Err(_) => Err(ConnectError::timed_out("test_connection")),
        }
    }

    /// Number of administrators in the named database.
    ///
    /// An empty database has none. A database with tables but without the expected schema is
    /// an error, since installing over it would mix two schemas.
    pub async fn check_db_has_admin(&self, name: &str) -> Result<i64, ConnectError> {
        let pool = self.require_pool(name).await?;

        let tables: Vec<String> = timeout(
            self.timeout_duration(),
            sqlx::query_scalar::<_, String>(
                "SELECT CAST(table_name AS CHAR) FROM information_schema.tables WHERE table_schema = DATABASE()",
            )
            .fetch_all(&pool),
        )
        .await
        .map_err(|_| ConnectError::timed_out("check_db_has_admin"))?
        .map_err(ConnectError::unreachable)?;

        if tables.is_empty() {
            return Ok(0);
        }

        let missing = missing_schema_tables(&tables);
        if !missing.is_empty() {
            return Err(ConnectError {
                user_message: "The database schema does not match the one expected.".to_string(),
                internal_details: format!("missing tables: {}", missing.join(", ")),
            });
        }

        let admins: i64 = timeout(
            self.timeout_duration(),
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM users u INNER JOIN roles r ON r.id = u.role_id WHERE r.name = ?",
            )
            .bind(crate::models::user::ROLE_ADMIN)
            .fetch_one(&pool),
        )
        .await
        .map_err(|_| ConnectError::timed_out("check_db_has_admin"))?
        .map_err(ConnectError::unreachable)?;

        info!(
            "[PHASE: database] [STEP: check_db_has_admin] Connection '{}' has {} admin(s)",
            name, admins
        );
        Ok(admins)
    }
}

/// Expected tables absent from `tables` (case-insensitive).
pub fn missing_schema_tables(tables: &[String]) -> Vec<&'static str> {
    EXPECTED_SCHEMA_TABLES
        .iter()
        .copied()
        .filter(|expected| !tables.iter().any(|t| t.eq_ignore_ascii_case(expected)))
        .collect()
}

#[async_trait]
impl ConnectionRegistry for MySqlConnectionRegistry {
    async fn replace(&self, name: &str, config: &DatabaseConfig) -> Result<(), ConnectError> {
        info!(
            "[PHASE: database] [STEP: register_connection] Registering '{}' ({})",
            name,
            config.describe()
        );

        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(self.timeout_duration())
            .connect_lazy_with(config.connect_options());

        let previous = self.pools.write().await.insert(name.to_string(), pool);
        if let Some(old) = previous {
            old.close().await;
        }
        Ok(())
    }

    async fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pools.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
