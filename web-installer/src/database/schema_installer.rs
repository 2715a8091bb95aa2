// Schema installation
//
// Points the "default" connection at the configured database and runs the full pending
// migration set under a timeout. Any non-success (false, error, timeout) is a Schema error.

use log::{error, info};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::database::connection::{ConnectionRegistry, DatabaseConfig};
use crate::database::migrations::Migrator;
use crate::error::InstallError;
use crate::models::config::DEFAULT_CONNECTION_NAME;
use crate::models::settings::DatabaseSettings;

pub struct SchemaInstaller {
    registry: Arc<dyn ConnectionRegistry>,
    migrator: Arc<dyn Migrator>,
    migration_timeout: Duration,
}

impl SchemaInstaller {
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        migrator: Arc<dyn Migrator>,
        migration_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            migrator,
            migration_timeout,
        }
    }

    /// Replace the default connection with one built from `settings`.
    pub async fn register(&self, settings: &DatabaseSettings) -> Result<(), InstallError> {
        let config = DatabaseConfig::build_config(settings);
        self.registry
            .replace(DEFAULT_CONNECTION_NAME, &config)
            .await
            .map_err(|e| {
                error!(
                    "[PHASE: install] [STEP: schema] Connection registration failed: {}",
                    e.internal_details
                );
                InstallError::Schema {
                    reason: e.user_message,
                }
            })
    }

    /// Register the connection and apply every pending migration.
    pub async fn install(&self, settings: &DatabaseSettings) -> Result<(), InstallError> {
        self.register(settings).await?;

        let started = Instant::now();
        info!(
            "[PHASE: install] [STEP: schema] Running migrations (timeout_ms={})",
            self.migration_timeout.as_millis()
        );

        let reason = match timeout(
            self.migration_timeout,
            self.migrator.migrate(DEFAULT_CONNECTION_NAME),
        )
        .await
        {
            Ok(Ok(true)) => {
                info!(
                    "[PHASE: install] [STEP: schema] Migrations complete (duration_ms={})",
                    started.elapsed().as_millis()
                );
                return Ok(());
            }
            Ok(Ok(false)) => "the migrations reported no success".to_string(),
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => format!(
                "the migrations did not finish within {:?}",
                self.migration_timeout
            ),
        };

        error!(
            "[PHASE: install] [STEP: schema] The database cannot be installed: {}",
            reason
        );
        Err(InstallError::Schema { reason })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::database::connection::ConnectError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct StubRegistry {
        pub configs: Mutex<Vec<(String, DatabaseConfig)>>,
        pub fail: bool,
    }

    #[async_trait]
    impl ConnectionRegistry for StubRegistry {
        async fn replace(&self, name: &str, config: &DatabaseConfig) -> Result<(), ConnectError> {
            if self.fail {
                return Err(ConnectError {
                    user_message: "Unable to connect.".to_string(),
                    internal_details: "stub".to_string(),
                });
            }
            self.configs
                .lock()
                .await
                .push((name.to_string(), config.clone()));
            Ok(())
        }

        async fn registered(&self) -> Vec<String> {
            self.configs
                .lock()
                .await
                .iter()
                .map(|(n, _)| n.clone())
                .collect()
        }
    }

    #[derive(Clone, Copy)]
    pub(crate) enum MigrateBehavior {
        Succeed,
        ReportFalse,
        Fail,
        Hang,
    }

    pub(crate) struct StubMigrator {
        pub behavior: MigrateBehavior,
        pub calls: AtomicU32,
    }

    impl StubMigrator {
        pub(crate) fn new(behavior: MigrateBehavior) -> Self {
            Self {
                behavior,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Migrator for StubMigrator {
        async fn migrate(&self, connection_name: &str) -> anyhow::Result<bool> {
            assert_eq!(connection_name, DEFAULT_CONNECTION_NAME);
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                MigrateBehavior::Succeed => Ok(true),
                MigrateBehavior::ReportFalse => Ok(false),
                MigrateBehavior::Fail => anyhow::bail!("table users already exists"),
                MigrateBehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(true)
                }
            }
        }
    }

    pub(crate) fn db_settings() -> DatabaseSettings {
        DatabaseSettings {
            host: "localhost".to_string(),
            port: 3306,
            username: "passbolt".to_string(),
            password: "pw".to_string(),
            database: "passbolt".to_string(),
        }
    }

    fn installer(
        registry: Arc<StubRegistry>,
        migrator: Arc<StubMigrator>,
        limit: Duration,
    ) -> SchemaInstaller {
        SchemaInstaller::new(registry, migrator, limit)
    }

    #[tokio::test]
    async fn success_registers_default_with_utc_and_utf8() {
        let registry = Arc::new(StubRegistry::default());
        let migrator = Arc::new(StubMigrator::new(MigrateBehavior::Succeed));

        installer(registry.clone(), migrator.clone(), Duration::from_secs(5))
            .install(&db_settings())
            .await
            .unwrap();

        let configs = registry.configs.lock().await;
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].0, "default");
        assert_eq!(configs[0].1.encoding, "utf8");
        assert_eq!(configs[0].1.timezone, "UTC");
        assert_eq!(migrator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn false_and_errors_are_schema_errors() {
        for behavior in [MigrateBehavior::ReportFalse, MigrateBehavior::Fail] {
            let err = installer(
                Arc::new(StubRegistry::default()),
                Arc::new(StubMigrator::new(behavior)),
                Duration::from_secs(5),
            )
            .install(&db_settings())
            .await
            .unwrap_err();
            assert_eq!(err.code(), "SCHEMA_ERROR");
        }
    }

    #[tokio::test]
    async fn hung_migration_times_out() {
        let err = installer(
            Arc::new(StubRegistry::default()),
            Arc::new(StubMigrator::new(MigrateBehavior::Hang)),
            Duration::from_millis(100),
        )
        .install(&db_settings())
        .await
        .unwrap_err();
        assert!(err.to_string().contains("did not finish within 100ms"));
    }

    #[tokio::test]
    async fn registration_failure_skips_migrations() {
        let migrator = Arc::new(StubMigrator::new(MigrateBehavior::Succeed));
        let err = installer(
            Arc::new(StubRegistry {
                fail: true,
                ..Default::default()
            }),
            migrator.clone(),
            Duration::from_secs(5),
        )
        .install(&db_settings())
        .await
        .unwrap_err();
        assert_eq!(err.code(), "SCHEMA_ERROR");
        assert_eq!(migrator.calls.load(Ordering::SeqCst), 0);
    }
}
