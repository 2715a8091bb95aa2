// Installer entry points
//
// Wire the production collaborators (gpg binary, MySQL registry, manifest migrations, SQL user
// store) around a settings store and turn the result into the HTTP-facing payload.

use log::{error, info};
use serde_json::json;
use std::sync::Arc;

use crate::database::connection::{ConnectionRegistry, DatabaseConfig, MySqlConnectionRegistry};
use crate::database::migrations::MigrationRunner;
use crate::database::schema_installer::SchemaInstaller;
use crate::database::users::SqlUserStore;
use crate::error::InstallError;
use crate::installation::admin::AdminBootstrapper;
use crate::installation::config_writer::ConfigWriter;
use crate::installation::keys::KeyProvisioner;
use crate::installation::orchestrator::Installer;
use crate::models::config::{InstallerConfig, DEFAULT_CONNECTION_NAME};
use crate::models::responses::InstallResponse;
use crate::models::settings::{DatabaseSettings, KEY_DATABASE};
use crate::security::gpg::GpgCli;
use crate::session::SettingsStore;

/// Build the orchestrator over the production collaborators. The registry is returned so
/// callers can reuse the "default" connection afterwards.
pub fn build_installer(config: &InstallerConfig) -> (Installer, Arc<MySqlConnectionRegistry>) {
    let registry = Arc::new(MySqlConnectionRegistry::new());
    let keyring = Arc::new(GpgCli::new(
        config.gpg_binary.clone(),
        config.gnupg_home.clone(),
        config.gpg_timeout(),
    ));
    let migrator = Arc::new(MigrationRunner::new(
        registry.clone(),
        config.migrations_dir.clone(),
    ));
    let users = Arc::new(SqlUserStore::new(registry.clone(), DEFAULT_CONNECTION_NAME));

    let installer = Installer::new(
        KeyProvisioner::from_config(keyring, config),
        ConfigWriter::new(config),
        SchemaInstaller::new(registry.clone(), migrator, config.migration_timeout()),
        AdminBootstrapper::new(users.clone(), users.clone(), users),
    );
    (installer, registry)
}

/// Run the full install and render the payload the installer page expects.
pub async fn run_install(config: &InstallerConfig, store: &dyn SettingsStore) -> InstallResponse {
    info!("[PHASE: install] [STEP: start] Install requested");
    let (installer, _registry) = build_installer(config);
    match installer.install(store).await {
        Ok(outcome) => InstallResponse::ok(outcome.user),
        Err(e) => {
            error!(
                "[PHASE: install] [STEP: respond] Install failed (code={})",
                e.code()
            );
            InstallResponse::from(&e)
        }
    }
}

/// Check the database answers: connect, then count existing administrators. The error side is
/// the failure payload to show.
pub async fn check_database(store: &dyn SettingsStore) -> Result<i64, InstallResponse> {
    let db = match store.snapshot().await.section::<DatabaseSettings>(KEY_DATABASE) {
        Ok(Some(db)) => db,
        Ok(None) => {
            let e = InstallError::settings(KEY_DATABASE, "the database settings are required");
            return Err(InstallResponse::from(&e));
        }
        Err(e) => return Err(InstallResponse::from(&e)),
    };

    let registry = MySqlConnectionRegistry::new();
    let config = DatabaseConfig::build_config(&db);
    let checked = async {
        registry.replace(DEFAULT_CONNECTION_NAME, &config).await?;
        registry.test_connection(DEFAULT_CONNECTION_NAME).await?;
        registry.check_db_has_admin(DEFAULT_CONNECTION_NAME).await
    }
    .await;

    match checked {
        Ok(admins) => {
            info!(
                "[PHASE: database] [STEP: check] {} reachable ({} admin(s))",
                config.describe(),
                admins
            );
            Ok(admins)
        }
        Err(e) => {
            error!(
                "[PHASE: database] [STEP: check] {} failed: {}",
                config.describe(),
                e.internal_details
            );
            Err(InstallResponse::fail(
                e.user_message,
                json!({"code": "DATABASE_CONNECTION_ERROR"}),
            ))
        }
    }
}
