// Install orchestrator
//
// START -> KEY_PROVISIONED -> CONFIG_WRITTEN -> SCHEMA_INSTALLED -> ADMIN_CREATED -> DONE
//
// Every run starts at START. Steps whose outcome is already recorded short-circuit:
// - `gpg.fingerprint` set: no key work
// - `install.schema_migrated` set: the connection is registered, no migration
// - `user.token` set: no admin creation
// The configuration file is always rewritten. Settings are persisted after every transition;
// the first failure stops the run and is returned as is (no rollback, no internal retry).

use log::{error, info};
use serde_json::json;
use std::path::PathBuf;
use std::time::Instant;

use crate::database::schema_installer::SchemaInstaller;
use crate::error::InstallError;
use crate::installation::admin::AdminBootstrapper;
use crate::installation::config_writer::ConfigWriter;
use crate::installation::keys::KeyProvisioner;
use crate::models::settings::{
    CreatedUser, DatabaseSettings, KEY_DATABASE, KEY_INITIALIZED, KEY_INSTALL_STATE,
    KEY_SCHEMA_MIGRATED, KEY_USER,
};
use crate::models::state::InstallState;
use crate::session::SettingsStore;
use crate::utils::validation::validate_mysql_database_name;

#[derive(Debug, Clone, PartialEq)]
pub struct InstallOutcome {
    pub state: InstallState,
    pub fingerprint: Option<String>,
    pub config_path: PathBuf,
    pub user: Option<CreatedUser>,
}

pub struct Installer {
    keys: KeyProvisioner,
    config: ConfigWriter,
    schema: SchemaInstaller,
    admin: AdminBootstrapper,
}

impl Installer {
    pub fn new(
        keys: KeyProvisioner,
        config: ConfigWriter,
        schema: SchemaInstaller,
        admin: AdminBootstrapper,
    ) -> Self {
        Self {
            keys,
            config,
            schema,
            admin,
        }
    }

    async fn advance(
        &self,
        store: &dyn SettingsStore,
        state: InstallState,
    ) -> Result<InstallState, InstallError> {
        store.set(KEY_INSTALL_STATE, json!(state.as_str())).await;
        store.persist().await?;
        info!("[PHASE: install] [STEP: state] {}", state);
        Ok(state)
    }

    /// Run the install sequence against `store`.
    pub async fn install(&self, store: &dyn SettingsStore) -> Result<InstallOutcome, InstallError> {
        let started = Instant::now();
        let result = self.run_steps(store).await;
        match &result {
            Ok(outcome) => info!(
                "[PHASE: install] [STEP: done] Install finished (state={}, duration_ms={})",
                outcome.state,
                started.elapsed().as_millis()
            ),
            Err(e) => error!(
                "[PHASE: install] [STEP: failed] Install stopped (code={}, duration_ms={}): {}",
                e.code(),
                started.elapsed().as_millis(),
                e
            ),
        }
        result
    }

    async fn run_steps(&self, store: &dyn SettingsStore) -> Result<InstallOutcome, InstallError> {
        if let Some(previous) = store
            .get(KEY_INSTALL_STATE)
            .await
            .as_ref()
            .and_then(|v| v.as_str())
            .and_then(InstallState::parse)
        {
            info!(
                "[PHASE: install] [STEP: start] Previous run reached {}; replaying recorded steps",
                previous
            );
        }
        let mut state = self.advance(store, InstallState::Start).await?;

        // Keys
        let key = self.keys.provision(store).await?;
        state = self.advance(store, next_of(state)).await?;

        // Configuration and license
        let config_path = self.config.write_config(store).await?;
        self.config.write_license(store).await?;
        state = self.advance(store, next_of(state)).await?;

        // Schema
        let db: DatabaseSettings = store
            .snapshot()
            .await
            .section(KEY_DATABASE)?
            .ok_or_else(|| InstallError::settings(KEY_DATABASE, "the database settings are required"))?;
        validate_mysql_database_name(&db.database)
            .map_err(|reason| InstallError::settings("database.database", reason))?;
        if matches!(store.get(KEY_SCHEMA_MIGRATED).await, Some(serde_json::Value::Bool(true))) {
            info!("[PHASE: install] [STEP: schema] Schema already installed; registering connection only");
            self.schema.register(&db).await?;
        } else {
            self.schema.install(&db).await?;
            store.set(KEY_SCHEMA_MIGRATED, json!(true)).await;
        }
        state = self.advance(store, next_of(state)).await?;

        // First admin
        let recorded: Option<CreatedUser> = store.snapshot().await.section(KEY_USER)?;
        let user = match recorded.filter(|u| !u.token.trim().is_empty()) {
            Some(existing) => {
                info!(
                    "[PHASE: install] [STEP: first_user] First admin already created (user_id={}); skipping",
                    existing.user_id
                );
                Some(existing)
            }
            None => self.admin.create_first_admin(store).await?,
        };
        state = self.advance(store, next_of(state)).await?;

        store.set(KEY_INITIALIZED, json!(true)).await;
        state = self.advance(store, next_of(state)).await?;

        Ok(InstallOutcome {
            state,
            fingerprint: key.fingerprint().map(str::to_string),
            config_path,
            user,
        })
    }
}

fn next_of(state: InstallState) -> InstallState {
    state.next().unwrap_or(InstallState::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema_installer::tests::{
        db_settings, MigrateBehavior, StubMigrator, StubRegistry,
    };
    use crate::database::users::{RoleRepository, TokenRepository, UserRepository};
    use crate::installation::keys::tests::{StubKeyring, FPR};
    use crate::models::config::InstallerConfig;
    use crate::models::settings::SettingsBag;
    use crate::models::user::{AuthenticationToken, TokenType, UserEntity};
    use crate::session::MemorySettingsStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct StubUserStore {
        calls: AtomicU32,
    }

    #[async_trait]
    impl RoleRepository for StubUserStore {
        async fn get_id_by_name(&self, _name: &str) -> anyhow::Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some("admin-role-id".to_string()))
        }
    }

    #[async_trait]
    impl UserRepository for StubUserStore {
        async fn save(&self, entity: &mut UserEntity) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            entity.id = Some("8f9b5a3e-1c2d-4e5f-8a9b-0c1d2e3f4a5b".to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl TokenRepository for StubUserStore {
        async fn generate_token(
            &self,
            user_id: &str,
            _token_type: TokenType,
        ) -> anyhow::Result<AuthenticationToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AuthenticationToken::new_register(user_id))
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        keyring: Arc<StubKeyring>,
        migrator: Arc<StubMigrator>,
        users: Arc<StubUserStore>,
        installer: Installer,
    }

    fn harness(behavior: MigrateBehavior) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = InstallerConfig {
            config_dir: dir.path().to_path_buf(),
            server_key_public: dir.path().join("gpg/serverkey.asc"),
            server_key_private: dir.path().join("gpg/serverkey_private.asc"),
            ..Default::default()
        };
        let keyring = Arc::new(StubKeyring::default());
        let migrator = Arc::new(StubMigrator::new(behavior));
        let users = Arc::new(StubUserStore::default());

        let installer = Installer::new(
            KeyProvisioner::from_config(keyring.clone(), &config),
            ConfigWriter::new(&config),
            SchemaInstaller::new(
                Arc::new(StubRegistry::default()),
                migrator.clone(),
                Duration::from_secs(5),
            ),
            AdminBootstrapper::new(users.clone(), users.clone(), users.clone()),
        );
        Harness {
            _dir: dir,
            keyring,
            migrator,
            users,
            installer,
        }
    }

    fn wizard_settings() -> MemorySettingsStore {
        let mut bag = SettingsBag::new();
        bag.set(KEY_DATABASE, serde_json::to_value(db_settings()).unwrap());
        bag.set("gpg", json!({"name": "Server Key", "email": "server@x.com"}));
        bag.set(
            "first_user",
            json!({"username": "ada@x.com", "first_name": "Ada", "last_name": "Lovelace"}),
        );
        MemorySettingsStore::new(bag)
    }

    #[tokio::test]
    async fn full_run_reaches_done() {
        let h = harness(MigrateBehavior::Succeed);
        let store = wizard_settings();

        let outcome = h.installer.install(&store).await.unwrap();

        assert_eq!(outcome.state, InstallState::Done);
        assert_eq!(outcome.fingerprint.as_deref(), Some(FPR));
        assert!(outcome.config_path.exists());
        let user = outcome.user.unwrap();
        assert_eq!(store.get("user.token").await, Some(json!(user.token)));
        assert_eq!(store.get(KEY_INSTALL_STATE).await, Some(json!("DONE")));
        assert!(store.is_initialized().await);
        // START plus five transitions
        assert_eq!(store.persist_count(), 6);
    }

    #[tokio::test]
    async fn schema_failure_stops_before_the_user_store() {
        let h = harness(MigrateBehavior::Fail);
        let store = wizard_settings();

        let err = h.installer.install(&store).await.unwrap_err();

        assert_eq!(err.code(), "SCHEMA_ERROR");
        assert_eq!(h.users.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            store.get(KEY_INSTALL_STATE).await,
            Some(json!("CONFIG_WRITTEN"))
        );
        assert!(store.get(KEY_SCHEMA_MIGRATED).await.is_none());
        assert!(!store.is_initialized().await);
    }

    #[tokio::test]
    async fn second_run_is_a_replay() {
        let h = harness(MigrateBehavior::Succeed);
        let store = wizard_settings();

        let first = h.installer.install(&store).await.unwrap();
        let users_after_first = h.users.calls.load(Ordering::SeqCst);
        let second = h.installer.install(&store).await.unwrap();

        assert_eq!(second.state, InstallState::Done);
        assert_eq!(second.user, first.user);
        assert_eq!(h.keyring.generate_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.migrator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.users.calls.load(Ordering::SeqCst), users_after_first);
    }

    #[tokio::test]
    async fn bad_database_name_stops_before_migrations() {
        let h = harness(MigrateBehavior::Succeed);
        let store = wizard_settings();
        store.set("database.database", json!("pass/bolt")).await;

        let err = h.installer.install(&store).await.unwrap_err();

        assert_eq!(err.code(), "SETTINGS_ERROR");
        assert_eq!(h.migrator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            store.get(KEY_INSTALL_STATE).await,
            Some(json!("CONFIG_WRITTEN"))
        );
    }

    #[tokio::test]
    async fn missing_database_settings_fail_at_the_config_step() {
        let h = harness(MigrateBehavior::Succeed);
        let store = MemorySettingsStore::default();

        let err = h.installer.install(&store).await.unwrap_err();

        assert_eq!(err.code(), "SETTINGS_ERROR");
        assert_eq!(
            store.get(KEY_INSTALL_STATE).await,
            Some(json!("KEY_PROVISIONED"))
        );
    }
}
