// First administrator bootstrap
//
// Creates the first user from the `first_user` namespace with the admin role forced, then its
// one-time REGISTER token, and records `user = {user_id, token}` for the host to build the
// registration link.

use log::{error, info};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{FieldErrors, InstallError};
use crate::models::settings::{CreatedUser, KEY_FIRST_USER, KEY_USER};
use crate::models::user::{TokenType, UserData, ROLE_ADMIN};
use crate::database::users::{RoleRepository, TokenRepository, UserRepository};
use crate::session::SettingsStore;
use crate::utils::logging::mask_sensitive;

const USER_FAILURE: &str = "There was a problem creating the first user";
const TOKEN_FAILURE: &str = "There was a problem creating the registration token";

pub struct AdminBootstrapper {
    users: Arc<dyn UserRepository>,
    roles: Arc<dyn RoleRepository>,
    tokens: Arc<dyn TokenRepository>,
}

fn storage_errors(field: &str, e: &anyhow::Error) -> FieldErrors {
    let mut errors = FieldErrors::new();
    errors.insert(field.to_string(), vec![format!("{:#}", e)]);
    errors
}

impl AdminBootstrapper {
    pub fn new(
        users: Arc<dyn UserRepository>,
        roles: Arc<dyn RoleRepository>,
        tokens: Arc<dyn TokenRepository>,
    ) -> Self {
        Self {
            users,
            roles,
            tokens,
        }
    }

    /// Create the first admin from `first_user`. Empty data is a no-op (`Ok(None)`).
    pub async fn create_first_admin(
        &self,
        store: &dyn SettingsStore,
    ) -> Result<Option<CreatedUser>, InstallError> {
        let data: UserData = match store.get(KEY_FIRST_USER).await {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Object(map)) if map.is_empty() => return Ok(None),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(InstallError::settings(KEY_FIRST_USER, "expected an object"));
            }
        };

        let role_id = self
            .roles
            .get_id_by_name(ROLE_ADMIN)
            .await
            .map_err(|e| InstallError::Validation {
                entity: "user".to_string(),
                message: USER_FAILURE.to_string(),
                errors: storage_errors("role_id", &e),
                user_id: None,
            })?
            .unwrap_or_default();

        let mut user = self.users.build_entity(&data, &role_id, false);
        if !user.has_errors() {
            self.users
                .save(&mut user)
                .await
                .map_err(|e| InstallError::Validation {
                    entity: "user".to_string(),
                    message: USER_FAILURE.to_string(),
                    errors: storage_errors("database", &e),
                    user_id: None,
                })?;
        }

        let user_id = match (&user.id, user.has_errors()) {
            (Some(id), false) => id.clone(),
            _ => {
                error!(
                    "[PHASE: install] [STEP: first_user] {} (fields={:?})",
                    USER_FAILURE,
                    user.errors().keys().collect::<Vec<_>>()
                );
                let mut errors = user.errors().clone();
                if errors.is_empty() {
                    errors.insert(
                        "id".to_string(),
                        vec!["The user was not saved.".to_string()],
                    );
                }
                return Err(InstallError::Validation {
                    entity: "user".to_string(),
                    message: USER_FAILURE.to_string(),
                    errors,
                    user_id: None,
                });
            }
        };

        // The user row is committed from here on; failures below carry its id.
        let token = self
            .tokens
            .generate_token(&user_id, TokenType::Register)
            .await
            .map_err(|e| InstallError::Validation {
                entity: "token".to_string(),
                message: TOKEN_FAILURE.to_string(),
                errors: storage_errors("database", &e),
                user_id: Some(user_id.clone()),
            })?;
        if token.has_errors() || token.token.trim().is_empty() {
            error!(
                "[PHASE: install] [STEP: first_user] {} (user_id={})",
                TOKEN_FAILURE, user_id
            );
            return Err(InstallError::Validation {
                entity: "token".to_string(),
                message: TOKEN_FAILURE.to_string(),
                errors: token.errors.clone(),
                user_id: Some(user_id),
            });
        }

        let created = CreatedUser {
            user_id,
            token: token.token,
        };
        store
            .set(KEY_USER, json!({"user_id": created.user_id, "token": created.token}))
            .await;

        info!(
            "[PHASE: install] [STEP: first_user] First admin created (user_id={}, token={})",
            created.user_id,
            mask_sensitive(&created.token)
        );
        Ok(Some(created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::settings::SettingsBag;
    use crate::models::user::{AuthenticationToken, UserEntity};
    use crate::session::MemorySettingsStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    const ADMIN_ROLE_ID: &str = "0d6b6a3c-6f1c-4f1e-9c1b-2b1c0f0f0a01";
    const USER_ID: &str = "8f9b5a3e-1c2d-4e5f-8a9b-0c1d2e3f4a5b";

    #[derive(Default)]
    struct StubUsers {
        saved: Mutex<Vec<UserEntity>>,
        save_calls: AtomicU32,
        token_calls: AtomicU32,
        role_calls: AtomicU32,
        token_fails: bool,
    }

    #[async_trait]
    impl RoleRepository for StubUsers {
        async fn get_id_by_name(&self, name: &str) -> anyhow::Result<Option<String>> {
            self.role_calls.fetch_add(1, Ordering::SeqCst);
            Ok((name == ROLE_ADMIN).then(|| ADMIN_ROLE_ID.to_string()))
        }
    }

    #[async_trait]
    impl UserRepository for StubUsers {
        async fn save(&self, entity: &mut UserEntity) -> anyhow::Result<()> {
            self.save_calls.fetch_add(1, Ordering::SeqCst);
            entity.id = Some(USER_ID.to_string());
            self.saved.lock().await.push(entity.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl TokenRepository for StubUsers {
        async fn generate_token(
            &self,
            user_id: &str,
            _token_type: TokenType,
        ) -> anyhow::Result<AuthenticationToken> {
            self.token_calls.fetch_add(1, Ordering::SeqCst);
            let mut token = AuthenticationToken::new_register(user_id);
            if self.token_fails {
                token
                    .errors
                    .insert("token".to_string(), vec!["The token is invalid.".to_string()]);
            }
            Ok(token)
        }
    }

    fn bootstrapper(stub: Arc<StubUsers>) -> AdminBootstrapper {
        AdminBootstrapper::new(stub.clone(), stub.clone(), stub)
    }

    fn store_with(first_user: Value) -> MemorySettingsStore {
        let mut bag = SettingsBag::new();
        bag.set(KEY_FIRST_USER, first_user);
        MemorySettingsStore::new(bag)
    }

    #[tokio::test]
    async fn empty_user_data_touches_nothing() {
        let stub = Arc::new(StubUsers::default());
        for store in [MemorySettingsStore::default(), store_with(json!({}))] {
            let created = bootstrapper(stub.clone())
                .create_first_admin(&store)
                .await
                .unwrap();
            assert!(created.is_none());
            assert!(store.get(KEY_USER).await.is_none());
        }
        assert_eq!(stub.role_calls.load(Ordering::SeqCst), 0);
        assert_eq!(stub.save_calls.load(Ordering::SeqCst), 0);
        assert_eq!(stub.token_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn caller_role_is_ignored_and_admin_forced() {
        let stub = Arc::new(StubUsers::default());
        let store = store_with(json!({
            "username": "ada@x.com",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "role": "user",
            "role_id": "some-user-role",
            "deleted": true
        }));

        let created = bootstrapper(stub.clone())
            .create_first_admin(&store)
            .await
            .unwrap()
            .unwrap();

        let saved = stub.saved.lock().await;
        assert_eq!(saved[0].role_id, ADMIN_ROLE_ID);
        assert!(!saved[0].deleted);
        assert_eq!(created.user_id, USER_ID);
        assert_eq!(
            store.get("user.user_id").await,
            Some(json!(USER_ID))
        );
        assert_eq!(store.get("user.token").await, Some(json!(created.token)));
    }

    #[tokio::test]
    async fn invalid_user_is_not_saved() {
        let stub = Arc::new(StubUsers::default());
        let store = store_with(json!({"username": "not-an-email", "first_name": "Ada"}));

        let err = bootstrapper(stub.clone())
            .create_first_admin(&store)
            .await
            .unwrap_err();

        match err {
            InstallError::Validation {
                entity,
                errors,
                user_id,
                ..
            } => {
                assert_eq!(entity, "user");
                assert!(errors.contains_key("username"));
                assert!(errors.contains_key("last_name"));
                assert!(user_id.is_none());
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(stub.save_calls.load(Ordering::SeqCst), 0);
        assert_eq!(stub.token_calls.load(Ordering::SeqCst), 0);
        assert!(store.get(KEY_USER).await.is_none());
    }

    #[tokio::test]
    async fn token_failure_carries_the_committed_user_id() {
        let stub = Arc::new(StubUsers {
            token_fails: true,
            ..Default::default()
        });
        let store = store_with(json!({
            "username": "ada@x.com",
            "first_name": "Ada",
            "last_name": "Lovelace"
        }));

        let err = bootstrapper(stub.clone())
            .create_first_admin(&store)
            .await
            .unwrap_err();

        match err {
            InstallError::Validation {
                entity, user_id, ..
            } => {
                assert_eq!(entity, "token");
                assert_eq!(user_id.as_deref(), Some(USER_ID));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(store.get(KEY_USER).await.is_none());
    }
}
