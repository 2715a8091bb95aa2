// First-user and registration-token entities

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FieldErrors;
use crate::utils::validation;

pub const ROLE_ADMIN: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Register,
    Recover,
    Login,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Register => "register",
            TokenType::Recover => "recover",
            TokenType::Login => "login",
        }
    }
}

/// Raw `first_user` namespace; unknown keys (including any caller-supplied `role`) are kept
/// only so they can be ignored explicitly.
pub type UserData = Map<String, Value>;

/// User entity as built from wizard data, before and after persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEntity {
    pub id: Option<String>,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub role_id: String,
    pub deleted: bool,
    pub active: bool,
    #[serde(skip)]
    errors: FieldErrors,
}

impl UserEntity {
    /// Build an entity from wizard data. `role_id` and `deleted` are supplied by the caller and
    /// override anything in `data`. Field rules are checked here; `errors()` reports them.
    pub fn build(data: &UserData, role_id: &str, deleted: bool) -> Self {
        let field = |k: &str| {
            data.get(k)
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };

        let mut entity = UserEntity {
            id: None,
            username: field("username"),
            first_name: field("first_name"),
            last_name: field("last_name"),
            role_id: role_id.to_string(),
            deleted,
            active: false,
            errors: FieldErrors::new(),
        };
        entity.validate();
        entity
    }

    fn validate(&mut self) {
        if let Err(msg) = validation::validate_username(&self.username) {
            self.add_error("username", msg);
        }
        if let Err(msg) = validation::validate_person_name(&self.first_name) {
            self.add_error("first_name", msg);
        }
        if let Err(msg) = validation::validate_person_name(&self.last_name) {
            self.add_error("last_name", msg);
        }
        if self.role_id.trim().is_empty() {
            self.add_error("role_id", "The role identifier should not be empty.");
        }
    }

    pub fn add_error(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Result of `generate_token`: either a persisted token or its field errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationToken {
    pub id: Option<String>,
    pub user_id: String,
    pub token: String,
    pub token_type: TokenType,
    pub active: bool,
    #[serde(skip)]
    pub errors: FieldErrors,
}

impl AuthenticationToken {
    pub fn new_register(user_id: &str) -> Self {
        Self {
            id: None,
            user_id: user_id.to_string(),
            token: uuid::Uuid::new_v4().to_string(),
            token_type: TokenType::Register,
            active: true,
            errors: FieldErrors::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
