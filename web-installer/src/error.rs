//! Typed failures surfaced by the install sequence.
//!
//! Collaborators work with `anyhow::Result` internally; each component maps
//! their failures onto one of these variants at its boundary so the caller
//! can tell which step has to be corrected before re-running.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::{json, Value};

/// Field name -> list of rule violations for that field.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// A file (config, license, exported key, settings) could not be written.
    #[error("could not write {path:?}: {reason}")]
    Io { path: PathBuf, reason: String },

    /// The server key could not be generated from the supplied parameters.
    #[error("the server key could not be generated: {reason}")]
    KeyGeneration { reason: String },

    /// The supplied armored key could not be imported.
    #[error("the server key could not be imported: {reason}")]
    KeyImport { reason: String },

    /// Migrations failed, reported non-success or timed out.
    #[error("the database cannot be installed: {reason}")]
    Schema { reason: String },

    /// Field-level validation failure attached to a specific entity.
    #[error("{message}")]
    Validation {
        entity: String,
        message: String,
        errors: FieldErrors,
        /// Set when the user row was committed before the failure (token step).
        user_id: Option<String>,
    },

    /// The settings bag holds a value of the wrong shape for a step.
    #[error("invalid installer settings at '{key}': {reason}")]
    Settings { key: String, reason: String },
}

impl InstallError {
    pub fn io(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        InstallError::Io {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn settings(key: &str, reason: impl std::fmt::Display) -> Self {
        InstallError::Settings {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Stable machine-readable code, used in logs and the failure payload.
    pub fn code(&self) -> &'static str {
        match self {
            InstallError::Io { .. } => "IO_ERROR",
            InstallError::KeyGeneration { .. } => "KEY_GENERATION_ERROR",
            InstallError::KeyImport { .. } => "KEY_IMPORT_ERROR",
            InstallError::Schema { .. } => "SCHEMA_ERROR",
            InstallError::Validation { .. } => "VALIDATION_ERROR",
            InstallError::Settings { .. } => "SETTINGS_ERROR",
        }
    }

    /// Structured detail dump for the failure payload `body`.
    pub fn details(&self) -> Value {
        match self {
            InstallError::Io { path, reason } => json!({
                "code": self.code(),
                "path": path.display().to_string(),
                "reason": reason,
            }),
            InstallError::KeyGeneration { reason }
            | InstallError::KeyImport { reason }
            | InstallError::Schema { reason } => json!({
                "code": self.code(),
                "reason": reason,
            }),
            InstallError::Validation {
                entity,
                errors,
                user_id,
                ..
            } => {
                let mut body = json!({
                    "code": self.code(),
                    "entity": entity,
                    "errors": errors,
                });
                if let Some(id) = user_id {
                    body["user_id"] = json!(id);
                }
                body
            }
            InstallError::Settings { key, reason } => json!({
                "code": self.code(),
                "key": key,
                "reason": reason,
            }),
        }
    }
}
