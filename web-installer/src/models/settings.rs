// Installer settings bag
//
// Wizard answers collected across steps (`database`, `gpg`, `first_user`, `options`, `email`,
// `license`) plus what the install run records back (`gpg.fingerprint`, `user`, `install.*`,
// `initialized`). Keys are dotted paths into nested JSON objects.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::InstallError;

pub const KEY_DATABASE: &str = "database";
pub const KEY_GPG: &str = "gpg";
pub const KEY_FIRST_USER: &str = "first_user";
pub const KEY_USER: &str = "user";
pub const KEY_LICENSE: &str = "license";
pub const KEY_INITIALIZED: &str = "initialized";
pub const KEY_INSTALL_STATE: &str = "install.state";
pub const KEY_SCHEMA_MIGRATED: &str = "install.schema_migrated";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsBag {
    root: Map<String, Value>,
}

impl SettingsBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Result<Self, InstallError> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            Value::Null => Ok(Self::default()),
            other => Err(InstallError::settings(
                "<root>",
                format!("expected an object, got {}", type_name(&other)),
            )),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Resolve a dotted key (`gpg.fingerprint`). Missing segments yield `None`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut parts = key.split('.');
        let first = parts.next()?;
        let mut current = self.root.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Set a dotted key, creating intermediate objects. A non-object value sitting on the
    /// path is replaced by an object.
    pub fn set(&mut self, key: &str, value: Value) {
        let parts: Vec<&str> = key.split('.').filter(|p| !p.is_empty()).collect();
        let Some((last, parents)) = parts.split_last() else {
            return;
        };

        let mut current = &mut self.root;
        for part in parents {
            let entry = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(next) = entry else {
                return;
            };
            current = next;
        }
        current.insert(last.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        match key.rsplit_once('.') {
            None => self.root.remove(key),
            Some((parent, last)) => {
                let mut parts = parent.split('.');
                let first = parts.next()?;
                let mut current = self.root.get_mut(first)?;
                for part in parts {
                    current = current.as_object_mut()?.get_mut(part)?;
                }
                current.as_object_mut()?.remove(last)
            }
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        matches!(self.get(key), Some(Value::Bool(true)))
    }

    /// "Present" in the wizard sense: set, not null, not an empty string/object/array.
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !is_empty_value(v))
    }

    /// Deserialize a namespace into a typed view. A missing namespace yields `None`.
    pub fn section<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, InstallError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => serde_json::from_value(v.clone())
                .map(Some)
                .map_err(|e| InstallError::settings(key, e)),
        }
    }
}

pub(crate) fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// `database` namespace as collected by the wizard form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub host: String,
    #[serde(deserialize_with = "port_from_string_or_number")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
}

fn port_from_string_or_number<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    // Form posts deliver the port as a string.
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| D::Error::custom(format!("port out of range: {}", n))),
        Value::String(s) => s
            .trim()
            .parse::<u16>()
            .map_err(|_| D::Error::custom(format!("invalid port: '{}'", s))),
        other => Err(D::Error::custom(format!(
            "port must be a number, got {}",
            type_name(&other)
        ))),
    }
}

/// `gpg` namespace: either generation parameters or an armored key, plus what provisioning
/// records back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpgSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub armored_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<String>,
}

/// `user` namespace written once the first admin exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedUser {
    pub user_id: String,
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_get_walks_nested_objects() {
        let bag = SettingsBag::from_value(json!({
            "gpg": { "name": "Server Key", "fingerprint": "ABCD" }
        }))
        .unwrap();
        assert_eq!(bag.get_str("gpg.fingerprint"), Some("ABCD"));
        assert!(bag.get("gpg.email").is_none());
        assert!(bag.get("database.host").is_none());
    }

    #[test]
    fn dotted_set_creates_intermediate_objects() {
        let mut bag = SettingsBag::new();
        bag.set("install.state", json!("KEY_PROVISIONED"));
        bag.set("install.schema_migrated", json!(true));
        assert_eq!(bag.get_str("install.state"), Some("KEY_PROVISIONED"));
        assert!(bag.get_bool("install.schema_migrated"));
    }

    #[test]
    fn set_replaces_scalar_on_path() {
        let mut bag = SettingsBag::new();
        bag.set("license", json!("blob"));
        bag.set("license.key", json!("k"));
        assert_eq!(bag.get_str("license.key"), Some("k"));
    }

    #[test]
    fn has_treats_blank_values_as_absent() {
        let bag = SettingsBag::from_value(json!({
            "first_user": {},
            "gpg": { "name": "  ", "armored_key": null }
        }))
        .unwrap();
        assert!(!bag.has("first_user"));
        assert!(!bag.has("gpg.name"));
        assert!(!bag.has("gpg.armored_key"));
    }

    #[test]
    fn remove_nested_key() {
        let mut bag = SettingsBag::from_value(json!({"user": {"user_id": "1", "token": "t"}})).unwrap();
        assert_eq!(bag.remove("user.token"), Some(json!("t")));
        assert!(bag.get("user.token").is_none());
        assert_eq!(bag.get_str("user.user_id"), Some("1"));
    }

    #[test]
    fn database_port_accepts_form_strings() {
        let bag = SettingsBag::from_value(json!({
            "database": {
                "host": "db", "port": "3306", "username": "u",
                "password": "p", "database": "passbolt"
            }
        }))
        .unwrap();
        let db: DatabaseSettings = bag.section(KEY_DATABASE).unwrap().unwrap();
        assert_eq!(db.port, 3306);
    }

    #[test]
    fn database_port_out_of_range_is_a_settings_error() {
        let bag = SettingsBag::from_value(json!({
            "database": {
                "host": "db", "port": 70000, "username": "u", "database": "passbolt"
            }
        }))
        .unwrap();
        let err = bag.section::<DatabaseSettings>(KEY_DATABASE).unwrap_err();
        assert!(matches!(err, InstallError::Settings { ref key, .. } if key == "database"));
    }

    #[test]
    fn non_object_root_is_rejected() {
        assert!(SettingsBag::from_value(json!([1, 2])).is_err());
        assert!(SettingsBag::from_value(Value::Null).unwrap().is_empty());
    }
}
