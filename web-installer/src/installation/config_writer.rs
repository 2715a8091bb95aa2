// Application configuration file writer
//
// Renders `<config_dir>/passbolt.php` (a PHP file returning one nested array) from the settings
// bag, and writes the license file when that feature is enabled.
//
// Every value ends up inside a single-quoted PHP literal, so every string leaf is sanitized
// first: `\` and `'` are escaped. Nothing else needs escaping inside single quotes.

use log::info;
use serde_json::{json, Map, Value};
use std::path::PathBuf;

use crate::error::InstallError;
use crate::installation::files::write_file_atomic;
use crate::models::config::{InstallerConfig, DEFAULT_CONNECTION_NAME};
use crate::models::settings::{
    DatabaseSettings, GpgSettings, SettingsBag, KEY_DATABASE, KEY_GPG, KEY_LICENSE,
};
use crate::session::SettingsStore;
use crate::utils::logging::describe_database_target;

const INDENT: &str = "    ";

/// Escape a string for embedding in a single-quoted PHP literal.
pub fn sanitize(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\\' || c == '\'' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Sanitize every string leaf (and object key) of a JSON tree.
pub fn sanitize_tree(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize(s)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_tree).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (sanitize(k), sanitize_tree(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Render an already sanitized tree as a PHP literal.
fn render_php(value: &Value, depth: usize, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            out.push('\'');
            out.push_str(s);
            out.push('\'');
        }
        Value::Array(items) => {
            out.push_str("[\n");
            for item in items {
                out.push_str(&INDENT.repeat(depth + 1));
                render_php(item, depth + 1, out);
                out.push_str(",\n");
            }
            out.push_str(&INDENT.repeat(depth));
            out.push(']');
        }
        Value::Object(map) => {
            out.push_str("[\n");
            for (k, v) in map {
                out.push_str(&INDENT.repeat(depth + 1));
                out.push('\'');
                out.push_str(k);
                out.push_str("' => ");
                render_php(v, depth + 1, out);
                out.push_str(",\n");
            }
            out.push_str(&INDENT.repeat(depth));
            out.push(']');
        }
    }
}

/// Render the whole configuration document from the settings bag.
pub fn render_config(settings: &SettingsBag) -> Result<String, InstallError> {
    let db: DatabaseSettings = settings.section(KEY_DATABASE)?.ok_or_else(|| {
        InstallError::settings(KEY_DATABASE, "the database settings are required")
    })?;
    let gpg: GpgSettings = settings.section(KEY_GPG)?.unwrap_or_default();

    let mut root = Map::new();

    let mut datasource = Map::new();
    datasource.insert("host".into(), json!(db.host));
    datasource.insert("port".into(), json!(db.port));
    datasource.insert("username".into(), json!(db.username));
    datasource.insert("password".into(), json!(db.password));
    datasource.insert("database".into(), json!(db.database));
    root.insert(
        "Datasources".into(),
        json!({ DEFAULT_CONNECTION_NAME: Value::Object(datasource) }),
    );

    if let Some(url) = settings.get_str("options.full_base_url").filter(|u| !u.trim().is_empty()) {
        root.insert("App".into(), json!({ "fullBaseUrl": url.trim() }));
    }

    if settings.has("email.host") {
        let s = |k: &str| settings.get_str(&format!("email.{}", k)).unwrap_or("").to_string();
        let port = settings
            .get("email.port")
            .cloned()
            .unwrap_or_else(|| json!(25));
        root.insert(
            "EmailTransport".into(),
            json!({
                "default": {
                    "host": s("host"),
                    "port": port,
                    "username": s("username"),
                    "password": s("password"),
                    "tls": settings.get_bool("email.tls"),
                }
            }),
        );
        if settings.has("email.sender_email") {
            root.insert(
                "Email".into(),
                json!({
                    "default": {
                        "from": { (s("sender_email")): s("sender_name") }
                    }
                }),
            );
        }
    }

    let mut passbolt = Map::new();
    if let Some(fingerprint) = gpg.fingerprint.filter(|f| !f.trim().is_empty()) {
        passbolt.insert(
            "gpg".into(),
            json!({
                "serverKey": {
                    "fingerprint": fingerprint,
                    "public": gpg.public.unwrap_or_default(),
                    "private": gpg.private.unwrap_or_default(),
                }
            }),
        );
    }
    if settings.get("options.force_ssl").is_some() {
        passbolt.insert(
            "ssl".into(),
            json!({ "force": settings.get_bool("options.force_ssl") }),
        );
    }
    if !passbolt.is_empty() {
        root.insert("passbolt".into(), Value::Object(passbolt));
    }

    let mut out = String::from("<?php\nreturn ");
    render_php(&sanitize_tree(&Value::Object(root)), 0, &mut out);
    out.push_str(";\n");
    Ok(out)
}

pub struct ConfigWriter {
    config_path: PathBuf,
    license_path: PathBuf,
    license_enabled: bool,
}

impl ConfigWriter {
    pub fn new(config: &InstallerConfig) -> Self {
        Self {
            config_path: config.config_file_path(),
            license_path: config.license_file_path(),
            license_enabled: config.license_enabled,
        }
    }

    /// Render and atomically write the configuration file.
    pub async fn write_config(&self, store: &dyn SettingsStore) -> Result<PathBuf, InstallError> {
        let settings = store.snapshot().await;
        let content = render_config(&settings)?;

        if let Ok(Some(db)) = settings.section::<DatabaseSettings>(KEY_DATABASE) {
            info!(
                "[PHASE: install] [STEP: config] Writing configuration ({})",
                describe_database_target(&db.host, db.port, &db.database, &db.username)
            );
        }

        write_file_atomic(&self.config_path, content.as_bytes(), Some(0o640), "write_config")
            .await
            .map_err(|e| InstallError::io(&self.config_path, format!("{:#}", e)))?;

        info!(
            "[PHASE: install] [STEP: config] Configuration written to {:?}",
            self.config_path
        );
        Ok(self.config_path.clone())
    }

    /// Write the raw license blob. No-op (returns `None`) when the license feature is off.
    pub async fn write_license(
        &self,
        store: &dyn SettingsStore,
    ) -> Result<Option<PathBuf>, InstallError> {
        if !self.license_enabled {
            return Ok(None);
        }

        let license = match store.get(KEY_LICENSE).await {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            _ => {
                return Err(InstallError::settings(
                    KEY_LICENSE,
                    "the license feature is enabled but no license was supplied",
                ))
            }
        };

        write_file_atomic(&self.license_path, license.as_bytes(), Some(0o640), "write_license")
            .await
            .map_err(|e| InstallError::io(&self.license_path, format!("{:#}", e)))?;

        info!(
            "[PHASE: install] [STEP: config] License written to {:?}",
            self.license_path
        );
        Ok(Some(self.license_path.clone()))
    }
}
