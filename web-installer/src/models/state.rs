// Install run state
//
// Linear, no branching once started. The last reached state is recorded in the settings bag
// under `install.state` after every transition.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallState {
    Start,
    KeyProvisioned,
    ConfigWritten,
    SchemaInstalled,
    AdminCreated,
    Done,
}

impl InstallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallState::Start => "START",
            InstallState::KeyProvisioned => "KEY_PROVISIONED",
            InstallState::ConfigWritten => "CONFIG_WRITTEN",
            InstallState::SchemaInstalled => "SCHEMA_INSTALLED",
            InstallState::AdminCreated => "ADMIN_CREATED",
            InstallState::Done => "DONE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "START" => Some(InstallState::Start),
            "KEY_PROVISIONED" => Some(InstallState::KeyProvisioned),
            "CONFIG_WRITTEN" => Some(InstallState::ConfigWritten),
            "SCHEMA_INSTALLED" => Some(InstallState::SchemaInstalled),
            "ADMIN_CREATED" => Some(InstallState::AdminCreated),
            "DONE" => Some(InstallState::Done),
            _ => None,
        }
    }

    pub fn next(&self) -> Option<Self> {
        match self {
            InstallState::Start => Some(InstallState::KeyProvisioned),
            InstallState::KeyProvisioned => Some(InstallState::ConfigWritten),
            InstallState::ConfigWritten => Some(InstallState::SchemaInstalled),
            InstallState::SchemaInstalled => Some(InstallState::AdminCreated),
            InstallState::AdminCreated => Some(InstallState::Done),
            InstallState::Done => None,
        }
    }
}

impl std::fmt::Display for InstallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
