// HTTP-facing install result
//
// The installer page polls the install endpoint and expects either
//   {"token": {"user_id": "...", "token": "..."}}    (redirects to the setup URL)
// or
//   {"header": {"message": "..."}, "body": {...}}     (shows message + debug dump)

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::InstallError;
use crate::models::settings::CreatedUser;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InstallResponse {
    Success(InstallSuccess),
    Failure(InstallFailure),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallSuccess {
    /// Absent when no account details were collected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<CreatedUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallFailure {
    pub header: ResponseHeader,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub message: String,
}

impl InstallResponse {
    pub fn ok(token: Option<CreatedUser>) -> Self {
        InstallResponse::Success(InstallSuccess { token })
    }

    pub fn fail(message: impl Into<String>, body: Value) -> Self {
        InstallResponse::Failure(InstallFailure {
            header: ResponseHeader {
                message: message.into(),
            },
            body,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, InstallResponse::Success(_))
    }
}

impl From<&InstallError> for InstallResponse {
    fn from(err: &InstallError) -> Self {
        InstallResponse::fail(err.to_string(), err.details())
    }
}
