//! Wire protocol messages between clients and the daemon
//!
//! Messages travel as JSON text frames over a persistent WebSocket. Client
//! messages are externally tagged on `"type"`. Daemon messages are a union:
//! pushes (`fmdm.update`, `pong`) carry a `type` tag, while command responses
//! are identified by their correlation `id` alone, so the daemon side
//! deserializes untagged.

use serde::{Deserialize, Serialize};

use crate::error::ValidationErrorKind;
use crate::types::{ClientKind, Fmdm};

/// Payload for commands that address a folder by path
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathPayload {
    pub path: String,
}

/// Payload for `folder.add`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddPayload {
    pub path: String,

    /// Embedding model; the daemon default applies when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Messages a client sends to the daemon
///
/// `payload` is `Option` on every command: the field is runtime-optional on
/// the wire, and every consumer is forced to handle the absent case with a
/// typed `missing_payload` error rather than a crash.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Handshake; must be the first frame on every connection
    #[serde(rename = "connection.init")]
    ConnectionInit {
        #[serde(rename = "clientType")]
        client_type: ClientKind,
    },

    /// Dry-run the folder validation rules without changing anything
    #[serde(rename = "folder.validate")]
    FolderValidate {
        id: String,
        payload: Option<PathPayload>,
    },

    /// Add a folder to the monitored set
    #[serde(rename = "folder.add")]
    FolderAdd {
        id: String,
        payload: Option<AddPayload>,
    },

    /// Remove a folder from the monitored set
    #[serde(rename = "folder.remove")]
    FolderRemove {
        id: String,
        payload: Option<PathPayload>,
    },

    /// Keepalive
    #[serde(rename = "ping")]
    Ping { id: String },
}

impl ClientMessage {
    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A single validation finding (error or warning)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    #[serde(rename = "type")]
    pub kind: ValidationErrorKind,

    pub message: String,

    /// For ancestor warnings: the configured folders that would be replaced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_folders: Option<Vec<String>>,
}

impl ValidationIssue {
    pub fn error(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            affected_folders: None,
        }
    }

    pub fn warning_with_folders(
        kind: ValidationErrorKind,
        message: impl Into<String>,
        affected: Vec<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            affected_folders: Some(affected),
        }
    }
}

/// Outcome of running the folder validation rules
///
/// The same report backs both `folder.validate` responses and the gate inside
/// `folder.add`, so the two paths can never drift apart.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// True when no hard errors were found (warnings may still be present)
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// First error message, for single-line reporting
    pub fn first_error(&self) -> Option<&str> {
        self.errors.first().map(|e| e.message.as_str())
    }
}

/// Pushes the daemon sends without being asked
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DaemonPush {
    /// Full snapshot broadcast; sent on every change and once on connect
    #[serde(rename = "fmdm.update")]
    FmdmUpdate { fmdm: Fmdm },

    /// Reply to `ping`
    #[serde(rename = "pong")]
    Pong { id: String },
}

/// Response to `folder.validate`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ValidateResponse {
    pub id: String,
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidateResponse {
    pub fn from_report(id: impl Into<String>, report: ValidationReport) -> Self {
        Self {
            id: id.into(),
            valid: report.valid(),
            errors: report.errors,
            warnings: report.warnings,
        }
    }
}

/// Response to `folder.add` / `folder.remove`
///
/// Deliberately carries no state: the resulting change is observable only
/// through the next `fmdm.update` broadcast, which all clients (including
/// the requester) receive through the same code path.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ActionResponse {
    pub id: String,
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResponse {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Everything the daemon can send to a client
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DaemonMessage {
    Push(DaemonPush),
    Validate(ValidateResponse),
    Action(ActionResponse),
}

impl DaemonMessage {
    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The correlation id, for responses that carry one
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            DaemonMessage::Push(DaemonPush::Pong { id }) => Some(id),
            DaemonMessage::Push(DaemonPush::FmdmUpdate { .. }) => None,
            DaemonMessage::Validate(r) => Some(&r.id),
            DaemonMessage::Action(r) => Some(&r.id),
        }
    }
}
