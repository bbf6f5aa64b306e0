//! Wire messages exchanged with WebSocket clients.
//!
//! All frames are JSON text. Clients send [`ClientMessage`]; the gateway
//! replies with [`ServerMessage`]. Command identifiers are opaque strings
//! scoped to a single connection.

use serde::{Deserialize, Serialize};

/// Memory-access commands a client may issue against a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "CONNECT")]
    Connect,
    #[serde(rename = "DISCONNECT")]
    Disconnect,
    #[serde(rename = "SET_MTA")]
    SetMta,
    #[serde(rename = "UPLOAD")]
    Upload,
    #[serde(rename = "DOWNLOAD")]
    Download,
}

/// Body of a command message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandBody {
    pub name: CommandName,
    /// Raw argument bytes. Meaning depends on the command: SET_MTA takes a
    /// little-endian address (plus optional extension byte), UPLOAD takes a
    /// little-endian size, DOWNLOAD takes the payload to write.
    #[serde(default)]
    pub bytes: Vec<u8>,
    /// Symbol path alternative to raw bytes for SET_MTA and UPLOAD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

/// Messages received from a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Command {
        command_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        controller: Option<String>,
        command: CommandBody,
    },
    Subscribe {
        parameter: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        controller: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interval_ms: Option<u64>,
    },
    Unsubscribe {
        parameter: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        controller: Option<String>,
    },
}

/// Result status carried in a response message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Messages sent to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Response {
        command_id: String,
        status: ResponseStatus,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bytes: Option<Vec<u8>>,
    },
    Data {
        parameter: String,
        value: f64,
        timestamp: f64,
    },
}

impl ServerMessage {
    pub fn success(command_id: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Response {
            command_id: command_id.into(),
            status: ResponseStatus::Success,
            message: message.into(),
            bytes: None,
        }
    }

    pub fn success_with_bytes(
        command_id: impl Into<String>,
        message: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        ServerMessage::Response {
            command_id: command_id.into(),
            status: ResponseStatus::Success,
            message: message.into(),
            bytes: Some(bytes),
        }
    }

    pub fn error(command_id: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Response {
            command_id: command_id.into(),
            status: ResponseStatus::Error,
            message: message.into(),
            bytes: None,
        }
    }
}
