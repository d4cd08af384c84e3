use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    QrReady,
    Authenticated,
    Ready,
    AuthFailed,
    Disconnected,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initializing => "initializing",
            SessionStatus::QrReady => "qr_ready",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::Ready => "ready",
            SessionStatus::AuthFailed => "auth_failed",
            SessionStatus::Disconnected => "disconnected",
        }
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    ///
    /// Same-state moves are only accepted where they carry meaning: a fresh
    /// pairing code while `QrReady`, a repeated connect event while `Ready`,
    /// and a repeated loss report while `Disconnected`.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        if next == Disconnected {
            return true;
        }
        matches!(
            (self, next),
            (Initializing, QrReady)
                | (Initializing, Ready)
                | (Initializing, AuthFailed)
                | (QrReady, QrReady)
                | (QrReady, Authenticated)
                | (QrReady, AuthFailed)
                | (Authenticated, Ready)
                | (Ready, Ready)
                | (AuthFailed, Initializing)
                | (Disconnected, Initializing)
                | (Disconnected, Ready)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum PairingEvent {
    Code(String),
    Success,
    Failure(String),
}

/// Inbound chat message, as handed to the auto-reply engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub id: String,
    pub from: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub is_from_me: bool,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub is_group: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectorEvent {
    Connected,
    Disconnected,
    LoggedOut,
    Message(MessageEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub timestamp: i64,
}

/// Handle returned by the network after a media upload; reused for every
/// recipient of the same asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedMedia {
    pub url: String,
    pub direct_path: String,
    pub media_key: String,
    pub file_enc_sha256: String,
    pub file_sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub account_id: String,
    pub status: SessionStatus,
    pub is_ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    pub account_id: String,
    pub message: MessageEvent,
    pub received_at: DateTime<Utc>,
}
