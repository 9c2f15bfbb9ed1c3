//! Frames exchanged with the sidecar. One JSON object per WebSocket text
//! frame, tagged by `type`.

use {
    chatrelay_session::{InboundEvent, Jid, MessageEvent},
    serde::{Deserialize, Serialize},
    tracing::warn,
};

/// Bridge → sidecar.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeFrame {
    /// Log in with the credentials in `auth_dir`, or start pairing if none.
    Connect { auth_dir: String },
    Disconnect,
    SendText {
        request_id: String,
        to: String,
        text: String,
    },
}

/// Sidecar → bridge.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SidecarFrame {
    /// A fresh pairing code.
    Qr { code: String },
    /// Pairing milestone (`success`, `timeout`, `error`, ...).
    Pairing { event: String },
    /// The pairing attempt is over, whatever its result.
    PairingDone,
    Connected {
        #[serde(default)]
        jid: Option<String>,
    },
    Disconnected {
        #[serde(default)]
        reason: Option<String>,
    },
    /// The phone unlinked this device; stored credentials are void.
    LoggedOut,
    Message {
        chat_jid: String,
        sender_jid: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        from_me: bool,
    },
    SendResult {
        request_id: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Error { error: String },
    #[serde(other)]
    Unknown,
}

impl SidecarFrame {
    /// The event handlers should see for this frame.
    pub fn to_event(&self) -> InboundEvent {
        match self {
            Self::Message {
                chat_jid,
                sender_jid,
                text,
                from_me,
            } => match (chat_jid.parse::<Jid>(), sender_jid.parse::<Jid>()) {
                (Ok(chat), Ok(sender)) => InboundEvent::Message(MessageEvent {
                    chat,
                    sender,
                    text: text.clone(),
                    from_me: *from_me,
                }),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "dropping message with malformed jid");
                    InboundEvent::Ignored
                },
            },
            Self::Qr { code } => InboundEvent::PairingCode { code: code.clone() },
            Self::Pairing { event } => InboundEvent::PairingOther {
                label: event.clone(),
            },
            Self::PairingDone
            | Self::Connected { .. }
            | Self::Disconnected { .. }
            | Self::LoggedOut
            | Self::SendResult { .. }
            | Self::Error { .. }
            | Self::Unknown => InboundEvent::Ignored,
        }
    }
}
