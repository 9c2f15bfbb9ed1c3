use crate::Jid;

/// Everything a session can report to its event handlers.
///
/// Backends map their own wire events onto this closed set; anything the
/// relay has no use for becomes [`InboundEvent::Ignored`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Message(MessageEvent),
    PairingCode { code: String },
    PairingOther { label: String },
    Ignored,
}

/// A received chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// Conversation the message was posted in (peer or group).
    pub chat: Jid,
    /// Account that wrote the message.
    pub sender: Jid,
    /// Plain conversation body. `None` for media and other non-text payloads.
    pub text: Option<String>,
    /// Sent by this account from another linked device.
    pub from_me: bool,
}

impl MessageEvent {
    /// The plain text body, or `""` when the message carries none.
    pub fn conversation_text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

/// Item of the pairing stream handed out while a new device is linked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    /// A fresh code to present out of band. Supersedes any earlier one.
    Code(String),
    /// Any other pairing milestone (`success`, `timeout`, ...).
    Other(String),
}

impl From<PairingEvent> for InboundEvent {
    fn from(event: PairingEvent) -> Self {
        match event {
            PairingEvent::Code(code) => Self::PairingCode { code },
            PairingEvent::Other(label) => Self::PairingOther { label },
        }
    }
}
