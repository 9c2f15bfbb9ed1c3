use std::fmt::Display;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by a [`SessionController`](crate::SessionController).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The session is not live; sends fail until the supervisor reconnects.
    #[error("session is not connected")]
    NotConnected,

    /// Establishing the session failed.
    #[error("connect failed: {message}")]
    Connect { message: String },

    /// The network rejected or failed to deliver an outgoing message.
    #[error("send failed: {message}")]
    Send { message: String },

    /// A peer identifier could not be parsed.
    #[error("invalid jid: {input}")]
    InvalidJid { input: String },
}

impl Error {
    #[must_use]
    pub fn connect(message: impl Display) -> Self {
        Self::Connect {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn send(message: impl Display) -> Self {
        Self::Send {
            message: message.to_string(),
        }
    }
}
