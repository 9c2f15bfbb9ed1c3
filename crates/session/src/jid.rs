use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// Server suffix of one-to-one user addresses.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";

/// Server suffix reserved for multi-party (group) chats.
pub const GROUP_SERVER: &str = "g.us";

/// A network address of the form `user[:device]@server`.
///
/// The device part identifies one linked device of a multi-device account;
/// replies are addressed to the account, so it is kept only for display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    pub user: String,
    pub device: Option<u16>,
    pub server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            device: None,
            server: server.into(),
        }
    }

    /// `user@s.whatsapp.net`.
    pub fn user(user: impl Into<String>) -> Self {
        Self::new(user, DEFAULT_USER_SERVER)
    }

    /// Whether this address denotes a group chat.
    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    /// The same account on the default user server, without a device part.
    pub fn to_direct(&self) -> Self {
        Self::user(self.user.clone())
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device {
            Some(device) => write!(f, "{}:{device}@{}", self.user, self.server),
            None => write!(f, "{}@{}", self.user, self.server),
        }
    }
}

impl FromStr for Jid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidJid {
            input: s.to_string(),
        };

        let (local, server) = s.rsplit_once('@').ok_or_else(invalid)?;
        if server.is_empty() {
            return Err(invalid());
        }

        let (user, device) = match local.split_once(':') {
            Some((user, device)) => (user, Some(device.parse().map_err(|_| invalid())?)),
            None => (local, None),
        };

        Ok(Self {
            user: user.to_string(),
            device,
            server: server.to_string(),
        })
    }
}

impl TryFrom<String> for Jid {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.to_string()
    }
}
