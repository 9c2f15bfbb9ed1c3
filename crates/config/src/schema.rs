/// Config schema for the relay bridge.
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatRelayConfig {
    pub completion: CompletionConfig,
    pub relay: RelayConfig,
    pub supervisor: SupervisorConfig,
    pub whatsapp: WhatsAppConfig,
}

/// Where the text-completion service lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Endpoint queried with `GET <endpoint>?<query_param>=<text>`.
    pub endpoint: String,
    /// Name of the query parameter carrying the message text.
    pub query_param: String,
    /// Client-side request timeout. The per-message relay deadline still applies.
    pub request_timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:5001/chat".into(),
            query_param: "q".into(),
            request_timeout_secs: 60,
        }
    }
}

impl CompletionConfig {
    pub fn request_timeout(&self) -> Duration {
        at_least_one_second(self.request_timeout_secs)
    }
}

/// Per-message relay behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Overall deadline covering the completion call and the reply send.
    pub deadline_secs: u64,
    /// Upper bound on relays running at the same time.
    pub max_in_flight: usize,
    /// Sender allowlist (user part of the JID, `*` wildcards). Empty admits all.
    pub allowlist: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            deadline_secs: 60,
            max_in_flight: 4,
            allowlist: Vec::new(),
        }
    }
}

impl RelayConfig {
    pub fn deadline(&self) -> Duration {
        at_least_one_second(self.deadline_secs)
    }
}

/// Reconnection supervisor cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub poll_interval_secs: u64,
    /// Extra sleep after a failed reconnect, on top of the poll interval.
    pub backoff_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            backoff_secs: 5,
        }
    }
}

impl SupervisorConfig {
    pub fn poll_interval(&self) -> Duration {
        at_least_one_second(self.poll_interval_secs)
    }

    pub fn backoff(&self) -> Duration {
        at_least_one_second(self.backoff_secs)
    }
}

/// WhatsApp Web sidecar settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Port the sidecar WebSocket server listens on.
    pub sidecar_port: u16,
    /// Full WebSocket URL; overrides `sidecar_port` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidecar_url: Option<String>,
    /// Directory holding the sidecar sources (`package.json`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidecar_dir: Option<PathBuf>,
    /// Directory where the sidecar keeps the device credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_dir: Option<PathBuf>,
    /// Spawn and supervise the sidecar process ourselves.
    pub auto_start_sidecar: bool,
    /// How long to wait for the session to come up after `connect`.
    pub connect_timeout_secs: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            sidecar_port: 3456,
            sidecar_url: None,
            sidecar_dir: None,
            auth_dir: None,
            auto_start_sidecar: true,
            connect_timeout_secs: 30,
        }
    }
}

impl WhatsAppConfig {
    pub fn sidecar_url(&self) -> String {
        self.sidecar_url
            .clone()
            .unwrap_or_else(|| format!("ws://127.0.0.1:{}/", self.sidecar_port))
    }

    /// The configured auth directory, or `<data dir>/whatsapp-auth`.
    pub fn resolved_auth_dir(&self) -> PathBuf {
        self.auth_dir.clone().unwrap_or_else(|| {
            crate::loader::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("whatsapp-auth")
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        at_least_one_second(self.connect_timeout_secs)
    }
}

/// Zero-second settings are raised to one second.
fn at_least_one_second(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}
