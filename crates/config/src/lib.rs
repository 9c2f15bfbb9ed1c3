//! Configuration loading and env substitution.
//!
//! Config files: `chatrelay.toml`, `chatrelay.yaml`, `chatrelay.yml` or
//! `chatrelay.json`, searched in `./` then the user config directory
//! (`~/.config/chatrelay/` on Linux).
//!
//! Every string value may reference `${ENV_VAR}` or `${ENV_VAR:-fallback}`.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;

pub use {
    error::{Error, Result},
    loader::{config_dir, data_dir, discover_and_load, load_config},
    schema::{ChatRelayConfig, CompletionConfig, RelayConfig, SupervisorConfig, WhatsAppConfig},
};
