//! WhatsApp Web session backend.
//!
//! The WhatsApp Web protocol itself (multi-device crypto, credential
//! storage) lives in a Node.js sidecar built on Baileys. This crate starts
//! that sidecar, talks to it over a local WebSocket, and exposes the result
//! as a [`SessionController`](chatrelay_session::SessionController).

pub mod controller;
pub mod error;
pub mod identity;
pub mod process;
pub mod sidecar;
pub mod types;

pub use {
    controller::WhatsAppSession,
    error::{Error, Result},
    identity::IdentityStore,
    process::{SidecarProcess, find_sidecar_dir},
};
