//! Messaging session abstraction.
//!
//! The relay core never talks to a messaging network directly. It drives a
//! [`SessionController`], receives [`InboundEvent`]s through an
//! [`EventHandler`], and addresses peers by [`Jid`]. Concrete backends
//! (the WhatsApp sidecar, test fakes) implement the controller trait.

pub mod controller;
pub mod error;
pub mod event;
pub mod jid;

pub use {
    controller::{EventHandler, SessionController},
    error::{Error, Result},
    event::{InboundEvent, MessageEvent, PairingEvent},
    jid::{DEFAULT_USER_SERVER, GROUP_SERVER, Jid},
};
