use std::sync::Arc;

use {async_trait::async_trait, tokio::sync::mpsc};

use crate::{InboundEvent, Jid, PairingEvent, Result};

/// Receives every event a session produces.
///
/// Backends call `handle` once per event, in arrival order. A handler that
/// needs to do slow work should hand it off rather than hold the delivery
/// slot for long.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: InboundEvent);
}

/// The single logical connection to a messaging network.
///
/// One instance exists per process and is shared as
/// `Arc<dyn SessionController>` between startup, the reconnection
/// supervisor and every relay.
#[async_trait]
pub trait SessionController: Send + Sync {
    /// Bring the session up. Callers check [`is_connected`](Self::is_connected)
    /// first; a redundant call on a live session is harmless.
    async fn connect(&self) -> Result<()>;

    /// Tear the session down. Later sends fail with `NotConnected`.
    async fn disconnect(&self);

    /// Cheap, non-blocking liveness check.
    fn is_connected(&self) -> bool;

    /// Send a plain text message. Callers bound this with their own deadline;
    /// dropping the future abandons the send.
    async fn send_text(&self, to: &Jid, text: &str) -> Result<()>;

    /// Whether a stored device identity exists, i.e. pairing already happened.
    fn has_identity(&self) -> bool;

    /// Open the pairing stream. It closes once pairing completes or fails.
    async fn pairing_events(&self) -> Result<mpsc::Receiver<PairingEvent>>;

    /// Subscribe a handler to all future events.
    fn add_event_handler(&self, handler: Arc<dyn EventHandler>);
}
