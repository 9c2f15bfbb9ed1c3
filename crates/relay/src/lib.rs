//! Message relay core.
//!
//! Inbound direct messages flow
//! [`EventDispatcher`] → [`RelayPipeline`] → [`CompletionGateway`] →
//! [`SessionController::send_text`](chatrelay_session::SessionController::send_text),
//! each relay bounded by a fixed deadline. [`Bridge`] wires the pieces
//! together at startup, runs the pairing flow on first launch and keeps the
//! session alive with a [`ReconnectSupervisor`].

pub mod bridge;
pub mod completion;
pub mod dispatcher;
pub mod error;
pub mod pairing;
pub mod pipeline;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod fake;

pub use {
    bridge::{Bridge, RunningBridge},
    completion::{CompletionGateway, HttpCompletionClient},
    dispatcher::EventDispatcher,
    error::{BootstrapError, RelayError, RelayStage},
    pairing::{CodeRenderer, PairingReport, TerminalQrRenderer, run_pairing},
    pipeline::{RelayOutcome, RelayPipeline, RelayRequest},
    supervisor::{CycleOutcome, ReconnectSupervisor},
};
