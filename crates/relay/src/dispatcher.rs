use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    chatrelay_common::allowlist::is_allowed,
    chatrelay_config::RelayConfig,
    chatrelay_session::{EventHandler, InboundEvent, Jid, MessageEvent},
    tokio::{sync::Semaphore, task::JoinHandle},
    tracing::{debug, info},
};

use crate::pipeline::{RelayOutcome, RelayPipeline, RelayRequest};

/// Turns inbound events into relays.
///
/// Only direct text messages from other accounts qualify. Each one runs as
/// its own task with its own deadline; at most `max_in_flight` run at once,
/// and further messages wait for a slot before their deadline starts.
pub struct EventDispatcher {
    pipeline: Arc<RelayPipeline>,
    deadline: Duration,
    allowlist: Vec<String>,
    slots: Arc<Semaphore>,
}

impl EventDispatcher {
    pub fn new(pipeline: Arc<RelayPipeline>, config: &RelayConfig) -> Self {
        Self {
            pipeline,
            deadline: config.deadline(),
            allowlist: config.allowlist.clone(),
            slots: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
        }
    }

    /// Handle one event, returning the spawned relay when it qualifies.
    pub async fn dispatch(&self, event: InboundEvent) -> Option<JoinHandle<RelayOutcome>> {
        let message = match event {
            InboundEvent::Message(message) => message,
            InboundEvent::PairingCode { .. }
            | InboundEvent::PairingOther { .. }
            | InboundEvent::Ignored => return None,
        };

        let (recipient, query) = self.qualify(message)?;

        let permit = Arc::clone(&self.slots).acquire_owned().await.ok()?;
        let request = RelayRequest::new(recipient, query, self.deadline);
        let pipeline = Arc::clone(&self.pipeline);
        Some(tokio::spawn(async move {
            let outcome = pipeline.relay(request).await;
            drop(permit);
            outcome
        }))
    }

    fn qualify(&self, message: MessageEvent) -> Option<(Jid, String)> {
        if message.chat.is_group() {
            debug!(chat = %message.chat, "ignoring group message");
            return None;
        }
        if message.from_me {
            debug!(chat = %message.chat, "ignoring own message");
            return None;
        }

        let text = message.conversation_text();
        info!(sender = %message.sender.user, text, "message received");
        if text.is_empty() {
            return None;
        }

        if !is_allowed(&message.sender.user, &self.allowlist) {
            info!(sender = %message.sender.user, "sender not on allowlist, ignoring");
            return None;
        }

        Some((message.sender.to_direct(), text.to_string()))
    }
}

#[async_trait]
impl EventHandler for EventDispatcher {
    async fn handle(&self, event: InboundEvent) {
        // The relay reports its own outcome.
        let _ = self.dispatch(event).await;
    }
}
