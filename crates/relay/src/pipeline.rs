use std::{sync::Arc, time::Duration};

use {
    chatrelay_session::{Jid, SessionController},
    tokio::time::{Instant, timeout_at},
    tracing::{info, warn},
};

use crate::{
    completion::CompletionGateway,
    error::{RelayError, RelayStage},
};

/// One message to relay.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    /// Direct address the reply goes to.
    pub recipient: Jid,
    pub query: String,
    /// Covers both the completion call and the reply send.
    pub deadline: Instant,
}

impl RelayRequest {
    pub fn new(recipient: Jid, query: impl Into<String>, budget: Duration) -> Self {
        Self {
            recipient,
            query: query.into(),
            deadline: Instant::now() + budget,
        }
    }
}

#[derive(Debug)]
pub enum RelayOutcome {
    Replied,
    Failed(RelayError),
}

impl RelayOutcome {
    pub fn is_replied(&self) -> bool {
        matches!(self, Self::Replied)
    }
}

/// Completion call followed by the reply send, under one deadline.
pub struct RelayPipeline {
    completion: Arc<dyn CompletionGateway>,
    session: Arc<dyn SessionController>,
}

impl RelayPipeline {
    pub fn new(completion: Arc<dyn CompletionGateway>, session: Arc<dyn SessionController>) -> Self {
        Self {
            completion,
            session,
        }
    }

    /// Relay one message. Failures are logged here and go no further: the
    /// sender simply gets no reply.
    pub async fn relay(&self, request: RelayRequest) -> RelayOutcome {
        match self.try_relay(&request).await {
            Ok(()) => {
                info!(recipient = %request.recipient, "reply sent");
                RelayOutcome::Replied
            },
            Err(e) => {
                warn!(recipient = %request.recipient, error = %e, "relay failed, no reply sent");
                RelayOutcome::Failed(e)
            },
        }
    }

    async fn try_relay(&self, request: &RelayRequest) -> Result<(), RelayError> {
        let reply = timeout_at(
            request.deadline,
            self.completion.fetch_completion(&request.query),
        )
        .await
        .map_err(|_| RelayError::Timeout {
            stage: RelayStage::Completion,
        })??;

        timeout_at(
            request.deadline,
            self.session.send_text(&request.recipient, &reply),
        )
        .await
        .map_err(|_| RelayError::Timeout {
            stage: RelayStage::Send,
        })??;

        Ok(())
    }
}
