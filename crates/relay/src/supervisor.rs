use std::{sync::Arc, time::Duration};

use {
    chatrelay_config::SupervisorConfig,
    chatrelay_session::SessionController,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

/// Result of one supervisor cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Session was live; nothing to do.
    AlreadyConnected,
    /// Session was down and `connect` succeeded.
    Reconnected,
    /// Session was down and `connect` failed.
    Failed,
}

/// Keeps the session alive by polling liveness and reconnecting.
///
/// Each cycle checks `is_connected` right before acting and calls `connect`
/// only when the session is down. A failed reconnect adds `backoff` on top
/// of the regular poll interval, so failures never retry faster than
/// successes. The supervisor talks to nothing but the session.
pub struct ReconnectSupervisor {
    session: Arc<dyn SessionController>,
    poll_interval: Duration,
    backoff: Duration,
}

impl ReconnectSupervisor {
    pub fn new(session: Arc<dyn SessionController>, config: &SupervisorConfig) -> Self {
        Self {
            session,
            poll_interval: config.poll_interval(),
            backoff: config.backoff(),
        }
    }

    /// Run a single liveness check.
    pub async fn check_once(&self) -> CycleOutcome {
        if self.session.is_connected() {
            return CycleOutcome::AlreadyConnected;
        }

        debug!("session down, reconnecting");
        match self.session.connect().await {
            Ok(()) => {
                info!("reconnected successfully");
                CycleOutcome::Reconnected
            },
            Err(e) => {
                warn!(error = %e, backoff_secs = self.backoff.as_secs(), "reconnection error");
                CycleOutcome::Failed
            },
        }
    }

    /// Loop until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "reconnection supervisor started"
        );
        loop {
            if self.check_once().await == CycleOutcome::Failed
                && !sleep_or_cancel(self.backoff, &cancel).await
            {
                break;
            }
            if !sleep_or_cancel(self.poll_interval, &cancel).await {
                break;
            }
        }
        debug!("reconnection supervisor stopped");
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

/// Sleep for `duration`; `false` if cancelled first.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
