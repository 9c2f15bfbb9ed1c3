use std::sync::Arc;

use {
    chatrelay_config::{RelayConfig, SupervisorConfig},
    chatrelay_session::SessionController,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::{
    completion::CompletionGateway,
    dispatcher::EventDispatcher,
    error::BootstrapError,
    pairing::{CodeRenderer, run_pairing},
    pipeline::RelayPipeline,
    supervisor::ReconnectSupervisor,
};

/// Startup wiring: dispatcher, first connect or pairing, supervisor.
pub struct Bridge {
    session: Arc<dyn SessionController>,
    completion: Arc<dyn CompletionGateway>,
    relay: RelayConfig,
    supervisor: SupervisorConfig,
}

/// A started bridge. Dropping it leaves the supervisor running; call
/// [`shutdown`](Self::shutdown) to stop cleanly.
pub struct RunningBridge {
    session: Arc<dyn SessionController>,
    supervisor: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Bridge {
    pub fn new(
        session: Arc<dyn SessionController>,
        completion: Arc<dyn CompletionGateway>,
        relay: RelayConfig,
        supervisor: SupervisorConfig,
    ) -> Self {
        Self {
            session,
            completion,
            relay,
            supervisor,
        }
    }

    /// Bring the bridge up.
    ///
    /// The dispatcher is subscribed before the first connect so no message
    /// delivered right after login is missed. Without a stored identity the
    /// pairing flow runs first, rendering codes through `renderer`.
    pub async fn start(
        self,
        renderer: &mut dyn CodeRenderer,
    ) -> Result<RunningBridge, BootstrapError> {
        let pipeline = Arc::new(RelayPipeline::new(
            self.completion,
            Arc::clone(&self.session),
        ));
        self.session
            .add_event_handler(Arc::new(EventDispatcher::new(pipeline, &self.relay)));

        if self.session.has_identity() {
            self.session
                .connect()
                .await
                .map_err(BootstrapError::Connect)?;
            info!("connected with stored identity");
        } else {
            info!("no stored identity, starting pairing");
            run_pairing(self.session.as_ref(), renderer).await?;
        }

        let cancel = CancellationToken::new();
        let supervisor =
            ReconnectSupervisor::new(Arc::clone(&self.session), &self.supervisor).spawn(cancel.clone());

        Ok(RunningBridge {
            session: self.session,
            supervisor,
            cancel,
        })
    }
}

impl RunningBridge {
    /// Stop the supervisor, then disconnect. In-flight relays are abandoned.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.supervisor.await {
            warn!(error = %e, "supervisor task ended abnormally");
        }
        self.session.disconnect().await;
        info!("disconnected");
    }
}
