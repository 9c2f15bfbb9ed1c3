//! In-memory stand-ins for the session and completion service.

#![allow(clippy::unwrap_used)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    chatrelay_session::{
        Error as SessionError, EventHandler, InboundEvent, Jid, PairingEvent, SessionController,
    },
    tokio::sync::mpsc,
};

use crate::{completion::CompletionGateway, error::RelayError};

enum Reply {
    Text(String),
    Hang,
    Fail,
}

pub struct FakeCompletion {
    reply: Reply,
    delay: Option<Duration>,
    queries: Mutex<Vec<String>>,
}

impl FakeCompletion {
    pub fn replying(text: &str) -> Self {
        Self::new(Reply::Text(text.to_string()))
    }

    pub fn hanging() -> Self {
        Self::new(Reply::Hang)
    }

    pub fn failing() -> Self {
        Self::new(Reply::Fail)
    }

    fn new(reply: Reply) -> Self {
        Self {
            reply,
            delay: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionGateway for FakeCompletion {
    async fn fetch_completion(&self, query: &str) -> Result<String, RelayError> {
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.reply {
            Reply::Text(text) => Ok(text.clone()),
            Reply::Hang => std::future::pending().await,
            Reply::Fail => Err(RelayError::Status {
                status: reqwest::StatusCode::BAD_GATEWAY,
            }),
        }
    }
}

/// Session double recording every call.
#[derive(Default)]
pub struct FakeSession {
    connected: AtomicBool,
    identity: AtomicBool,
    /// Number of upcoming `connect` calls that fail.
    failures_left: AtomicUsize,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    send_delay: Option<Duration>,
    sent: Mutex<Vec<(Jid, String)>>,
    handlers: Mutex<Vec<Arc<dyn EventHandler>>>,
    pairing: Mutex<Option<mpsc::Receiver<PairingEvent>>>,
}

impl FakeSession {
    pub fn connected() -> Self {
        let session = Self::default();
        session.connected.store(true, Ordering::SeqCst);
        session.identity.store(true, Ordering::SeqCst);
        session
    }

    pub fn disconnected() -> Self {
        let session = Self::default();
        session.identity.store(true, Ordering::SeqCst);
        session
    }

    /// No stored identity; pairing events come from the returned sender.
    pub fn unpaired() -> (Self, mpsc::Sender<PairingEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let session = Self::default();
        *session.pairing.lock().unwrap() = Some(rx);
        (session, tx)
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    pub fn fail_next_connects(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(Jid, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }

    /// Deliver `event` to every handler, as a backend would.
    pub async fn emit(&self, event: InboundEvent) {
        let handlers = self.handlers.lock().unwrap().clone();
        for handler in handlers {
            handler.handle(event.clone()).await;
        }
    }
}

#[async_trait]
impl SessionController for FakeSession {
    async fn connect(&self) -> chatrelay_session::Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SessionError::connect("sidecar unreachable"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_text(&self, to: &Jid, text: &str) -> chatrelay_session::Result<()> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        self.sent.lock().unwrap().push((to.clone(), text.to_string()));
        Ok(())
    }

    fn has_identity(&self) -> bool {
        self.identity.load(Ordering::SeqCst)
    }

    async fn pairing_events(&self) -> chatrelay_session::Result<mpsc::Receiver<PairingEvent>> {
        self.pairing
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| SessionError::connect("pairing stream already taken"))
    }

    fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.lock().unwrap().push(handler);
    }
}
