//! [`SessionController`] backed by the Baileys sidecar.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, RwLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    chatrelay_config::WhatsAppConfig,
    chatrelay_session::{
        self as session, EventHandler, InboundEvent, Jid, PairingEvent, SessionController,
    },
    tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot, watch},
    tracing::{debug, info, warn},
    uuid::Uuid,
};

use crate::{
    error::{Error, Result},
    identity::IdentityStore,
    process::{SidecarLaunch, SidecarProcess, find_sidecar_dir, start_sidecar},
    sidecar::{LinkCallback, LinkEvent, SidecarLink},
    types::{BridgeFrame, SidecarFrame},
};

const LINK_ATTEMPTS: u32 = 20;
const LINK_RETRY_DELAY: Duration = Duration::from_millis(500);
const PAIRING_BUFFER: usize = 16;

/// Where the WhatsApp session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Down,
    /// `connect` sent, waiting for the sidecar's verdict.
    Connecting,
    /// No usable credentials; the sidecar is issuing pairing codes.
    Pairing,
    Connected,
    /// The phone unlinked this device.
    LoggedOut,
}

type PendingSends = HashMap<String, oneshot::Sender<session::Result<()>>>;

/// A WhatsApp Web session driven through the sidecar.
///
/// Must be created inside a Tokio runtime: event delivery runs on its own
/// task so a slow handler never stalls the socket reader.
pub struct WhatsAppSession {
    inner: Arc<Inner>,
}

struct Inner {
    config: WhatsAppConfig,
    identity: IdentityStore,
    state: watch::Sender<LinkState>,
    link: Mutex<Option<SidecarLink>>,
    /// Bumped per link so late events from a replaced link are ignored.
    generation: AtomicU64,
    process: AsyncMutex<Option<SidecarProcess>>,
    connect_lock: AsyncMutex<()>,
    pending: Mutex<PendingSends>,
    pairing_tx: Mutex<Option<mpsc::Sender<PairingEvent>>>,
    events_tx: mpsc::UnboundedSender<InboundEvent>,
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl WhatsAppSession {
    /// Open the identity store and prepare the session. Does not connect.
    pub fn new(config: WhatsAppConfig) -> Result<Self> {
        let identity = IdentityStore::open(config.resolved_auth_dir())?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handlers = Arc::new(RwLock::new(Vec::new()));
        tokio::spawn(deliver_events(events_rx, Arc::clone(&handlers)));

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                identity,
                state: watch::Sender::new(LinkState::Down),
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
                process: AsyncMutex::new(None),
                connect_lock: AsyncMutex::new(()),
                pending: Mutex::new(HashMap::new()),
                pairing_tx: Mutex::new(None),
                events_tx,
                handlers,
            }),
        })
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.inner.identity
    }

    pub fn state(&self) -> LinkState {
        *self.inner.state.borrow()
    }
}

#[async_trait]
impl SessionController for WhatsAppSession {
    async fn connect(&self) -> session::Result<()> {
        // Supervisor and startup may race here; only one connect runs.
        let _serial = self.inner.connect_lock.lock().await;
        if self.is_connected() {
            debug!("already connected");
            return Ok(());
        }

        self.inner.ensure_link().await.map_err(session::Error::connect)?;

        let mut state_rx = self.inner.state.subscribe();
        self.inner.state.send_replace(LinkState::Connecting);
        self.inner
            .send_frame(&BridgeFrame::Connect {
                auth_dir: self.inner.identity.dir().display().to_string(),
            })
            .map_err(session::Error::connect)?;

        let timeout = self.inner.config.connect_timeout();
        let settled = tokio::time::timeout(
            timeout,
            state_rx.wait_for(|state| *state != LinkState::Connecting),
        )
        .await;
        let state = match settled {
            Ok(Ok(state)) => *state,
            Ok(Err(_)) => LinkState::Down,
            Err(_) => {
                return Err(session::Error::connect(format!(
                    "sidecar did not answer within {}s",
                    timeout.as_secs()
                )));
            },
        };

        match state {
            LinkState::Connected => Ok(()),
            // Only a caller reading the pairing stream can finish pairing.
            LinkState::Pairing if self.inner.pairing_open() => {
                info!("no valid credentials, pairing started");
                Ok(())
            },
            LinkState::Pairing => Err(session::Error::connect(
                "device is not paired and no pairing flow is running",
            )),
            LinkState::LoggedOut => Err(session::Error::connect(
                "device was logged out, pair again",
            )),
            LinkState::Down | LinkState::Connecting => {
                Err(session::Error::connect("sidecar dropped the session"))
            },
        }
    }

    async fn disconnect(&self) {
        if let Some(link) = lock(&self.inner.link).take() {
            let _ = link.send(&BridgeFrame::Disconnect);
            link.close();
        }
        self.inner.state.send_replace(LinkState::Down);
        self.inner.close_pairing();
        self.inner.fail_pending();

        if let Some(process) = self.inner.process.lock().await.take() {
            process.stop().await;
        }
        info!("whatsapp session closed");
    }

    fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    async fn send_text(&self, to: &Jid, text: &str) -> session::Result<()> {
        if !self.is_connected() {
            return Err(session::Error::NotConnected);
        }

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending).insert(request_id.clone(), tx);
        let _pending = PendingGuard {
            inner: &self.inner,
            request_id: &request_id,
        };

        self.inner
            .send_frame(&BridgeFrame::SendText {
                request_id: request_id.clone(),
                to: to.to_string(),
                text: text.to_string(),
            })
            .map_err(|_| session::Error::NotConnected)?;

        rx.await.unwrap_or(Err(session::Error::NotConnected))
    }

    fn has_identity(&self) -> bool {
        self.inner.identity.has_identity()
    }

    async fn pairing_events(&self) -> session::Result<mpsc::Receiver<PairingEvent>> {
        let (tx, rx) = mpsc::channel(PAIRING_BUFFER);
        *lock(&self.inner.pairing_tx) = Some(tx);
        Ok(rx)
    }

    fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(handler);
    }
}

impl Inner {
    async fn ensure_link(self: &Arc<Self>) -> Result<()> {
        if lock(&self.link).as_ref().is_some_and(SidecarLink::is_alive) {
            return Ok(());
        }
        if self.config.auto_start_sidecar {
            self.ensure_process().await?;
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let weak: Weak<Self> = Arc::downgrade(self);
        let on_event: LinkCallback = Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_link_event(generation, event);
            }
        });

        let link = SidecarLink::connect_with_retry(
            &self.config.sidecar_url(),
            LINK_ATTEMPTS,
            LINK_RETRY_DELAY,
            on_event,
        )
        .await?;
        *lock(&self.link) = Some(link);
        Ok(())
    }

    async fn ensure_process(&self) -> Result<()> {
        let mut process = self.process.lock().await;
        if let Some(running) = process.as_mut()
            && running.is_running()
        {
            return Ok(());
        }

        let launch = SidecarLaunch {
            dir: find_sidecar_dir(self.config.sidecar_dir.as_deref())?,
            port: self.config.sidecar_port,
            auth_dir: self.identity.dir().to_path_buf(),
        };
        *process = Some(start_sidecar(&launch).await?);
        Ok(())
    }

    fn send_frame(&self, frame: &BridgeFrame) -> Result<()> {
        match lock(&self.link).as_ref() {
            Some(link) => link.send(frame),
            None => Err(Error::LinkClosed),
        }
    }

    fn on_link_event(&self, generation: u64, event: LinkEvent) {
        if generation != self.generation.load(Ordering::Acquire) {
            debug!(generation, "ignoring event from replaced link");
            return;
        }
        match event {
            LinkEvent::Frame(frame) => self.on_frame(frame),
            LinkEvent::Closed => {
                self.state.send_if_modified(|state| {
                    let changed = !matches!(state, LinkState::Down | LinkState::LoggedOut);
                    if changed {
                        *state = LinkState::Down;
                    }
                    changed
                });
                self.close_pairing();
                self.fail_pending();
            },
        }
    }

    fn on_frame(&self, frame: SidecarFrame) {
        let inbound = frame.to_event();
        match frame {
            SidecarFrame::Qr { code } => {
                self.state.send_replace(LinkState::Pairing);
                self.forward_pairing(PairingEvent::Code(code));
            },
            SidecarFrame::Pairing { event } => self.forward_pairing(PairingEvent::Other(event)),
            SidecarFrame::PairingDone => self.close_pairing(),
            SidecarFrame::Connected { jid } => {
                info!(jid = jid.as_deref().unwrap_or("unknown"), "whatsapp connected");
                self.state.send_replace(LinkState::Connected);
                self.close_pairing();
            },
            SidecarFrame::Disconnected { reason } => {
                warn!(reason = reason.as_deref().unwrap_or("unknown"), "whatsapp disconnected");
                self.state.send_replace(LinkState::Down);
                self.fail_pending();
            },
            SidecarFrame::LoggedOut => {
                warn!("whatsapp logged this device out");
                self.state.send_replace(LinkState::LoggedOut);
                self.close_pairing();
                self.fail_pending();
            },
            SidecarFrame::SendResult {
                request_id,
                success,
                error,
            } => {
                let result = if success {
                    Ok(())
                } else {
                    Err(session::Error::send(
                        error.unwrap_or_else(|| "rejected by sidecar".into()),
                    ))
                };
                match lock(&self.pending).remove(&request_id) {
                    Some(tx) => {
                        let _ = tx.send(result);
                    },
                    None => debug!(%request_id, "send result for unknown request"),
                }
            },
            SidecarFrame::Error { error } => warn!(%error, "sidecar reported an error"),
            SidecarFrame::Message { .. } => {},
            SidecarFrame::Unknown => debug!("unhandled sidecar frame"),
        }

        if !matches!(inbound, InboundEvent::Ignored) {
            let _ = self.events_tx.send(inbound);
        }
    }

    fn forward_pairing(&self, event: PairingEvent) {
        if let Some(tx) = lock(&self.pairing_tx).as_ref()
            && let Err(e) = tx.try_send(event)
        {
            warn!(error = %e, "pairing event dropped");
        }
    }

    fn pairing_open(&self) -> bool {
        lock(&self.pairing_tx)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    fn close_pairing(&self) {
        lock(&self.pairing_tx).take();
    }

    /// Dropping the senders fails every waiting `send_text` with `NotConnected`.
    fn fail_pending(&self) {
        lock(&self.pending).clear();
    }
}

/// Removes a pending send when `send_text` finishes or is abandoned.
struct PendingGuard<'a> {
    inner: &'a Inner,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(&self.inner.pending).remove(self.request_id);
    }
}

async fn deliver_events(
    mut events: mpsc::UnboundedReceiver<InboundEvent>,
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
) {
    while let Some(event) = events.recv().await {
        let current = handlers.read().unwrap_or_else(|e| e.into_inner()).clone();
        for handler in current {
            handler.handle(event.clone()).await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        futures::{SinkExt, StreamExt},
        serde_json::{Value, json},
        std::path::Path,
        tokio::net::TcpListener,
        tokio_tungstenite::{accept_async, tungstenite::Message},
    };

    enum Push {
        Frame(Value),
        Hangup,
    }

    /// A scripted sidecar: answers each bridge frame via `respond`, records
    /// what it received, and accepts pushed frames from the test.
    struct MockSidecar {
        url: String,
        received: mpsc::UnboundedReceiver<Value>,
        push: mpsc::UnboundedSender<Push>,
    }

    impl MockSidecar {
        async fn start(respond: fn(&Value) -> Vec<Value>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("ws://{}", listener.local_addr().unwrap());
            let (received_tx, received) = mpsc::unbounded_channel();
            let (push, mut push_rx) = mpsc::unbounded_channel::<Push>();

            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let mut ws = accept_async(stream).await.unwrap();
                    loop {
                        tokio::select! {
                            incoming = ws.next() => match incoming {
                                Some(Ok(Message::Text(text))) => {
                                    let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                                    for reply in respond(&frame) {
                                        ws.send(Message::Text(reply.to_string().into())).await.unwrap();
                                    }
                                    let _ = received_tx.send(frame);
                                },
                                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                                Some(Ok(_)) => {},
                            },
                            pushed = push_rx.recv() => match pushed {
                                Some(Push::Frame(frame)) => {
                                    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
                                },
                                Some(Push::Hangup) => {
                                    let _ = ws.close(None).await;
                                    break;
                                },
                                None => return,
                            },
                        }
                    }
                }
            });

            Self {
                url,
                received,
                push,
            }
        }

        fn push(&self, frame: Value) {
            self.push.send(Push::Frame(frame)).unwrap();
        }

        async fn next_received(&mut self) -> Value {
            self.received.recv().await.unwrap()
        }
    }

    fn logs_in(frame: &Value) -> Vec<Value> {
        match frame["type"].as_str() {
            Some("connect") => vec![json!({"type": "connected", "jid": "491700000000:1@s.whatsapp.net"})],
            Some("send_text") => vec![json!({
                "type": "send_result",
                "request_id": frame["request_id"],
                "success": true
            })],
            _ => vec![],
        }
    }

    fn config(url: &str, auth: &Path) -> WhatsAppConfig {
        WhatsAppConfig {
            sidecar_url: Some(url.to_string()),
            auth_dir: Some(auth.to_path_buf()),
            auto_start_sidecar: false,
            connect_timeout_secs: 2,
            ..WhatsAppConfig::default()
        }
    }

    fn asks_for_pairing(frame: &Value) -> Vec<Value> {
        match frame["type"].as_str() {
            Some("connect") => vec![json!({"type": "qr", "code": "2@first"})],
            _ => vec![],
        }
    }

    fn session(sidecar: &MockSidecar, auth: &tempfile::TempDir) -> WhatsAppSession {
        WhatsAppSession::new(config(&sidecar.url, auth.path())).unwrap()
    }

    struct Collect(mpsc::UnboundedSender<InboundEvent>);

    #[async_trait]
    impl EventHandler for Collect {
        async fn handle(&self, event: InboundEvent) {
            let _ = self.0.send(event);
        }
    }

    #[tokio::test]
    async fn connects_and_sends_text() {
        let mut sidecar = MockSidecar::start(logs_in).await;
        let auth = tempfile::tempdir().unwrap();
        let session = session(&sidecar, &auth);

        assert!(!session.is_connected());
        session.connect().await.unwrap();
        assert!(session.is_connected());
        let connect = sidecar.next_received().await;
        assert_eq!(connect["type"], "connect");
        assert_eq!(connect["auth_dir"], auth.path().display().to_string());

        session
            .send_text(&Jid::user("42"), "hello back")
            .await
            .unwrap();
        let sent = sidecar.next_received().await;
        assert_eq!(sent["to"], "42@s.whatsapp.net");
        assert_eq!(sent["text"], "hello back");
        assert!(lock(&session.inner.pending).is_empty());
    }

    #[tokio::test]
    async fn redundant_connect_is_a_no_op() {
        let mut sidecar = MockSidecar::start(logs_in).await;
        let auth = tempfile::tempdir().unwrap();
        let session = Arc::new(session(&sidecar, &auth));

        let (a, b) = tokio::join!(session.connect(), session.connect());
        a.unwrap();
        b.unwrap();
        assert_eq!(sidecar.next_received().await["type"], "connect");

        session.send_text(&Jid::user("1"), "x").await.unwrap();
        // The next frame is the send, not a second connect.
        assert_eq!(sidecar.next_received().await["type"], "send_text");
    }

    #[tokio::test]
    async fn send_requires_a_live_session() {
        let sidecar = MockSidecar::start(logs_in).await;
        let auth = tempfile::tempdir().unwrap();
        let session = session(&sidecar, &auth);

        let err = session.send_text(&Jid::user("42"), "hi").await.unwrap_err();
        assert!(matches!(err, session::Error::NotConnected));
    }

    #[tokio::test]
    async fn rejected_send_is_an_error() {
        fn rejects(frame: &Value) -> Vec<Value> {
            match frame["type"].as_str() {
                Some("send_text") => vec![json!({
                    "type": "send_result",
                    "request_id": frame["request_id"],
                    "success": false,
                    "error": "rate limited"
                })],
                _ => logs_in(frame),
            }
        }
        let sidecar = MockSidecar::start(rejects).await;
        let auth = tempfile::tempdir().unwrap();
        let session = session(&sidecar, &auth);
        session.connect().await.unwrap();

        let err = session.send_text(&Jid::user("42"), "hi").await.unwrap_err();
        assert_eq!(err.to_string(), "send failed: rate limited");
    }

    #[tokio::test]
    async fn hangup_fails_pending_sends_and_reconnect_recovers() {
        fn ignores_sends(frame: &Value) -> Vec<Value> {
            match frame["type"].as_str() {
                Some("send_text") => vec![],
                _ => logs_in(frame),
            }
        }
        let mut sidecar = MockSidecar::start(ignores_sends).await;
        let auth = tempfile::tempdir().unwrap();
        let session = Arc::new(session(&sidecar, &auth));
        session.connect().await.unwrap();
        sidecar.next_received().await;

        let send = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.send_text(&Jid::user("42"), "hi").await })
        };
        assert_eq!(sidecar.next_received().await["type"], "send_text");
        sidecar.push.send(Push::Hangup).unwrap();

        let err = send.await.unwrap().unwrap_err();
        assert!(matches!(err, session::Error::NotConnected));
        assert!(!session.is_connected());

        session.connect().await.unwrap();
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn pairing_codes_stream_until_connected() {
        let sidecar = MockSidecar::start(asks_for_pairing).await;
        let auth = tempfile::tempdir().unwrap();
        let session = session(&sidecar, &auth);
        assert!(!session.has_identity());

        let mut pairing = session.pairing_events().await.unwrap();
        session.connect().await.unwrap();
        assert_eq!(session.state(), LinkState::Pairing);
        assert!(!session.is_connected());
        assert_eq!(pairing.recv().await, Some(PairingEvent::Code("2@first".into())));

        sidecar.push(json!({"type": "qr", "code": "2@second"}));
        sidecar.push(json!({"type": "pairing", "event": "success"}));
        sidecar.push(json!({"type": "connected"}));
        sidecar.push(json!({"type": "pairing_done"}));

        assert_eq!(pairing.recv().await, Some(PairingEvent::Code("2@second".into())));
        assert_eq!(pairing.recv().await, Some(PairingEvent::Other("success".into())));
        assert_eq!(pairing.recv().await, None);
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn pairing_without_a_listener_fails_connect() {
        let sidecar = MockSidecar::start(asks_for_pairing).await;
        let auth = tempfile::tempdir().unwrap();
        let session = session(&sidecar, &auth);

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, session::Error::Connect { .. }));
        assert_eq!(session.state(), LinkState::Pairing);
        assert!(!session.is_connected());

        // A dropped pairing stream counts as no listener.
        drop(session.pairing_events().await.unwrap());
        assert!(session.connect().await.is_err());
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn logged_out_device_cannot_connect() {
        fn logs_out(frame: &Value) -> Vec<Value> {
            match frame["type"].as_str() {
                Some("connect") => vec![json!({"type": "logged_out"})],
                _ => vec![],
            }
        }
        let sidecar = MockSidecar::start(logs_out).await;
        let auth = tempfile::tempdir().unwrap();
        let session = session(&sidecar, &auth);

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, session::Error::Connect { .. }));
        assert_eq!(session.state(), LinkState::LoggedOut);
    }

    #[tokio::test]
    async fn silent_sidecar_times_out() {
        let sidecar = MockSidecar::start(|_| vec![]).await;
        let auth = tempfile::tempdir().unwrap();
        let mut config = config(&sidecar.url, auth.path());
        config.connect_timeout_secs = 1;
        let session = WhatsAppSession::new(config).unwrap();

        let err = session.connect().await.unwrap_err();
        assert!(err.to_string().contains("did not answer"));
    }

    #[tokio::test]
    async fn messages_reach_every_handler() {
        let sidecar = MockSidecar::start(logs_in).await;
        let auth = tempfile::tempdir().unwrap();
        let session = session(&sidecar, &auth);
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.add_event_handler(Arc::new(Collect(tx.clone())));
        session.add_event_handler(Arc::new(Collect(tx)));
        session.connect().await.unwrap();

        sidecar.push(json!({"type": "presence"}));
        sidecar.push(json!({
            "type": "message",
            "chat_jid": "42@s.whatsapp.net",
            "sender_jid": "42@s.whatsapp.net",
            "text": "hi"
        }));

        for _ in 0..2 {
            let InboundEvent::Message(message) = rx.recv().await.unwrap() else {
                panic!("expected message event");
            };
            assert_eq!(message.sender, Jid::user("42"));
            assert_eq!(message.conversation_text(), "hi");
        }
    }

    #[tokio::test]
    async fn disconnect_tells_the_sidecar() {
        let mut sidecar = MockSidecar::start(logs_in).await;
        let auth = tempfile::tempdir().unwrap();
        let session = session(&sidecar, &auth);
        session.connect().await.unwrap();
        sidecar.next_received().await;

        session.disconnect().await;
        assert_eq!(sidecar.next_received().await["type"], "disconnect");
        assert!(!session.is_connected());
        assert!(matches!(
            session.send_text(&Jid::user("42"), "late").await,
            Err(session::Error::NotConnected)
        ));
    }
}
