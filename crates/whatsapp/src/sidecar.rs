//! WebSocket link to the sidecar.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    futures::{SinkExt, StreamExt},
    tokio::{net::TcpStream, sync::mpsc},
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    types::{BridgeFrame, SidecarFrame},
};

/// Something that happened on the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Frame(SidecarFrame),
    /// The socket is gone. Sent exactly once, last.
    Closed,
}

/// Invoked on the link's reader task for every event. Must not block.
pub type LinkCallback = Arc<dyn Fn(LinkEvent) + Send + Sync>;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An open connection to the sidecar.
///
/// Frames are queued to a writer half and sent in order. The link closes
/// when either side hangs up or [`close`](Self::close) is called.
pub struct SidecarLink {
    write_tx: mpsc::UnboundedSender<Message>,
    alive: Arc<AtomicBool>,
}

impl SidecarLink {
    /// Connect once.
    pub async fn open(url: &str, on_event: LinkCallback) -> Result<Self> {
        let (socket, _response) = connect_async(url).await?;
        info!(url, "connected to sidecar");
        Ok(Self::spawn(socket, on_event))
    }

    /// Connect, retrying while the sidecar is still starting up.
    pub async fn connect_with_retry(
        url: &str,
        attempts: u32,
        delay: Duration,
        on_event: LinkCallback,
    ) -> Result<Self> {
        let mut last_error = None;
        for attempt in 1..=attempts.max(1) {
            match Self::open(url, Arc::clone(&on_event)).await {
                Ok(link) => return Ok(link),
                Err(e) => {
                    debug!(url, attempt, error = %e, "sidecar not reachable yet");
                    last_error = Some(e);
                },
            }
            if attempt < attempts {
                tokio::time::sleep(delay).await;
            }
        }
        Err(last_error.unwrap_or(Error::LinkClosed))
    }

    fn spawn(socket: Socket, on_event: LinkCallback) -> Self {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        tokio::spawn(run_link(socket, write_rx, Arc::clone(&alive), on_event));
        Self { write_tx, alive }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Queue a frame for the sidecar.
    pub fn send(&self, frame: &BridgeFrame) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::LinkClosed);
        }
        let json = serde_json::to_string(frame)?;
        self.write_tx
            .send(Message::Text(json.into()))
            .map_err(|_| Error::LinkClosed)
    }

    /// Close the socket after any queued frames are written.
    pub fn close(&self) {
        let _ = self.write_tx.send(Message::Close(None));
    }
}

async fn run_link(
    socket: Socket,
    mut write_rx: mpsc::UnboundedReceiver<Message>,
    alive: Arc<AtomicBool>,
    on_event: LinkCallback,
) {
    let (mut sink, mut reader) = socket.split();

    let result: Result<()> = loop {
        tokio::select! {
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<SidecarFrame>(text.as_str()) {
                        Ok(frame) => on_event(LinkEvent::Frame(frame)),
                        Err(e) => warn!(error = %e, "unparseable sidecar frame"),
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        break Err(e.into());
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    debug!("sidecar closed the link");
                    break Ok(());
                },
                Some(Ok(_)) => {},
                Some(Err(e)) => break Err(e.into()),
            },
            outgoing = write_rx.recv() => match outgoing {
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    if let Err(e) = sink.send(message).await {
                        break Err(e.into());
                    }
                    if closing {
                        break Ok(());
                    }
                },
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break Ok(());
                },
            },
        }
    };

    alive.store(false, Ordering::Release);
    if let Err(e) = result {
        warn!(error = %e, "sidecar link failed");
    }
    on_event(LinkEvent::Closed);
}
