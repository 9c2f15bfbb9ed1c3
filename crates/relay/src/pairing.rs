//! First-run device pairing.

use std::io::{self, Stdout, Write};

use {
    chatrelay_session::{PairingEvent, SessionController},
    qrcode::{EcLevel, QrCode, render::unicode::Dense1x2},
    tracing::{info, warn},
};

use crate::error::BootstrapError;

/// Presents pairing codes for out-of-band scanning.
pub trait CodeRenderer: Send {
    /// Show `code`, replacing whatever code was shown before.
    fn render(&mut self, code: &str) -> io::Result<()>;
}

/// Draws codes as half-block QR patterns on a terminal.
///
/// A new code erases the previous block first, so only the current code is
/// ever on screen.
pub struct TerminalQrRenderer<W: Write + Send> {
    out: W,
    erase_previous: bool,
    lines_drawn: usize,
}

impl TerminalQrRenderer<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout(), true)
    }
}

impl<W: Write + Send> TerminalQrRenderer<W> {
    pub fn new(out: W, erase_previous: bool) -> Self {
        Self {
            out,
            erase_previous,
            lines_drawn: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> CodeRenderer for TerminalQrRenderer<W> {
    fn render(&mut self, code: &str) -> io::Result<()> {
        let qr = QrCode::with_error_correction_level(code, EcLevel::L).map_err(io::Error::other)?;
        let block = qr
            .render::<Dense1x2>()
            .dark_color(Dense1x2::Light)
            .light_color(Dense1x2::Dark)
            .quiet_zone(true)
            .build();

        if self.erase_previous && self.lines_drawn > 0 {
            // Cursor up to the first line of the old block, clear to end of screen.
            write!(self.out, "\x1b[{}F\x1b[J", self.lines_drawn)?;
        }
        writeln!(self.out, "{block}")?;
        self.out.flush()?;
        self.lines_drawn = block.lines().count();
        Ok(())
    }
}

/// What happened during pairing.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PairingReport {
    /// Codes actually drawn, in order. Superseded codes that were already
    /// stale when read are skipped.
    pub rendered: Vec<String>,
    /// Non-code events seen, in order (`success`, `timeout`, ...).
    pub events: Vec<String>,
}

/// Run the pairing flow to completion.
///
/// Opens the pairing stream, connects, then renders codes until the stream
/// closes. The flow does not judge success; the caller relies on session
/// liveness afterwards. A failed connect is fatal.
pub async fn run_pairing(
    session: &dyn SessionController,
    renderer: &mut dyn CodeRenderer,
) -> Result<PairingReport, BootstrapError> {
    let mut events = session
        .pairing_events()
        .await
        .map_err(BootstrapError::Pairing)?;
    session.connect().await.map_err(BootstrapError::Connect)?;
    info!("waiting for pairing, scan the code with the phone app");

    let mut report = PairingReport::default();
    while let Some(first) = events.recv().await {
        // Drain whatever is already queued so a backlog of codes collapses
        // to the newest one.
        let mut batch = vec![first];
        while let Ok(next) = events.try_recv() {
            batch.push(next);
        }

        let mut latest_code = None;
        for event in batch {
            match event {
                PairingEvent::Code(code) => latest_code = Some(code),
                PairingEvent::Other(label) => {
                    info!(event = %label, "pairing event");
                    report.events.push(label);
                },
            }
        }

        if let Some(code) = latest_code {
            if let Err(e) = renderer.render(&code) {
                warn!(error = %e, "failed to render pairing code");
            }
            report.rendered.push(code);
        }
    }

    info!(connected = session.is_connected(), "pairing stream closed");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::fake::FakeSession,
        std::sync::{Arc, Mutex},
    };

    #[derive(Default, Clone)]
    struct Recorder {
        shown: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn shown(&self) -> Vec<String> {
            self.shown.lock().unwrap().clone()
        }
    }

    impl CodeRenderer for Recorder {
        fn render(&mut self, code: &str) -> io::Result<()> {
            self.shown.lock().unwrap().push(code.to_string());
            Ok(())
        }
    }

    async fn wait_for_shown(recorder: &Recorder, n: usize) {
        while recorder.shown().len() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn renders_codes_until_stream_closes() {
        let (session, tx) = FakeSession::unpaired();
        let session = Arc::new(session);
        let recorder = Recorder::default();

        let flow = {
            let session = Arc::clone(&session);
            let mut renderer = recorder.clone();
            tokio::spawn(async move { run_pairing(session.as_ref(), &mut renderer).await })
        };

        tx.send(PairingEvent::Code("ref-1".into())).await.unwrap();
        wait_for_shown(&recorder, 1).await;
        tx.send(PairingEvent::Code("ref-2".into())).await.unwrap();
        wait_for_shown(&recorder, 2).await;
        tx.send(PairingEvent::Other("success".into())).await.unwrap();
        drop(tx);

        let report = flow.await.unwrap().unwrap();
        assert_eq!(recorder.shown(), vec!["ref-1", "ref-2"]);
        assert_eq!(report.rendered, recorder.shown());
        assert_eq!(report.events, vec!["success"]);
        assert_eq!(session.connect_calls(), 1);
    }

    #[tokio::test]
    async fn queued_codes_collapse_to_the_newest() {
        let (session, tx) = FakeSession::unpaired();
        for event in [
            PairingEvent::Code("stale-1".into()),
            PairingEvent::Code("stale-2".into()),
            PairingEvent::Other("timeout".into()),
            PairingEvent::Code("fresh".into()),
        ] {
            tx.send(event).await.unwrap();
        }
        drop(tx);

        let mut recorder = Recorder::default();
        let report = run_pairing(&session, &mut recorder).await.unwrap();

        assert_eq!(recorder.shown(), vec!["fresh"]);
        assert_eq!(report.events, vec!["timeout"]);
    }

    #[tokio::test]
    async fn connect_failure_is_fatal() {
        let (session, tx) = FakeSession::unpaired();
        session.fail_next_connects(1);
        tx.send(PairingEvent::Code("never-shown".into())).await.unwrap();

        let mut recorder = Recorder::default();
        let err = run_pairing(&session, &mut recorder).await.unwrap_err();

        assert!(matches!(err, BootstrapError::Connect(_)));
        assert!(recorder.shown().is_empty());
    }

    #[test]
    fn terminal_renderer_erases_previous_block() {
        let mut renderer = TerminalQrRenderer::new(Vec::new(), true);
        renderer.render("2@first").unwrap();
        let first_len = renderer.out.len();
        let first_lines = renderer.lines_drawn;
        assert!(first_lines > 0);

        renderer.render("2@second").unwrap();
        let out = String::from_utf8(renderer.into_inner()).unwrap();
        let second = &out[first_len..];
        assert!(second.starts_with(&format!("\x1b[{first_lines}F\x1b[J")));
        assert!(out.contains('▀') || out.contains('▄') || out.contains('█'));
    }

    #[test]
    fn plain_renderer_does_not_emit_escapes() {
        let mut renderer = TerminalQrRenderer::new(Vec::new(), false);
        renderer.render("2@first").unwrap();
        renderer.render("2@second").unwrap();
        let out = String::from_utf8(renderer.into_inner()).unwrap();
        assert!(!out.contains('\x1b'));
    }
}
