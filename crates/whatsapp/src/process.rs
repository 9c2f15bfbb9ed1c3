//! Lifecycle of the Node.js sidecar process.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, BufReader},
        process::{Child, Command},
    },
    tracing::{debug, error, info, warn},
};

use crate::error::{Context, Error, Result};

const SIDECAR_DIR_ENV: &str = "CHATRELAY_WHATSAPP_SIDECAR_DIR";
const PORT_ENV: &str = "CHATRELAY_WHATSAPP_PORT";
const AUTH_DIR_ENV: &str = "CHATRELAY_WHATSAPP_AUTH_DIR";
const SIDECAR_SUBDIR: &str = "sidecar/whatsapp-baileys";

/// Grace period between SIGTERM and a hard kill.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// A running sidecar. Killed when dropped.
pub struct SidecarProcess {
    child: Child,
    port: u16,
}

impl SidecarProcess {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the sidecar to exit, killing it after a grace period.
    pub async fn stop(mut self) {
        info!(port = self.port, "stopping whatsapp sidecar");

        #[cfg(unix)]
        {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };
            if let Some(pid) = self.child.id().and_then(|pid| i32::try_from(pid).ok()) {
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }

        match tokio::time::timeout(STOP_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => info!(?status, "whatsapp sidecar exited"),
            Ok(Err(e)) => warn!(error = %e, "error waiting for sidecar"),
            Err(_) => {
                warn!("sidecar ignored SIGTERM, killing");
                let _ = self.child.kill().await;
            },
        }
    }
}

/// How to launch the sidecar.
#[derive(Debug, Clone)]
pub struct SidecarLaunch {
    /// Directory holding the sidecar's `package.json`.
    pub dir: PathBuf,
    pub port: u16,
    pub auth_dir: PathBuf,
}

/// Locate the sidecar sources.
///
/// Tries, in order: `explicit`, `$CHATRELAY_WHATSAPP_SIDECAR_DIR`, paths next
/// to the executable, then paths relative to the working directory.
pub fn find_sidecar_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if is_sidecar_dir(path) {
            return Ok(path.to_path_buf());
        }
        return Err(Error::message(format!(
            "no package.json in sidecar directory {}",
            path.display()
        )));
    }

    if let Ok(dir) = std::env::var(SIDECAR_DIR_ENV) {
        let path = PathBuf::from(&dir);
        if is_sidecar_dir(&path) {
            return Ok(path);
        }
        warn!(path = %dir, "{SIDECAR_DIR_ENV} set but package.json not found");
    }

    let mut candidates = Vec::new();
    if let Ok(exe) = std::env::current_exe()
        && let Some(exe_dir) = exe.parent()
    {
        candidates.push(exe_dir.join("..").join(SIDECAR_SUBDIR));
        candidates.push(exe_dir.join("../..").join(SIDECAR_SUBDIR));
    }
    for prefix in [".", "..", "../.."] {
        candidates.push(Path::new(prefix).join(SIDECAR_SUBDIR));
    }

    candidates
        .into_iter()
        .find(|path| is_sidecar_dir(path))
        .map(|path| path.canonicalize().unwrap_or(path))
        .ok_or_else(|| {
            Error::message(format!(
                "whatsapp sidecar not found; set {SIDECAR_DIR_ENV} or create {SIDECAR_SUBDIR}"
            ))
        })
}

fn is_sidecar_dir(path: &Path) -> bool {
    path.join("package.json").exists()
}

fn is_built(dir: &Path) -> bool {
    dir.join("dist/index.js").exists()
}

/// Build the sidecar if needed, start it, and check it survives startup.
pub async fn start_sidecar(launch: &SidecarLaunch) -> Result<SidecarProcess> {
    if !is_sidecar_dir(&launch.dir) {
        return Err(Error::message(format!(
            "whatsapp sidecar not found at {}",
            launch.dir.display()
        )));
    }

    if !is_built(&launch.dir) {
        info!(path = %launch.dir.display(), "building whatsapp sidecar");
        if !launch.dir.join("node_modules").exists() {
            run_npm(&launch.dir, &["install"]).await?;
        }
        run_npm(&launch.dir, &["run", "build"]).await?;
    }

    info!(path = %launch.dir.display(), port = launch.port, "starting whatsapp sidecar");
    let mut child = Command::new("node")
        .arg("dist/index.js")
        .current_dir(&launch.dir)
        .env(PORT_ENV, launch.port.to_string())
        .env(AUTH_DIR_ENV, &launch.auth_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .context("failed to spawn sidecar")?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(stdout, false));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(stderr, true));
    }

    // Catch immediate crashes such as a port already in use.
    tokio::time::sleep(Duration::from_millis(500)).await;
    if let Some(status) = child.try_wait()? {
        return Err(Error::message(format!(
            "sidecar exited during startup with {status}"
        )));
    }

    Ok(SidecarProcess {
        child,
        port: launch.port,
    })
}

async fn run_npm(dir: &Path, args: &[&str]) -> Result<()> {
    let command = format!("npm {}", args.join(" "));
    info!(path = %dir.display(), %command, "running");
    let output = Command::new("npm")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .with_context(|| format!("failed to run {command}"))?;

    if !output.status.success() {
        return Err(Error::message(format!(
            "{command} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Re-emit sidecar output as tracing events.
async fn forward_output(stream: impl AsyncRead + Unpin, is_stderr: bool) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match pino_level(&line) {
            Some((level, msg)) => log_at(level, msg),
            None if is_stderr => warn!(target: "whatsapp_sidecar", "{line}"),
            None => info!(target: "whatsapp_sidecar", "{line}"),
        }
    }
}

/// Pull `(level, msg)` out of a pino JSON log line.
fn pino_level(line: &str) -> Option<(u64, String)> {
    if !line.starts_with('{') {
        return None;
    }
    let log: serde_json::Value = serde_json::from_str(line).ok()?;
    let level = log.get("level").and_then(serde_json::Value::as_u64).unwrap_or(30);
    let msg = log
        .get("msg")
        .and_then(serde_json::Value::as_str)
        .unwrap_or(line)
        .to_string();
    Some((level, msg))
}

fn log_at(level: u64, msg: String) {
    match level {
        0..=20 => debug!(target: "whatsapp_sidecar", "{msg}"),
        21..=30 => info!(target: "whatsapp_sidecar", "{msg}"),
        31..=40 => warn!(target: "whatsapp_sidecar", "{msg}"),
        _ => error!(target: "whatsapp_sidecar", "{msg}"),
    }
}
