mod whatsapp_commands;

use std::{io, path::PathBuf, sync::Arc};

use {
    anyhow::{Context, Result},
    chatrelay_config::ChatRelayConfig,
    chatrelay_relay::{Bridge, CompletionGateway, HttpCompletionClient, TerminalQrRenderer},
    chatrelay_session::SessionController,
    chatrelay_whatsapp::WhatsAppSession,
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{
        EnvFilter, Layer,
        fmt::{self, MakeWriter},
        layer::SubscriberExt,
        registry::LookupSpan,
        util::SubscriberInitExt,
    },
};

#[derive(Parser)]
#[command(
    name = "chatrelay",
    version,
    about = "chatrelay: answer WhatsApp direct messages from a local chat service"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (default: discover chatrelay.toml in ./ then the config dir).
    #[arg(long, global = true, env = "CHATRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Completion service endpoint (overrides config value).
    #[arg(long, global = true, env = "CHATRELAY_ENDPOINT")]
    endpoint: Option<String>,

    /// WhatsApp credential directory (overrides config value).
    #[arg(long, global = true, env = "CHATRELAY_AUTH_DIR")]
    auth_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge (default when no subcommand is provided).
    Run,
    /// Send one query to the completion service and print the reply.
    Ask { text: String },
    /// Show the stored identity and effective configuration.
    Status,
    /// Forget the stored WhatsApp identity so the next run pairs again.
    Logout,
}

impl Cli {
    fn load_config(&self) -> Result<ChatRelayConfig> {
        let mut config = chatrelay_config::discover_and_load(self.config.as_deref())?;
        if let Some(endpoint) = &self.endpoint {
            config.completion.endpoint.clone_from(endpoint);
        }
        if let Some(dir) = &self.auth_dir {
            config.whatsapp.auth_dir = Some(dir.clone());
        }
        Ok(config)
    }
}

/// Log output layer. Logs never share stdout with the pairing code, whose
/// redraw relies on knowing every line it printed.
fn log_layer<S, W>(json: bool, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    if json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(false)
            .with_writer(writer)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_ansi(true)
            .with_writer(writer)
            .boxed()
    }
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(log_layer(cli.json_logs, io::stderr))
        .init();
}

async fn run(config: ChatRelayConfig) -> Result<()> {
    let session = Arc::new(
        WhatsAppSession::new(config.whatsapp.clone()).context("cannot open identity store")?,
    );
    let completion = Arc::new(HttpCompletionClient::new(&config.completion)?);
    info!(
        endpoint = %config.completion.endpoint,
        paired = session.has_identity(),
        "starting bridge"
    );

    let mut renderer = TerminalQrRenderer::stdout();
    let running = Bridge::new(session, completion, config.relay, config.supervisor)
        .start(&mut renderer)
        .await
        .context("bridge failed to start")?;

    info!("bridge running, press Ctrl+C to stop");
    wait_for_shutdown().await?;
    info!("shutting down");
    running.shutdown().await;
    Ok(())
}

async fn ask(config: &ChatRelayConfig, text: &str) -> Result<()> {
    let client = HttpCompletionClient::new(&config.completion)?;
    let reply = client
        .fetch_completion(text)
        .await
        .with_context(|| format!("query to {} failed", config.completion.endpoint))?;
    println!("{reply}");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("cannot install Ctrl+C handler")?,
            _ = term.recv() => {},
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("cannot install Ctrl+C handler")?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = cli.load_config()?;
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Ask { text } => ask(&config, &text).await,
        Commands::Status => whatsapp_commands::status(&config, &mut io::stdout()),
        Commands::Logout => whatsapp_commands::logout(&config, &mut io::stdout()),
    }
}
