use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voice_copilot::{
    create_router, AppState, Config, DeviceProvider, VoiceClient, WebSocketTransport,
};

#[derive(Parser)]
#[command(name = "voice-copilot", version, about = "Realtime duplex voice sessions")]
struct Cli {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/voice-copilot")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,
    /// Open one session and talk until Ctrl-C
    Talk {
        /// Override the configured voice
        #[arg(long)]
        voice: Option<String>,
    },
}

#[cfg(feature = "cpal")]
fn device_provider() -> Arc<dyn DeviceProvider> {
    Arc::new(voice_copilot::audio::CpalDevices::new())
}

#[cfg(not(feature = "cpal"))]
fn device_provider() -> Arc<dyn DeviceProvider> {
    warn!("Built without the `cpal` feature; using silent virtual devices");
    Arc::new(voice_copilot::VirtualDevices::new())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Voice Copilot v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    if cfg.voice.api_key.as_deref().unwrap_or("").is_empty() {
        warn!("No API key configured; set VOICE_COPILOT__VOICE__API_KEY");
    }

    let client = Arc::new(VoiceClient::new(
        Arc::new(WebSocketTransport::new()),
        device_provider(),
    ));

    match cli.command {
        Command::Serve => serve(&cfg, client).await,
        Command::Talk { voice } => talk(&cfg, client, voice).await,
    }
}

async fn serve(cfg: &Config, client: Arc<VoiceClient>) -> Result<()> {
    let state = AppState::new(client, cfg.session_config());
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down HTTP server");
        })
        .await
        .context("HTTP server error")
}

async fn talk(cfg: &Config, client: Arc<VoiceClient>, voice: Option<String>) -> Result<()> {
    let mut config = cfg.session_config();
    if let Some(voice) = voice {
        config.voice = voice;
    }

    let session = client.open_session(config)?;
    info!("Session {} opening; press Ctrl-C to hang up", session.id());

    tokio::select! {
        state = session.wait_terminal() => {
            warn!("Session ended on its own: {}", state);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Hanging up");
            client.close_session(&session);
            session.wait_terminal().await;
        }
    }

    let stats = session.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);

    if let Some(failure) = session.failure() {
        anyhow::bail!("Session failed ({}): {}", failure.kind, failure.message);
    }
    Ok(())
}
