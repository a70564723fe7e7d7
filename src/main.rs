use anyhow::{Context, Result};
use clap::Parser;
use live_voice::{
    create_router, AppState, AudioBackendFactory, AudioSink, AudioSource, Config, GeminiTransport,
    NoteBook, RecordNoteTool, SessionController, SessionParts, SessionState, ToolRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "live-voice")]
#[command(about = "Real-time voice conversation with a live model session")]
struct Args {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/live-voice")]
    config: String,

    /// Use a WAV file instead of the microphone
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output sink: device or virtual
    #[arg(short, long)]
    output: Option<String>,

    /// HTTP port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Do not serve the HTTP API
    #[arg(long)]
    no_http: bool,

    /// Start the microphone as soon as the session opens
    #[arg(long)]
    autostart_capture: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)?;

    if let Some(output) = &args.output {
        cfg.audio.output = output.clone();
    }
    if let Some(port) = args.port {
        cfg.service.http.port = port;
    }
    if args.no_http {
        cfg.service.http.enabled = false;
    }

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    let source = match &args.input {
        Some(path) => AudioSource::File(path.clone()),
        None => cfg.audio.input_source()?,
    };
    let sink: AudioSink = cfg.audio.output_sink()?;
    let backend_config = cfg.audio.backend_config();

    let input = AudioBackendFactory::create_input(source, &backend_config)
        .context("Failed to create audio input")?;
    let output = AudioBackendFactory::create_output(sink, &backend_config)
        .context("Failed to create audio output")?;

    let transport = GeminiTransport::new(
        cfg.transport.endpoint.clone(),
        cfg.transport.resolve_api_key()?,
    );

    let notes = NoteBook::default();
    let mut tools = ToolRegistry::new();
    tools.register(RecordNoteTool::new(notes.clone()));

    let session = SessionController::spawn(SessionParts {
        config: cfg.session_config()?,
        transport: Arc::new(transport),
        input,
        output,
        tools,
        notes,
    });

    session.start()?;

    if args.autostart_capture {
        let session = session.clone();
        tokio::spawn(async move {
            match session.wait_for_state(SessionState::Idle).await {
                Ok(_) => {
                    if let Err(e) = session.start_capture() {
                        warn!("Failed to start capture: {}", e);
                    }
                }
                Err(e) => warn!("Session ended before opening: {}", e),
            }
        });
    }

    if cfg.service.http.enabled {
        let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!("HTTP API listening on http://{}", addr);

        let app = create_router(AppState::new(session.clone()));
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server failed")?;
    } else {
        shutdown_signal().await;
    }

    info!("Shutting down");
    let _ = session.shutdown();
    // Let the controller close the transport and release devices
    let _ = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        session.wait_for(|snapshot| snapshot.status == "Stopped."),
    )
    .await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
