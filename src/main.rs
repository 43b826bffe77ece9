use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use roundstream::config::Config;
use roundstream::{
    create_router, AppState, AssetStore, ControlClient, HttpStreamProbe, IcecastAdmin,
    MemoryStore, ProcessSpawner, SessionOptions, SessionServices, StreamRequest, StreamSession,
    StreamSupervisor, TimeoutStore,
};
use roundstream::pipeline::{build_graph, GraphBackend};
use roundstream::store::AudioFormat;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Control messages buffered between the bus bridge and a session.
const CONTROL_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Parser)]
#[command(name = "roundstream", version, about = "Location-aware audio streams")]
struct Cli {
    /// Config file, with or without the .toml extension
    #[arg(long, global = true, default_value = "config/roundstream")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP control relay and spawn sessions on demand
    Serve,
    /// Run a single stream session
    Stream {
        #[arg(long)]
        session_id: u64,
        #[arg(long)]
        project_id: u64,
        #[arg(long, allow_hyphen_values = true)]
        latitude: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        longitude: Option<f64>,
        #[arg(long)]
        audio_format: Option<AudioFormat>,
        #[arg(long)]
        bitrate: Option<u32>,
        /// Run against the virtual graph; nothing is published
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Command::Serve => serve(cfg, &cli.config).await,
        Command::Stream {
            session_id,
            project_id,
            latitude,
            longitude,
            audio_format,
            bitrate,
            dry_run,
        } => {
            let request = StreamRequest {
                session_id,
                project_id,
                latitude,
                longitude,
                audio_format,
                bitrate,
            };
            let backend = if dry_run {
                GraphBackend::Virtual
            } else {
                cfg.stream.graph_backend
            };
            stream(cfg, request, backend).await
        }
    }
}

fn load_store(cfg: &Config) -> Result<Arc<dyn AssetStore>> {
    let mut store = MemoryStore::load(&cfg.catalog.path, Some(cfg.catalog.media_root.as_path()))
        .context("Failed to load catalog")?;
    if let Some(path) = &cfg.catalog.history_path {
        store = store.with_history_path(path);
    }
    Ok(Arc::new(TimeoutStore::new(
        Arc::new(store),
        cfg.stream.store_timeout(),
    )))
}

async fn serve(mut cfg: Config, config_path: &str) -> Result<()> {
    if cfg.spawn.config_path.is_none() {
        cfg.spawn.config_path = Some(PathBuf::from(config_path));
    }

    let store = load_store(&cfg)?;
    let server = Arc::new(IcecastAdmin::from_config(&cfg.icecast)?);
    let control = Arc::new(
        ControlClient::connect(&cfg.nats.url, cfg.nats.subject_prefix.clone())
            .await
            .context("Failed to connect control bus")?,
    );
    let spawner = Arc::new(ProcessSpawner::from_config(&cfg.spawn)?);

    let supervisor = StreamSupervisor::new(
        store,
        server,
        spawner,
        control,
        cfg.icecast.clone(),
        cfg.spawn.clone(),
    );
    let app = create_router(AppState::new(Arc::new(supervisor)));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP relay listening on {}", addr);

    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}

async fn stream(cfg: Config, request: StreamRequest, backend: GraphBackend) -> Result<()> {
    let session_id = request.session_id;
    let graph = build_graph(backend)?;
    if backend == GraphBackend::Virtual {
        warn!("Session {} is a dry run, its mount will not be published", session_id);
    }

    let services = SessionServices {
        store: load_store(&cfg)?,
        server: Arc::new(IcecastAdmin::from_config(&cfg.icecast)?),
        probe: Arc::new(HttpStreamProbe::new(cfg.stream.probe_timeout())?),
    };

    let control = ControlClient::connect(&cfg.nats.url, cfg.nats.subject_prefix.clone())
        .await
        .context("Failed to connect control bus")?;
    let (tx, rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
    let bridge = control.bridge(session_id, tx).await?;

    let mut session = StreamSession::new(
        request,
        services,
        graph,
        SessionOptions::from_config(&cfg),
    )
    .await
    .with_context(|| format!("Failed to start session {}", session_id))?;

    let result = session.run(rx).await;
    bridge.abort();
    result?;

    info!("Session {} finished", session_id);
    Ok(())
}
