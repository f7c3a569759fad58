//! face_streamd - face stream supervisor daemon
//!
//! This daemon:
//! 1. Loads service configuration (file + environment)
//! 2. Opens the enrolled encoding store
//! 3. Serves the control API that starts and stops per-camera workers
//! 4. On Ctrl-C stops every worker, then the API

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use face_stream::{
    api::{ApiConfig, ApiServer},
    config::ServiceConfig,
    ingest::RtspCaptureConfig,
    CallbackDispatcher, Collaborators, EmbeddingRecognizer, JsonEncodingStore, RtspCapture,
    StreamRegistry, StubEmbedder, UreqSink,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Supervise per-camera face recognition streams"
)]
struct Args {
    /// Service config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "FACE_STREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Control API bind address. Overrides the config file.
    #[arg(long, env = "FACE_STREAM_API_ADDR")]
    api_addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = ServiceConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.api_addr {
        config.api_addr = addr;
    }

    let store = JsonEncodingStore::open(&config.storage_path)?;
    log::info!(
        "encoding store opened at {}",
        config.storage_path.display()
    );

    let capture = Arc::new(RtspCapture::new(RtspCaptureConfig {
        target_fps: config.capture_fps,
        ..RtspCaptureConfig::default()
    }));
    let recognizer = EmbeddingRecognizer::new(StubEmbedder).with_min_confidence(config.min_confidence);
    log::warn!("face embedder: stub (no faces will be identified until a model is wired in)");

    if config.internal_api_secret.is_none() {
        log::warn!("INTERNAL_API_SECRET not set: control api and webhooks are unauthenticated");
    }
    let sink = UreqSink::new(config.supervision.callback_timeout);
    let dispatcher = CallbackDispatcher::new(Arc::new(sink), config.internal_api_secret.clone());

    let collaborators = Collaborators::new(
        capture.clone(),
        Arc::new(recognizer),
        Arc::new(store),
        Arc::new(dispatcher),
    );
    let registry = Arc::new(StreamRegistry::new(
        collaborators,
        config.supervision.worker_settings(),
    ));

    let api_config = ApiConfig {
        addr: config.api_addr.clone(),
        secret: config.internal_api_secret.clone(),
        default_frame_interval: config.supervision.default_frame_interval,
    };
    let api_handle = ApiServer::new(api_config, registry.clone(), capture).spawn()?;
    log::info!("control api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("face_streamd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping streams...");
    registry.stop_all();
    api_handle.stop()?;
    log::info!("face_streamd stopped");

    Ok(())
}
