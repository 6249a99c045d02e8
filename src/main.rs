//! Realtime Translate Ingest
//!
//! Accepts live FLV publishers, strips everything but audio, decodes it to
//! 16 kHz mono PCM through an external ffmpeg process and forwards the
//! result as 20 ms frames to the speech/translation stage.

mod build_info;
mod config;
mod config_file;
mod error;
mod flv;
mod frames;
mod logging;
mod pipeline;
mod server;
mod state;
mod transcode;
mod types;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::util::SubscriberInitExt;

use crate::build_info::BuildInfo;
use crate::config_file::{generate_default_config, load_server_config};
use crate::error::ServerError;
use crate::frames::LoggingForwarderFactory;
use crate::logging::init_logging;
use crate::pipeline::PipelineSupervisor;
use crate::server::IngestServer;
use crate::state::AppState;
use crate::transcode::FfmpegTranscoder;

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let mut args = std::env::args().skip(1);
    let first = args.next();

    if first.as_deref() == Some("--generate-config") {
        let path = args.next().unwrap_or_else(|| "config.toml".to_string());
        generate_default_config(&path).map_err(|e| ServerError::Config(e.to_string()))?;
        println!("Wrote default configuration to {}", path);
        return Ok(());
    }

    // Load configuration; problems are reported on stderr until the real
    // subscriber is installed
    let config_path = first.unwrap_or_else(|| "config.toml".to_string());
    let config = {
        let _bootstrap = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .finish()
            .set_default();
        load_server_config(&config_path).with_env_overrides()
    };

    init_logging(&config.logging)?;
    BuildInfo::current().log();
    tracing::info!("Configuration loaded: {:?}", config);

    let transcoder = FfmpegTranscoder::new();
    tracing::info!("Transcoder: {}", transcoder.command_line());
    let supervisor =
        PipelineSupervisor::new(Arc::new(transcoder), Arc::new(LoggingForwarderFactory));
    let state = Arc::new(AppState::new(config, supervisor));

    let shutdown = CancellationToken::new();
    let server = IngestServer::bind(state, shutdown.clone()).await?;

    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    server.run().await
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
