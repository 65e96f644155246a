//! laserctl — control service entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use laserctl::config::Settings;
use laserctl::serial::transport::SerialLink;
use laserctl::server;
use laserctl::session::{DeviceSession, SessionOptions};

#[derive(Parser, Debug)]
#[command(name = "laserctl")]
#[command(about = "Control service for a pulsed-laser illumination device")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address override for the control server
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut settings = Settings::new(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        settings.server.bind = bind;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %settings.server.bind,
        "starting laser control service"
    );

    let link = SerialLink::new(settings.serial.clone());
    let session = Arc::new(DeviceSession::new(
        Box::new(link),
        SessionOptions::from(&settings),
    ));

    server::run(session, settings.serial.device_dir.clone(), &settings.server.bind).await
}
