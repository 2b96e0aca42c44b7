pub mod config;
pub mod controller;

use crate::config::Config;
use crate::controller::controller_handle::ControllerHandle;
use crate::controller::poll_loop::DirectionReport;
use color_eyre::{eyre::eyre, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = Config::default_path();
    info!("Loading configuration from {}", config_path.display());
    let config = Config::load_or_create(&config_path)
        .await
        .map_err(|e| eyre!("Failed to load configuration: {}", e))?;
    debug!("Configuration: {:?}", config);

    let (controller, reports) = ControllerHandle::create(&config)
        .await
        .map_err(|e| eyre!("Failed to initialize joystick: {}", e))?;

    let reporter = tokio::spawn(run_reporter(reports));

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                shutdown.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    controller.run(cancel).await?;

    // The poll loop dropped its sender, the reporter drains and exits
    if let Err(e) = reporter.await {
        error!("Reporter task failed: {}", e);
    }

    info!("Joystick daemon stopped");
    Ok(())
}

// One lower-case direction name per line on stdout
async fn run_reporter(mut reports: mpsc::Receiver<DirectionReport>) {
    while let Some(report) = reports.recv().await {
        debug!(
            "Reporting {} captured at {}",
            report.direction,
            report.timestamp.format("%H:%M:%S.%3f")
        );
        println!("{}", report.direction);
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
