use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use speedtest_ingest::config::Settings;
use speedtest_ingest::error::StartupError;
use speedtest_ingest::logging::init_logging;
use speedtest_ingest::poller::{PingProbe, Poller, SpeedtestCli, SystemClock};
use speedtest_ingest::storage::{InfluxBackend, TimeSeriesBackend};
use speedtest_ingest::version::{VERSION, version_line};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    if std::env::args().any(|arg| arg == "--version") {
        println!("{}", version_line("Poller"));
        return Ok(());
    }

    let args = Args::parse();

    let settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return Err(StartupError::Config(e).into());
        }
    };

    init_logging(&settings.log_dir, "poller.log");
    info!(version = VERSION, "Starting speedtest poller...");
    info!(
        influxdb_url = %settings.influx.url,
        bucket = %settings.influx.bucket,
        schedule = ?settings.poller.schedule,
        run_immediately = settings.poller.run_immediately,
        "Loaded configuration."
    );

    let backend: Arc<dyn TimeSeriesBackend> = match InfluxBackend::connect(&settings.influx).await {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            error!(
                error = %e,
                url = %settings.influx.url,
                "Failed to connect to InfluxDB. Exiting."
            );
            return Err(StartupError::Connectivity(e).into());
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(());
    });

    let poller_settings = &settings.poller;
    let poller = Poller::new(
        poller_settings,
        Arc::clone(&backend),
        Box::new(PingProbe::new(
            poller_settings.probe_host.clone(),
            poller_settings.probe_timeout,
        )),
        Box::new(SpeedtestCli::new(
            poller_settings.speedtest_command.clone(),
            poller_settings.speedtest_timeout,
        )),
        Arc::new(SystemClock),
    );
    poller.run(shutdown_rx).await;

    drop(poller);
    drop(backend);
    info!("InfluxDB client closed. Poller stopped.");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down."),
                }
                return;
            }
            Err(e) => warn!(
                error = %e,
                "Failed to register SIGTERM handler; only Ctrl-C is handled."
            ),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C.");
        std::future::pending::<()>().await;
    }
    info!("Received SIGINT, shutting down.");
}
