use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use speedtest_ingest::config::Settings;
use speedtest_ingest::error::StartupError;
use speedtest_ingest::importer::Importer;
use speedtest_ingest::logging::init_logging;
use speedtest_ingest::storage::InfluxBackend;
use speedtest_ingest::version::{VERSION, version_line};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Glob pattern or directory of CSV exports
    pattern: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    if std::env::args().any(|arg| arg == "--version") {
        println!("{}", version_line("Importer"));
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

    init_logging(&settings.log_dir, "import.log");
    info!(version = VERSION, pattern = %args.pattern, "Starting CSV import...");

    let backend = match InfluxBackend::connect(&settings.influx).await {
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

    let importer = Importer::new(&settings.import, backend);
    match importer.import_path(&args.pattern).await {
        Ok(summary) => {
            info!(
                "Import complete: {}/{} files succeeded, {} records written.",
                summary.files_succeeded, summary.files_attempted, summary.records_written
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Import failed.");
            Err(StartupError::Import(e).into())
        }
    }
}
