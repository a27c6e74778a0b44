use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use copilot_capture_proxy::auth::AllowList;
use copilot_capture_proxy::backend::{BackendError, ElasticBackend};
use copilot_capture_proxy::config;
use copilot_capture_proxy::error::Result;
use copilot_capture_proxy::flatten;

#[derive(Parser, Debug)]
#[command(name = "copilot-capture")]
#[command(about = "Capture pipeline tooling: backend connectivity check and offline telemetry conversion", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Check configuration, allow-list, and backend connectivity
    Check,
    /// Flatten a capture archive into telemetry.csv (default)
    Convert {
        /// Capture archive to read, one JSON exchange per line
        archive: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("copilot_capture_proxy={log_level}").parse().unwrap()),
        )
        .init();

    match args.command.unwrap_or(Command::Convert { archive: None }) {
        Command::Convert { archive } => {
            let archive = archive.unwrap_or_else(|| PathBuf::from(flatten::DEFAULT_ARCHIVE_FILE));
            flatten::run(&archive, Path::new(flatten::OUTPUT_FILE))
        }
        Command::Check => {
            let config = match &args.config {
                Some(path) => {
                    info!("Loading configuration from: {}", path.display());
                    config::load_from_path(path)?
                }
                None => config::load_from_env_or_file()?,
            };
            run_check(config).await
        }
    }
}

async fn run_check(config: config::Config) -> Result<()> {
    info!("Running configuration check...");

    let allow_list = AllowList::load(&config.proxy.allowed_users_file)?;
    info!(
        "Allow-list: {} users from {}",
        allow_list.len(),
        config.proxy.allowed_users_file.display()
    );
    if allow_list.is_empty() {
        error!("Allow-list is empty: every connection will be rejected");
    }

    info!("Elasticsearch: {}", config.elasticsearch.url);
    info!(
        "Indices: {} / {}",
        config.capture.completions_index, config.capture.telemetry_index
    );

    let es_config = config.elasticsearch.clone();
    let ping = tokio::task::spawn_blocking(move || {
        let backend = ElasticBackend::connect(&es_config)?;
        backend.ping()
    })
    .await
    .map_err(|e| BackendError::Connection(format!("ping task failed: {e}")))?;

    match ping {
        Ok(()) => {
            info!("Backend ping: PASSED");
            Ok(())
        }
        Err(e) => {
            error!("Backend ping: FAILED - {}", e);
            Err(e.into())
        }
    }
}
