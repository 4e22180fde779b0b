mod config;
mod error;
mod orchestrator;
mod probes;
mod report;
mod store;
mod traits;
mod types;

use anyhow::Result;
use clap::Parser;
use config::{Settings, SettingsLayer};
use orchestrator::{Orchestrator, RunOutcome};
use std::path::PathBuf;
use store::ResultStore;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "linkprobe")]
#[command(about = "Link speed test for restricted networks", long_about = None)]
struct Cli {
    /// Show statistics from previous tests instead of running one
    #[arg(long)]
    stats: bool,

    /// Log file location (default: ~/speedtest_results.log)
    #[arg(long, value_name = "PATH")]
    log: Option<PathBuf>,

    /// Max duration of each transfer, in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Size of the upload payload, in MB
    #[arg(long, value_name = "MB")]
    upload_size: Option<u64>,

    /// Number of latency samples per host
    #[arg(long, short = 'c')]
    count: Option<u32>,

    /// Use the built-in HTTP client instead of curl / wget
    #[arg(long)]
    native: bool,

    /// Print debug diagnostics to stderr
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    fn settings_layer(&self) -> SettingsLayer {
        SettingsLayer {
            log_file: self.log.clone(),
            timeout_secs: self.timeout,
            upload_size_mb: self.upload_size,
            ping_count: self.count,
            native: self.native.then_some(true),
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::from_default_env().add_directive("linkprobe=debug".parse()?)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let file_layer = SettingsLayer::from_config_file().unwrap_or_else(|e| {
        eprintln!("Ignoring config file: {}", e);
        SettingsLayer::default()
    });
    let settings = Settings::from(cli.settings_layer().over(file_layer));
    let store = ResultStore::new(settings.log_file.clone());

    if cli.stats {
        handle_stats(&store).await?;
    } else {
        handle_run(&settings, &store).await?;
    }

    Ok(())
}

// --- Handlers ---

async fn handle_stats(store: &ResultStore) -> Result<()> {
    let state = store.load_all().await?;
    println!("{}", report::render_store_state(store.path(), &state));
    Ok(())
}

async fn handle_run(settings: &Settings, store: &ResultStore) -> Result<()> {
    println!("\n=== Running Speed Test ===");

    let orchestrator = Orchestrator::from_settings(settings)?;
    let candidates = config::get_candidates();

    match orchestrator.run(&candidates).await {
        RunOutcome::Success(measurement) => {
            println!("\n{}", report::run_summary(&measurement));
            store.append(&measurement).await?;
            println!("Results saved to {}", store.path().display());
        }
        // Not an error: nothing is saved and the exit status stays 0.
        RunOutcome::AllFailed => {
            println!("\nAll servers failed. Check your internet connection.\n");
        }
    }

    Ok(())
}
