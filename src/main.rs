//! Runtime daemon entry point
//!
//! Loads configuration, registers built-in modules, autoloads the
//! configured module set and idles until a termination signal drives a
//! bounded-deadline exit.

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use module_runtime::modules::EventLog;
use module_runtime::utils::{init_logging, install_shutdown_hooks};
use module_runtime::{Runtime, RuntimeConfig};

#[derive(Parser)]
#[command(name = "module-runtime", version, about = "Process-local module runtime daemon")]
struct Args {
    /// Path to the runtime configuration file
    #[arg(short, long, default_value = "runtime.toml")]
    config: PathBuf,

    /// Override the data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log filter (overrides the config file; RUST_LOG still wins)
    #[arg(long)]
    log_filter: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if args.config.exists() {
        RuntimeConfig::from_file(&args.config)?
    } else {
        RuntimeConfig::default()
    };
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    let filter = args
        .log_filter
        .or_else(|| config.logging.as_ref().and_then(|l| l.filter.clone()));
    init_logging(filter.as_deref());

    let autoload = config.autoload.clone();
    let rt = Runtime::new(config);
    let event_log_factory = EventLog::factory(vec![
        "message".to_string(),
        "notice".to_string(),
        "request".to_string(),
    ]);
    rt.register_module(EventLog::NAME, move |rt| event_log_factory(rt));

    info!("Looking for modules...");
    for name in &autoload {
        if let Err(e) = rt.load(name).await {
            warn!("Failed to load module {}: {}", name, e);
        }
    }
    info!("Loaded: {:?}", rt.list());

    let _shutdown_task = install_shutdown_hooks(&rt);

    // Idle until a signal-driven exit terminates the process.
    std::future::pending::<()>().await;
    Ok(())
}
