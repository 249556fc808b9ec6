use std::{error::Error, process, sync::Arc};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use reloadg::{
    cli::{Cli, parse_args},
    constants::DEFAULT_LOG_FILTER,
    manager::Manager,
    observer::TracingObserver,
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    info!(
        "Starting reloadg {} (PID: {})",
        env!("CARGO_PKG_VERSION"),
        process::id()
    );

    let config = args.resolve().inspect_err(|err| error!("{err}"))?;
    let mut manager =
        Manager::new(config, Arc::new(TracingObserver)).inspect_err(|err| error!("{err}"))?;

    if let Err(err) = manager.run() {
        error!("Supervisor exited with error: {err}");
        return Err(err.into());
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
