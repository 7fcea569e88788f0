use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "V2EX_PAGER_LOG";

/// Installs the stderr subscriber. `V2EX_PAGER_LOG` wins over `fallback`.
pub fn init(fallback: &str) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).or_else(|_| EnvFilter::try_new(fallback))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("install log subscriber: {err}"))
}
