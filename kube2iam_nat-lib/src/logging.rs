use thiserror::Error;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum Error {
    #[error("unable to open log file: {0}")]
    IO(#[from] std::io::Error),
    #[error("global subscriber already set: {0}")]
    Init(#[from] TryInitError),
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Initializes the global `tracing` subscriber with stdout/stderr logging.
///
/// Verbosity is read from `RUST_LOG` and defaults to `"info"`.
/// Fails if a global subscriber has already been set, e.g. by the host process.
pub fn setup_stdout() -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(true))
        .with(env_filter())
        .try_init()?;
    tracing::debug!("logging initialized with stdout/stderr output");
    Ok(())
}

/// Initializes the global `tracing` subscriber appending to the file at `log_path`.
///
/// ANSI colors are disabled. Verbosity is handled as in [`setup_stdout`].
pub fn setup_log_file(log_path: &Path) -> Result<(), Error> {
    let file = OpenOptions::new().create(true).append(true).open(log_path)?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        .with(env_filter())
        .try_init()?;
    tracing::debug!(log_path = %log_path.display(), "logging initialized with file output");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_subscriber_is_installed_once() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let log_path = dir.path().join("kube2iam-nat.log");

        setup_log_file(&log_path)?;
        tracing::info!(chain = "PREROUTING_KUBE2IAM", "Clearing kube2iam iptables chain");

        let content = std::fs::read_to_string(&log_path)?;
        assert!(content.contains("Clearing kube2iam iptables chain"));

        assert!(matches!(setup_stdout(), Err(Error::Init(_))));
        Ok(())
    }
}
