//! Optional tracing setup for hosts that do not configure their own.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

static INIT: Once = Once::new();

/// Initialize a global fmt subscriber.
///
/// `default_filter` is used when `RUST_LOG` is unset, e.g. `"lockstream_core=debug"`.
/// Hosts with their own subscriber should skip this; calling it twice is a
/// no-op.
pub fn init_logging(default_filter: &str) -> Result<()> {
    let mut result = Ok(());

    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        result = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .map_err(|e| Error::config(format!("failed to install tracing subscriber: {}", e)));
    });

    result
}
