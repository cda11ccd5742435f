//! Tracing setup
//!
//! Hosts call [`init_logging`] once at startup; `RUST_LOG` overrides the
//! default directive.

use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber. Returns `false` if one was already set.
pub fn init_logging(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("Logging initialized");
    }
    installed
}
