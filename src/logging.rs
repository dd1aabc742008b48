//! Logging setup.
//!
//! The provider logs through `tracing`. Output goes to **stderr**, leaving
//! stdout to whatever process hosts the provider.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Controls log levels (e.g., `info`, `atlas_provider=debug`)
//!
//! ```bash
//! # Log every Atlas API request
//! RUST_LOG=atlas_provider::client=debug ./host
//!
//! # Follow delete retries
//! RUST_LOG=atlas_provider::retry=debug,atlas_provider=info ./host
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LEVEL: &str = "info";

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn install(default_level: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .try_init()
}

/// Install the stderr subscriber at `info` unless `RUST_LOG` says otherwise.
///
/// Does nothing if a global subscriber is already set.
///
/// # Example
///
/// ```
/// atlas_provider::init_logging();
/// tracing::info!("provider starting");
/// ```
pub fn init_logging() {
    init_logging_with_default(DEFAULT_LEVEL);
}

/// Like [`init_logging`], with a different fallback level.
pub fn init_logging_with_default(default_level: &str) {
    if install(default_level).is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Install the subscriber, returning false if one was already set.
pub fn try_init_logging() -> bool {
    install(DEFAULT_LEVEL).is_ok()
}
