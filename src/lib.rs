// THEORY:
// This file is the main entry point for the `precfg` library crate. It exposes the
// `Pipeline` and its `PipelineConfig` as the high-level interface, while the loader,
// the generator and the TTV codec live in `core_modules` and can be used on their own.

pub mod core_modules;
pub mod pipeline;

pub use core_modules::config_loader::{ConfigLoader, ParsedDocuments};
pub use core_modules::errors::{PrecfgError, TtvError};
pub use core_modules::preprocess_config::{create, PreprocessParams};
pub use core_modules::ttv::{TtvBox, TtvValue};
pub use pipeline::{Pipeline, PipelineConfig, Report};

/// Installs the `tracing` subscriber used by the binaries. `RUST_LOG` overrides the
/// default `info` level.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}
