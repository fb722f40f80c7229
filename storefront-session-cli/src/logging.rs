//! Forwards session kit log records to `tracing`.

use std::collections::HashMap;
use std::sync::Arc;

use storefront_session_core::logger::{set_logger, LogLevel, Logger};
use tracing_subscriber::EnvFilter;

struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: String, context: HashMap<String, String>) {
        let context = if context.is_empty() {
            String::new()
        } else {
            let mut pairs: Vec<_> = context
                .into_iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            pairs.sort();
            pairs.join(" ")
        };
        match level {
            LogLevel::Trace => tracing::trace!(target: "storefront_session", %context, "{message}"),
            LogLevel::Debug => tracing::debug!(target: "storefront_session", %context, "{message}"),
            LogLevel::Info => tracing::info!(target: "storefront_session", %context, "{message}"),
            LogLevel::Warn => tracing::warn!(target: "storefront_session", %context, "{message}"),
            LogLevel::Error => tracing::error!(target: "storefront_session", %context, "{message}"),
        }
    }
}

/// Installs the `tracing` subscriber (filtered by `RUST_LOG`, default `info`)
/// and routes the session kit's records into it.
pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    set_logger(Arc::new(TracingLogger));
}
