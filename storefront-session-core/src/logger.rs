use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Longest redacted string that is forwarded to the logger.
const MAX_REDACTED_LEN: usize = 200;

/// Receives the session kit's log records.
///
/// Implemented by the host app and handed over once through [`set_logger`].
/// Exported through `UniFFI`.
///
/// # Examples
///
/// ```rust
/// use std::collections::HashMap;
/// use storefront_session_core::logger::{Logger, LogLevel};
///
/// struct MyLogger;
///
/// impl Logger for MyLogger {
///     fn log(&self, level: LogLevel, message: String, context: HashMap<String, String>) {
///         println!("[{:?}] {} {:?}", level, message, context);
///     }
/// }
/// ```
///
/// ## Swift
///
/// ```swift
/// class SessionLoggerBridge: StorefrontSession.Logger {
///     static let shared = SessionLoggerBridge()
///
///     func log(level: StorefrontSession.LogLevel, message: String, context: [String: String]) {
///         Log.log(level.toCoreLevel(), message, metadata: context)
///     }
/// }
///
/// StorefrontSession.setLogger(logger: SessionLoggerBridge.shared) // Call this only once!!!
/// ```
#[uniffi::export(with_foreign)]
pub trait Logger: Sync + Send {
    /// Handles one record. `context` holds the structured key/value pairs
    /// attached to it (attempt counts, statuses, redacted URLs).
    fn log(&self, level: LogLevel, message: String, context: HashMap<String, String>);
}

/// Severity of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum LogLevel {
    /// Step-by-step detail.
    Trace,
    /// Diagnostics, e.g. debounced triggers or skipped registrations.
    Debug,
    /// Session milestones: login, refresh, registration.
    Info,
    /// Recoverable failures: retries, storage errors, rejected calls.
    Warn,
    /// Failures that leave a component unable to do its job.
    Error,
}

/// Replaces every character outside a small allow-list so free-form strings
/// (URLs, server messages, search queries) can be logged without leaking
/// personal data or control sequences.
///
/// Allowed: ASCII alphanumerics, space and `-_.:/@`. Anything else becomes `*`.
/// Output is truncated to a bounded length.
#[must_use]
pub fn redact(input: &str) -> String {
    let mut out: String = input
        .chars()
        .take(MAX_REDACTED_LEN)
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, ' ' | '-' | '_' | '.' | ':' | '/' | '@') {
                ch
            } else {
                '*'
            }
        })
        .collect();
    if input.chars().count() > MAX_REDACTED_LEN {
        out.push_str("...");
    }
    out
}

/// Collects the structured key/value pairs of a record into a map.
struct ContextCollector(HashMap<String, String>);

impl<'kvs> log::kv::VisitSource<'kvs> for ContextCollector {
    fn visit_pair(
        &mut self,
        key: log::kv::Key<'kvs>,
        value: log::kv::Value<'kvs>,
    ) -> Result<(), log::kv::Error> {
        self.0.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Module prefix of this kit's records; `storefront_session_cli` matches too.
const KIT_MODULE_PREFIX: &str = "storefront_session";

/// Bridges the `log` facade to the host [`Logger`].
struct ForeignLogger;

impl log::Log for ForeignLogger {
    /// Debug and trace records are only forwarded from this kit.
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Info || metadata.target().starts_with(KIT_MODULE_PREFIX)
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut collector = ContextCollector(HashMap::new());
        // The collector never returns an error.
        let _ = record.key_values().visit(&mut collector);
        let message = record.args().to_string();

        match LOGGER_INSTANCE.get() {
            Some(logger) => logger.log(record.level().into(), message, collector.0),
            None => eprintln!("session kit logger missing: {message}"),
        }
    }

    fn flush(&self) {}
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Self::Error,
            log::Level::Warn => Self::Warn,
            log::Level::Info => Self::Info,
            log::Level::Debug => Self::Debug,
            log::Level::Trace => Self::Trace,
        }
    }
}

/// The logger provided by the host app.
static LOGGER_INSTANCE: OnceLock<Arc<dyn Logger>> = OnceLock::new();

/// Sets the global logger.
///
/// Call once at app start, before any other session kit call. Later calls are
/// ignored.
#[uniffi::export]
pub fn set_logger(logger: Arc<dyn Logger>) {
    static BRIDGE: ForeignLogger = ForeignLogger;

    if LOGGER_INSTANCE.set(logger).is_err() {
        eprintln!("session kit logger already installed");
        return;
    }
    match log::set_logger(&BRIDGE) {
        Ok(()) => log::set_max_level(log::LevelFilter::Trace),
        Err(err) => eprintln!("session kit logger not installed: {err}"),
    }
}
