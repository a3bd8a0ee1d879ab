//! Logging setup and the component-scoped [`Logger`] handle
//!
//! Every component holds a cheap, cloneable [`Logger`] tagged with its own
//! name. Messages are emitted as `tracing` events, so they pick up whatever
//! request span is active and flow through the subscriber installed by
//! [`init`].

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("Unknown log format: {} (expected text or json)", other)),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `verbose` when set;
/// [`Logger::detail`] still needs `verbose`.
pub fn init(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "registry_relay={level},tower_http={level}",
            level = default_level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    // try_init: tests and embedders may already have a subscriber
    let _ = match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().flatten_event(true))
            .try_init(),
    };
}

/// Logger responsible for all operational output of one component
#[derive(Debug, Clone)]
pub struct Logger {
    component: &'static str,
    pub verbose: bool,
}

impl Logger {
    pub fn new(component: &'static str, verbose: bool) -> Self {
        Self { component, verbose }
    }

    /// Same verbosity, different component tag
    pub fn scoped(&self, component: &'static str) -> Self {
        Self {
            component,
            verbose: self.verbose,
        }
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    pub fn info(&self, message: &str) {
        tracing::info!(component = self.component, "{}", message);
    }

    /// Routine per-request progress, only emitted in verbose mode
    pub fn detail(&self, message: &str) {
        if self.verbose {
            tracing::debug!(component = self.component, "{}", message);
        }
    }

    pub fn warning(&self, message: &str) {
        tracing::warn!(component = self.component, "{}", message);
    }

    pub fn error(&self, message: &str) {
        tracing::error!(component = self.component, "{}", message);
    }

    /// Startup summary, one line per item
    pub fn summary(&self, title: &str, items: &[(&str, String)]) {
        tracing::info!(component = self.component, "{}", title);
        for (key, value) in items {
            tracing::info!(component = self.component, "  {}: {}", key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("TEXT".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CaptureWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_detail_only_when_verbose() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || CaptureWriter(sink.clone()))
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            Logger::new("quiet", false).detail("hidden detail");
            Logger::new("loud", true).detail("shown detail");
        });

        let output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(!output.contains("hidden detail"));
        assert!(output.contains("shown detail"));
    }

    #[test]
    fn test_scoped_keeps_verbosity() {
        let logger = Logger::new("server", true).scoped("forwarder");
        assert_eq!(logger.component(), "forwarder");
        assert!(logger.verbose);
    }
}
