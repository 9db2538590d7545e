//! Structured logging via the `tracing` ecosystem.
//!
//! The CLI maps `-q`/`-v` to a preset; `RUST_LOG` always wins when set,
//! so `RUST_LOG=folo=trace folo fetch` works regardless of flags.

use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level emitted for this crate's events.
    pub level: LogLevel,
    /// Include the module path in each line.
    pub target: bool,
    /// Include span enter/exit events.
    pub spans: bool,
    /// ANSI colors on stderr.
    pub colors: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    Off,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            target: false,
            spans: false,
            colors: true,
        }
    }
}

impl LogConfig {
    /// Errors only.
    #[must_use]
    pub const fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            target: false,
            spans: false,
            colors: true,
        }
    }

    /// Debug level with module paths.
    #[must_use]
    pub const fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            target: true,
            spans: false,
            colors: true,
        }
    }

    /// Everything, span events included.
    #[must_use]
    pub const fn trace() -> Self {
        Self {
            level: LogLevel::Trace,
            target: true,
            spans: true,
            colors: true,
        }
    }
}

impl LogLevel {
    const fn to_filter_string(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
            Self::Off => "off",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" | "e" => Ok(Self::Error),
            "warn" | "warning" | "w" => Ok(Self::Warn),
            "info" | "i" => Ok(Self::Info),
            "debug" | "d" => Ok(Self::Debug),
            "trace" | "t" => Ok(Self::Trace),
            "off" | "none" | "quiet" => Ok(Self::Off),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

/// Initialize the global subscriber. Call once at startup; later calls
/// are ignored.
pub fn init_logging(config: &LogConfig) {
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(format!("folo={}", config.level.to_filter_string()))
    };

    let span_events = if config.spans {
        FmtSpan::ENTER | FmtSpan::EXIT
    } else {
        FmtSpan::NONE
    };

    let layer = fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_ansi(config.colors)
        .with_target(config.target)
        .with_span_events(span_events);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init()
        .ok();
}

/// Map the CLI's `-q` and repeated `-v` flags to a preset.
pub fn init_cli_logging(quiet: bool, verbosity: u8) {
    let config = if quiet {
        LogConfig::quiet()
    } else {
        match verbosity {
            0 => LogConfig::default(),
            1 => LogConfig::verbose(),
            _ => LogConfig::trace(),
        }
    };
    init_logging(&config);
}
