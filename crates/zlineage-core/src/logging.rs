//! Logging setup for binaries embedding the engine.
//!
//! Library code only talks to the `log` facade; this installs a process
//! backend for tools that have none of their own. The removal flows rely
//! on `warn!` records staying visible, so a default filter is applied even
//! without any environment override.

use log::Record;
use std::env;
use std::io::Write;
use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

const FORMAT_ENV: &str = "ZLINEAGE_LOG_FORMAT";
const LEVEL_ENV: &str = "ZLINEAGE_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Plain,
}

impl LogFormat {
    fn from_env() -> Self {
        match env::var(FORMAT_ENV) {
            Ok(value) if value.eq_ignore_ascii_case("plain") => Self::Plain,
            _ => Self::Json,
        }
    }
}

/// Install the process-wide logger; only the first call has any effect.
///
/// The filter comes from `ZLINEAGE_LOG_LEVEL`, then `RUST_LOG`, then
/// `default_level`. Set `ZLINEAGE_LOG_FORMAT=plain` for human-oriented
/// lines instead of JSON.
pub fn init(default_level: &str) {
    let _ = INIT.get_or_init(|| {
        let filter = env::var(LEVEL_ENV)
            .or_else(|_| env::var("RUST_LOG"))
            .unwrap_or_else(|_| default_level.to_string());
        let format = LogFormat::from_env();

        let mut builder = env_logger::Builder::new();
        builder.parse_filters(&filter);
        builder.format(move |buf, record| {
            let timestamp = buf.timestamp().to_string();
            writeln!(buf, "{}", render(format, &timestamp, record))
        });

        // Another logger may already be installed; engine records then
        // flow through that one instead.
        let _ = builder.try_init();
    });
}

fn render(format: LogFormat, timestamp: &str, record: &Record) -> String {
    match format {
        LogFormat::Json => serde_json::json!({
            "ts": timestamp,
            "severity": record.level().as_str(),
            "module": record.target(),
            "event": record.args().to_string(),
        })
        .to_string(),
        LogFormat::Plain => format!(
            "[{timestamp}] {:<5} {} {}",
            record.level(),
            record.target(),
            record.args()
        ),
    }
}
