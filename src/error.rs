use std::fmt;

/// Non-fatal errors raised while scraping.
///
/// These travel in-band through the sample channel, wrapped in an invalid
/// metric, and are aggregated by the gather loop instead of aborting the
/// scrape. Configuration errors are fatal at startup and use `anyhow`
/// directly; they never appear here.
#[derive(Debug, Clone, PartialEq)]
pub enum ScrapeError {
    /// Opening or pinging the target database failed.
    Connection(String),
    /// Query execution or result-schema binding failed.
    Query(String),
    /// A single sample could not be materialized from its value column.
    Value(String),
    /// The scrape deadline expired during the named operation.
    Deadline(String),
    /// A consistency violation inside the exporter itself.
    Internal(String),
}

impl fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(msg) => write!(f, "connection error: {}", msg),
            Self::Query(msg) => write!(f, "query error: {}", msg),
            Self::Value(msg) => write!(f, "value error: {}", msg),
            Self::Deadline(op) => write!(f, "scrape deadline exceeded while {}", op),
            Self::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for ScrapeError {}

impl ScrapeError {
    /// Prefixes the message with the emitting component's log context.
    pub fn in_context(self, context: &str) -> ScrapeError {
        let prefix = |msg: String| format!("[{}] {}", context, msg);
        match self {
            Self::Connection(msg) => Self::Connection(prefix(msg)),
            Self::Query(msg) => Self::Query(prefix(msg)),
            Self::Value(msg) => Self::Value(prefix(msg)),
            Self::Deadline(op) => Self::Deadline(prefix(op)),
            Self::Internal(msg) => Self::Internal(prefix(msg)),
        }
    }
}
