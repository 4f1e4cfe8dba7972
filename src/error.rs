use thiserror::Error;

#[derive(Error, Debug)]
pub enum QubusError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    #[error("Placeholder count mismatch: the query has {expected} placeholder(s) but {supplied} parameter(s) were supplied")]
    PlaceholderCountMismatch { expected: usize, supplied: usize },
    #[error("Unsupported parameter type: {0}")]
    UnsupportedParameterType(&'static str),
    #[error("Invalid output shape: {0}")]
    InvalidOutputShape(String),
    #[error("Invalid prefix: {0:?}")]
    InvalidPrefix(String),
    #[error("Driver error: {0}")]
    Driver(String),
    #[error("Nested transactions are not supported")]
    NestedTransaction,
    #[error("Store error: {0}")]
    Store(String),
    #[error("Schedule error: {0}")]
    Schedule(String),
    #[error("Max runtime of {max}s exceeded for job '{job}' (lock is {elapsed}s old)")]
    MaxRuntimeExceeded { job: String, elapsed: u64, max: u64 },
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),
    #[error("Callback '{0}' does not exist")]
    StaleCallback(String),
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
    #[error("HTTP error: {0}")]
    Http(String),
}

pub type Result<T> = std::result::Result<T, QubusError>;

// Helper conversions
impl From<rusqlite::Error> for QubusError {
    fn from(e: rusqlite::Error) -> Self { Self::Driver(e.to_string()) }
}
impl From<std::io::Error> for QubusError {
    fn from(e: std::io::Error) -> Self { Self::Store(e.to_string()) }
}
impl From<serde_json::Error> for QubusError {
    fn from(e: serde_json::Error) -> Self { Self::Store(e.to_string()) }
}
impl From<config::ConfigError> for QubusError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl<T> From<std::sync::PoisonError<T>> for QubusError {
    fn from(e: std::sync::PoisonError<T>) -> Self { Self::Lock(e.to_string()) }
}
