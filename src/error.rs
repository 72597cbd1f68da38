use thiserror::Error;

/// Failure of a call to an external service (chain node or price API).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// May succeed on a later tick.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Will never succeed with the current configuration.
    #[error("fatal failure: {0}")]
    Fatal(String),
}

impl FetchError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::Fatal(_))
    }
}

/// Why a raw log entry could not be turned into a transfer record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected 3 topics, found {0}")]
    TopicCount(usize),
    #[error("topic0 is not the Transfer signature")]
    UnexpectedSignature,
    #[error("topic {0} does not hold a left-padded address")]
    InvalidAddressTopic(usize),
    #[error("data payload is empty")]
    EmptyData,
    #[error("data payload is {0} bytes, larger than a uint256")]
    OversizedData(usize),
    #[error("log is missing {0}")]
    MissingField(&'static str),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid address {value:?}: {reason}")]
    InvalidAddress { value: String, reason: String },
    #[error("invalid threshold {0:?}")]
    InvalidThreshold(String),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Failure of a single reporter sink. Never aborts the run.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("chart rendering failed: {0}")]
    Render(String),
    #[error("price series unavailable: {0}")]
    Fetch(#[from] FetchError),
}
