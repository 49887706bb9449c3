use thiserror::Error;

/// A configuration change that was rejected. The snapshot it targeted is left untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("start date {start} must not be after end date {end}")]
    DateRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("{field} must be a finite number (value: {value})")]
    NotFinite { field: String, value: f64 },

    #[error("{field} must be between {min} and {max} (value: {value})")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{lower} ({lower_value}) must be below {upper} ({upper_value})")]
    Ordering {
        lower: String,
        lower_value: f64,
        upper: String,
        upper_value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComputationError {
    #[error("compute service unreachable: {0}")]
    Transport(String),

    #[error("compute service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("compute service response could not be decoded: {0}")]
    Decode(String),

    #[error("no market data for {symbol} between {start} and {end}")]
    EmptyData {
        symbol: String,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },
}

/// Failures of a single chat turn. Each one ends up as an ERROR intent.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChatError {
    #[error("no language model API key configured; add one in settings and try again")]
    MissingCredentials,

    #[error("language model request failed: {0}")]
    Transport(String),

    #[error("could not understand the model reply ({0}); try rephrasing your request")]
    Parse(String),

    #[error("unknown strategy '{0}'; supported strategies are {1}")]
    UnknownStrategy(String, String),

    #[error("the suggested configuration was rejected: {0}")]
    Rejected(#[from] ValidationError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("stored value under {key} is malformed: {reason}")]
    Malformed { key: String, reason: String },
}

pub type StorageResult<T> = Result<T, StorageError>;
