use thiserror::Error;

/// Rejected command input. The only error class surfaced to the user as a
/// refusal; state is left unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("invalid address {0:?}: expected 0x followed by 40 hex characters")]
    InvalidAddress(String),

    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("minimum value must be a finite number >= 0 (got {0})")]
    InvalidMinValue(f64),

    #[error("poll interval must be at least {min}s (got {got}s)")]
    IntervalTooShort { got: u64, min: u64 },
}

/// Failure fetching trades from the venue.
#[derive(Error, Debug)]
pub enum VenueError {
    /// Timeout, connection failure, or truncated body.
    #[error("network error: {0}")]
    Network(String),

    #[error("venue returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed venue payload: {0}")]
    Malformed(String),
}

impl VenueError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            VenueError::Network(_) => true,
            VenueError::Status { status, .. } => *status == 429 || *status >= 500,
            VenueError::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for VenueError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            VenueError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            VenueError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            VenueError::Network(err.to_string())
        }
    }
}

/// Notification transport failure.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("messaging API rejected the request ({status}): {description}")]
    Rejected { status: u16, description: String },
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        match self {
            DeliveryError::Transport(_) => true,
            DeliveryError::Rejected { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Transport(err.to_string())
    }
}

/// Failure reading or writing persisted state.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}
