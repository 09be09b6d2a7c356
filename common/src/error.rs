use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid response state {0:?} (expected all, accepted or notRejected)")]
    InvalidResponseState(String),
    #[error("invalid time of day {0:?} (expected HH:MM)")]
    InvalidTimeOfDay(String),
    #[error("invalid timezone {0:?}")]
    InvalidTimezone(String),
    #[error("malformed preferences: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("device error: {0}")]
pub struct DeviceError(pub String);

#[derive(Debug, Error)]
pub enum BlinkerError {
    #[error("device failed {retries} consecutive times, giving up: {source}")]
    RetriesExhausted {
        retries: u32,
        #[source]
        source: DeviceError,
    },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("calendar read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("calendar payload invalid: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("calendar upstream error: {0}")]
    Upstream(String),
}
