use thiserror::Error;

/// Problems found while validating configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("name pool has {names} names but max_identities is {max}; add names or lower the cap")]
    NamePoolTooSmall { names: usize, max: usize },
    #[error("max_identities must be at least 1")]
    ZeroCapacity,
    #[error("{what} must be at least 1")]
    ZeroTimeout { what: &'static str },
    #[error("{what}: min delay {min}s is greater than max delay {max}s")]
    BadDelayRange { what: &'static str, min: u64, max: u64 },
    #[error("invalid name {0:?} in name pool")]
    BadPoolName(String),
    #[error("bad value for {var}: {value:?}")]
    BadEnv { var: &'static str, value: String },
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    #[error("correlation key already pending")]
    KeyCollision,
}

/// Errors returned to callers of the engine. Per-identity failures after
/// creation are reported through engine events instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("identity limit reached ({max})")]
    CapacityExceeded { max: usize },
    #[error("name {0:?} is already in use")]
    NameTaken(String),
    #[error("invalid name {0:?}")]
    InvalidName(String),
    #[error("every name in the pool is in use")]
    NamesExhausted,
    #[error("could not mint a correlation key: {0}")]
    KeyMint(String),
    #[error("engine is shut down")]
    Closed,
}
