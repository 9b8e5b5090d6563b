//! Error types for the network receive path
//!
//! Only recoverable failures live here. Contract breaches between the port,
//! the pools and the OS go through [`fatal!`](crate::fatal) instead.

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Handle initialization failed: {0}")]
    InitFailed(String),

    #[error("Socket bind failed on {address}: {reason}")]
    BindFailed { address: String, reason: String },

    #[error("Can't read bound address: {0}")]
    LocalAddrFailed(String),

    #[error("Unexpected bound address length: got={got} expected={expected}")]
    AddressLengthMismatch { got: usize, expected: usize },

    #[error("Bound address is not an IP address")]
    InvalidBoundAddress,

    #[error("Multicast membership change failed for {group}: {reason}")]
    MulticastFailed { group: String, reason: String },

    #[error("Can't start receiving: {0}")]
    RecvStartFailed(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Address already has a port: {0}")]
    AddressInUse(String),

    #[error("No port bound to {0}")]
    PortNotFound(String),

    #[error("Can't start network loop: {0}")]
    LoopSpawnFailed(String),

    #[error("Network loop is stopped")]
    LoopStopped,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Can't read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Can't write {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("Malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Can't serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("No configuration directory available")]
    NoConfigDir,

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
