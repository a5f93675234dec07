//! Error types and handling for the hev-socks5-tunnel bridge

use thiserror::Error;

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The engine module could not be opened
    #[error("Engine load error: {0}")]
    EngineLoad(String),

    /// A required entry point was missing from the engine module
    #[error("Engine symbol error: {0}")]
    Symbol(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Interior NUL byte in configuration text handed to the engine
    #[error("Invalid configuration text: {0}")]
    Nul(#[from] std::ffi::NulError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
