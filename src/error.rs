//! Error types for subrule.

use thiserror::Error;

/// Error type for subrule operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing or emitting error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error (decoder bridge)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Fetching a ruleset or config failed
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Malformed /getruleset request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown ruleset output type code
    #[error("invalid ruleset type: {0}")]
    InvalidRulesetType(i64),

    /// Node decoding failed
    #[error("decode error: {0}")]
    Decode(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Neither nodes nor proxy providers survived to render
    #[error("nothing to render")]
    NothingToRender,
}

/// Result type alias for subrule operations.
pub type Result<T> = std::result::Result<T, Error>;
