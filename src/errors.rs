use thiserror::Error;

/// Typed error hierarchy for opendan.
///
/// Use at module boundaries (config mutation, provider construction,
/// secret storage). Internal/leaf functions can continue using
/// `anyhow::Result` — the `Internal` variant allows seamless conversion
/// via the `?` operator.
#[derive(Debug, Error)]
pub enum OpendanError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
