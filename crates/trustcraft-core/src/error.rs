use std::time::Duration;

use thiserror::Error;

/// Failures reaching or decoding a generation, embedding or retrieval provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured limit on the error.
            ProviderError::Timeout(Duration::ZERO)
        } else if err.is_decode() {
            ProviderError::MalformedResponse(err.to_string())
        } else {
            ProviderError::Unavailable(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum AttributionError {
    /// The no-evidence baseline could not be scored. Every chunk's
    /// attribution is relative to it, so nothing can be reported.
    #[error("attribution unavailable: baseline score failed: {0}")]
    Unavailable(#[source] ProviderError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("evidence retrieval failed: {0}")]
    Retrieval(#[source] ProviderError),

    #[error(transparent)]
    Attribution(#[from] AttributionError),
}
