use thiserror::Error;

/// Error taxonomy for the router core.
///
/// The split between `Inference` and `Cancelled` is deliberate: callers can
/// retry an inference failure but should treat a cancellation as final for
/// the current request.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Missing or invalid model configuration. Fatal when raised by the
    /// eager load path; the lazy path logs it and degrades instead.
    #[error("configuration error: {0}")]
    Config(String),

    /// A backend forward pass failed, or the model produced output the
    /// caller cannot use. Aborts the current generation only.
    #[error("inference failed for model '{model}': {reason}")]
    Inference { model: String, reason: String },

    /// The cancellation token fired or the deadline expired.
    #[error("generation cancelled")]
    Cancelled,

    /// Dispatch against a model whose lazy load previously failed or is
    /// still cooling down after a failure.
    #[error("model unavailable: {0}")]
    Unavailable(String),
}
