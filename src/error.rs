use thiserror::Error;

/// Coarse failure kinds for the generation relay. Each kind maps to exactly
/// one fixed user-facing sentence; raw vendor error text stays in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    Timeout,
    QuotaExceeded,
    InvalidCredentials,
    Overloaded,
    ContentBlocked,
    Unknown,
}

impl GenerationErrorKind {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Timeout => {
                "The request timed out before a reply arrived. Please try again in a moment."
            }
            Self::QuotaExceeded => {
                "The service has hit its usage quota. Please wait a little and try again."
            }
            Self::InvalidCredentials => {
                "The server's API credentials were rejected. Please contact the site operator."
            }
            Self::Overloaded => "The model is overloaded right now. Please try again shortly.",
            Self::ContentBlocked => {
                "The reply was blocked by a content filter. Try rephrasing your question."
            }
            Self::Unknown => "Something went wrong while generating a response. Please try again.",
        }
    }
}

#[derive(Debug, Error)]
pub enum GeminiRelayError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("generation error ({kind:?}): {detail}")]
    Generation {
        kind: GenerationErrorKind,
        detail: String,
    },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

pub use crate::Result;
