pub mod config;
pub mod daemon;
pub mod error;
pub mod history;
pub mod logging;
pub mod relay;
pub mod runtime_paths;
pub mod transcript;

pub type Result<T> = std::result::Result<T, error::GeminiRelayError>;
