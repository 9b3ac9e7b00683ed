use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlamaError {
    #[error("Failed to load model from '{path}': {reason}")]
    ModelLoadFailed { path: String, reason: String },

    #[error("Failed to create context: {0}")]
    ContextCreationFailed(String),

    #[error("Decode failed with code {0}")]
    DecodeFailed(i32),

    #[error("Evaluation of {n_tokens} tokens at position {n_past} exceeds context window of {n_ctx}")]
    ContextOverflow { n_tokens: usize, n_past: i32, n_ctx: u32 },

    #[error("Nothing to evaluate: token sequence is empty")]
    EmptyInput,

    #[error("Tokenization failed: {0}")]
    TokenizationFailed(String),

    #[error("Backend already initialized")]
    BackendAlreadyInitialized,

    #[error("Backend was freed and cannot be initialized again")]
    BackendReleased,

    #[error("Backend not initialized")]
    BackendNotInitialized,

    #[error("Failed to read config '{path}': {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config '{path}': {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, LlamaError>;
