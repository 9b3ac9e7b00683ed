//! Safe Rust wrapper around the llama.cpp C API.
//!
//! Provides RAII-managed types for the backend, models and contexts, the
//! caller-sized tokenization protocol, and host-side helpers for sampling,
//! prompt formatting and streaming text generation.

pub mod backend;
pub mod batch;
pub mod config;
pub mod context;
pub mod error;
pub mod generate;
pub mod model;
pub mod prompt;
pub mod sampler;
pub mod session;
pub mod token;

pub use backend::{LlamaBackend, bridge_engine_logs};
pub use batch::LlamaBatch;
pub use config::EngineConfig;
pub use context::{ContextParams, LlamaContext};
pub use error::{LlamaError, Result};
pub use generate::{
    Completion, FinishReason, GenerateEvent, GenerateRequest, StopScan, StopWordFilter,
    Utf8Assembler,
};
pub use model::{LlamaModel, ModelParams};
pub use prompt::{ChatMessage, FunctionCallMode, FunctionDefinition, build_prompt};
pub use sampler::{Sampler, SamplingParams};
pub use session::Session;
pub use token::{
    LlamaToken, TOKENIZE_ERROR, detokenize, token_to_bytes, token_to_piece, token_to_piece_into,
    tokenize, tokenize_into,
};
