//! One backend, one model, one context, driven from an [`EngineConfig`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::backend::LlamaBackend;
use crate::config::EngineConfig;
use crate::context::LlamaContext;
use crate::error::{LlamaError, Result};
use crate::generate::{self, Completion, GenerateEvent, GenerateRequest};
use crate::model::LlamaModel;
use crate::prompt::{ChatMessage, FunctionCallMode, FunctionDefinition, build_prompt};
use crate::token::{self, LlamaToken};

/// Event channel depth for [`Session::stream`].
const STREAM_CAPACITY: usize = 64;

pub struct Session {
    config: EngineConfig,
    ctx: LlamaContext,
}

impl Session {
    /// Load the configured model and create its context.
    ///
    /// `backend` is shared: several sessions may run on one backend.
    pub fn open(backend: &Arc<LlamaBackend>, config: EngineConfig) -> Result<Self> {
        let path = config
            .model_path
            .clone()
            .ok_or_else(|| LlamaError::ModelLoadFailed {
                path: String::new(),
                reason: "model_path is required".into(),
            })?;

        let model = Arc::new(LlamaModel::load_from_file(
            backend,
            &path,
            &config.model_params(),
        )?);
        // On failure the model drops here, before the error propagates.
        let ctx = LlamaContext::new(model, &config.context_params())?;
        info!(model = %path.display(), n_ctx = ctx.n_ctx(), "Session ready");
        Ok(Self { config, ctx })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn model(&self) -> &LlamaModel {
        self.ctx.model()
    }

    /// Tokenize and generate from a raw prompt, starting from an empty window.
    pub fn complete(&mut self, prompt: &str) -> Result<Completion> {
        let request = self.request_for(prompt)?;
        self.ctx.clear_memory();
        generate::generate_to_completion(&mut self.ctx, &request)
    }

    /// Format `messages` with [`build_prompt`] and complete it.
    pub fn chat(
        &mut self,
        messages: &[ChatMessage],
        functions: &[FunctionDefinition],
        mode: &FunctionCallMode,
    ) -> Result<Completion> {
        let prompt = build_prompt(messages, functions, mode);
        self.complete(&prompt)
    }

    /// Generate on a blocking thread, streaming events as they are produced.
    ///
    /// The session is moved into the worker and handed back through the
    /// join handle once generation ends; dropping the receiver stops
    /// generation early.
    pub fn stream(
        mut self,
        prompt: &str,
    ) -> Result<(
        mpsc::Receiver<GenerateEvent>,
        tokio::task::JoinHandle<Session>,
    )> {
        let request = self.request_for(prompt)?;
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let handle = tokio::task::spawn_blocking(move || {
            self.ctx.clear_memory();
            generate::generate_blocking(&mut self.ctx, &request, tx);
            self
        });
        Ok((rx, handle))
    }

    fn request_for(&self, prompt: &str) -> Result<GenerateRequest> {
        let mut tokens = token::tokenize(self.ctx.model(), prompt, true)?;
        if tokens.is_empty() {
            return Err(LlamaError::EmptyInput);
        }

        // Keep the tail of an oversized prompt and leave room to answer.
        let n_ctx = self.ctx.n_ctx() as usize;
        let budget = n_ctx.saturating_sub(self.config.max_new_tokens as usize).max(1);
        if tokens.len() > budget {
            warn!(prompt_tokens = tokens.len(), budget, "Prompt truncated to fit context");
            keep_tail(&mut tokens, budget, self.ctx.model().token_bos());
        }

        Ok(GenerateRequest {
            tokens,
            n_past: 0,
            max_tokens: self.config.max_new_tokens,
            stop_words: self.config.stop_words.clone(),
            sampling_params: self.config.sampling.clone(),
            n_threads: self.config.threads,
        })
    }
}

/// Trim `tokens` to its last `budget` entries, keeping a leading `bos`.
fn keep_tail(tokens: &mut Vec<LlamaToken>, budget: usize, bos: LlamaToken) {
    if tokens.len() <= budget {
        return;
    }
    let excess = tokens.len() - budget;
    if budget > 1 && tokens.first() == Some(&bos) {
        tokens.drain(1..=excess);
    } else {
        tokens.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOS: LlamaToken = 1;

    #[test]
    fn truncation_keeps_bos() {
        let mut tokens = vec![BOS, 10, 11, 12, 13, 14];
        keep_tail(&mut tokens, 4, BOS);
        assert_eq!(tokens, vec![BOS, 12, 13, 14]);
    }

    #[test]
    fn truncation_without_bos_keeps_tail() {
        let mut tokens = vec![10, 11, 12, 13, 14];
        keep_tail(&mut tokens, 3, BOS);
        assert_eq!(tokens, vec![12, 13, 14]);
    }

    #[test]
    fn short_prompt_is_untouched() {
        let mut tokens = vec![BOS, 10];
        keep_tail(&mut tokens, 4, BOS);
        assert_eq!(tokens, vec![BOS, 10]);
    }

    #[test]
    fn budget_of_one_keeps_last_token() {
        let mut tokens = vec![BOS, 10, 11];
        keep_tail(&mut tokens, 1, BOS);
        assert_eq!(tokens, vec![11]);
    }
}
