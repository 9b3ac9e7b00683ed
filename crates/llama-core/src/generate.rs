//! Token generation on top of `eval` + copied logits.

use tokio::sync::mpsc;
use tracing::debug;

use crate::context::LlamaContext;
use crate::error::{LlamaError, Result};
use crate::sampler::SamplingParams;
use crate::token::{LlamaToken, token_to_bytes};

/// Parameters for a generation request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Pre-tokenized prompt.
    pub tokens: Vec<LlamaToken>,
    /// Position of the first prompt token in the context window.
    pub n_past: i32,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Stop-word strings.
    pub stop_words: Vec<String>,
    /// Sampling configuration.
    pub sampling_params: SamplingParams,
    /// Evaluation threads; 0 keeps the context's setting.
    pub n_threads: i32,
}

impl GenerateRequest {
    pub fn new(tokens: Vec<LlamaToken>, max_tokens: u32) -> Self {
        Self {
            tokens,
            n_past: 0,
            max_tokens,
            stop_words: Vec::new(),
            sampling_params: SamplingParams::default(),
            n_threads: 0,
        }
    }
}

/// Events emitted during streaming generation.
#[derive(Debug, Clone)]
pub enum GenerateEvent {
    /// A new text piece was decoded.
    Token(String),
    /// Generation finished.
    Done {
        finish_reason: FinishReason,
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    /// An error occurred mid-generation.
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural stop (EOS / EOT token).
    Stop,
    /// Reached `max_tokens` or the end of the context window.
    Length,
    /// Matched a stop word.
    StopWord(String),
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Length => write!(f, "length"),
            Self::StopWord(w) => write!(f, "stop_word:{w}"),
        }
    }
}

/// Result of a generation collected into one string.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub finish_reason: FinishReason,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Run a synchronous (blocking) generation loop.
///
/// This is intended to be called inside `tokio::task::spawn_blocking`.
/// Produced text is sent over `tx`; the function returns when generation
/// finishes or the receiver is dropped.
pub fn generate_blocking(
    ctx: &mut LlamaContext,
    request: &GenerateRequest,
    tx: mpsc::Sender<GenerateEvent>,
) {
    run(ctx, request, |event| tx.blocking_send(event).is_ok());
}

/// Run generation to the end and collect the text.
pub fn generate_to_completion(
    ctx: &mut LlamaContext,
    request: &GenerateRequest,
) -> Result<Completion> {
    let mut text = String::new();
    let mut outcome = None;
    run(ctx, request, |event| {
        match event {
            GenerateEvent::Token(piece) => text.push_str(&piece),
            GenerateEvent::Done {
                finish_reason,
                prompt_tokens,
                completion_tokens,
            } => outcome = Some(Ok((finish_reason, prompt_tokens, completion_tokens))),
            GenerateEvent::Error(msg) => outcome = Some(Err(LlamaError::Other(msg))),
        }
        true
    });

    match outcome {
        Some(Ok((finish_reason, prompt_tokens, completion_tokens))) => Ok(Completion {
            text,
            finish_reason,
            prompt_tokens,
            completion_tokens,
        }),
        Some(Err(e)) => Err(e),
        None => Err(LlamaError::Other("generation ended without a result".into())),
    }
}

/// Core loop. `emit` returns `false` when the consumer has gone away.
fn run(
    ctx: &mut LlamaContext,
    request: &GenerateRequest,
    mut emit: impl FnMut(GenerateEvent) -> bool,
) {
    let model = ctx.model_arc();
    let n_ctx = ctx.n_ctx() as i32;
    let eos = model.token_eos();
    let eot = model.token_eot();
    let prompt_tokens = request.tokens.len() as u32;

    //  Prompt processing
    if let Err(e) = ctx.eval(&request.tokens, request.n_past, request.n_threads) {
        emit(GenerateEvent::Error(format!("prompt eval: {e}")));
        return;
    }

    let mut n_cur = request.n_past + request.tokens.len() as i32;
    let mut completion_tokens = 0u32;
    let mut utf8 = Utf8Assembler::default();
    let mut stops = StopWordFilter::new(&request.stop_words);
    let mut sampler = request.sampling_params.clone().into_sampler();

    //  Token generation loop
    loop {
        if completion_tokens >= request.max_tokens {
            let tail = utf8.finish();
            close(
                &mut emit,
                &mut stops,
                FinishReason::Length,
                prompt_tokens,
                completion_tokens,
                &tail,
            );
            break;
        }

        let Some(logits) = ctx.logits() else {
            emit(GenerateEvent::Error("no logits after eval".into()));
            break;
        };
        let new_token = sampler.sample(logits);
        completion_tokens += 1;

        if new_token == eos || new_token == eot {
            let tail = utf8.finish();
            close(
                &mut emit,
                &mut stops,
                FinishReason::Stop,
                prompt_tokens,
                completion_tokens,
                &tail,
            );
            break;
        }

        let piece = utf8.push(&token_to_bytes(&model, new_token));
        match stops.push(&piece) {
            StopScan::Stopped { before, word } => {
                finish(
                    &mut emit,
                    FinishReason::StopWord(word),
                    prompt_tokens,
                    completion_tokens,
                    before,
                );
                break;
            }
            StopScan::Emit(text) => {
                if !text.is_empty() && !emit(GenerateEvent::Token(text)) {
                    debug!("Generation cancelled (receiver dropped)");
                    break;
                }
            }
        }

        // Context-size guard
        if n_cur >= n_ctx {
            let tail = utf8.finish();
            close(
                &mut emit,
                &mut stops,
                FinishReason::Length,
                prompt_tokens,
                completion_tokens,
                &tail,
            );
            break;
        }

        if let Err(e) = ctx.eval(&[new_token], n_cur, request.n_threads) {
            emit(GenerateEvent::Error(format!("eval: {e}")));
            break;
        }
        n_cur += 1;
    }
}

/// Flush `tail` and any held-back text, then finish. A stop word completed
/// by the flush takes precedence over `reason`.
fn close(
    emit: &mut impl FnMut(GenerateEvent) -> bool,
    stops: &mut StopWordFilter,
    reason: FinishReason,
    prompt_tokens: u32,
    completion_tokens: u32,
    tail: &str,
) {
    let (text, reason) = match stops.push(tail) {
        StopScan::Stopped { before, word } => (before, FinishReason::StopWord(word)),
        StopScan::Emit(mut text) => {
            text.push_str(&stops.flush());
            (text, reason)
        }
    };
    finish(emit, reason, prompt_tokens, completion_tokens, text);
}

fn finish(
    emit: &mut impl FnMut(GenerateEvent) -> bool,
    finish_reason: FinishReason,
    prompt_tokens: u32,
    completion_tokens: u32,
    tail: String,
) {
    if !tail.is_empty() {
        emit(GenerateEvent::Token(tail));
    }
    emit(GenerateEvent::Done {
        finish_reason,
        prompt_tokens,
        completion_tokens,
    });
}

/// Outcome of feeding one piece to a [`StopWordFilter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopScan {
    /// Text that can no longer become part of a stop word.
    Emit(String),
    /// A stop word matched; `before` is the unsent text preceding it.
    Stopped { before: String, word: String },
}

/// Holds back generated text that could still grow into a stop word, so a
/// stop word is never partially streamed.
#[derive(Debug, Default)]
pub struct StopWordFilter {
    words: Vec<String>,
    held: String,
}

impl StopWordFilter {
    pub fn new(words: &[String]) -> Self {
        Self {
            words: words.iter().filter(|w| !w.is_empty()).cloned().collect(),
            held: String::new(),
        }
    }

    /// Append `piece` and report what is safe to send.
    pub fn push(&mut self, piece: &str) -> StopScan {
        self.held.push_str(piece);

        let first_match = self
            .words
            .iter()
            .filter_map(|w| self.held.find(w.as_str()).map(|at| (at, w)))
            .min_by_key(|&(at, _)| at);
        if let Some((at, word)) = first_match {
            let word = word.clone();
            let before = self.held[..at].to_string();
            self.held.clear();
            return StopScan::Stopped { before, word };
        }

        // Keep the longest suffix that is still a stop-word prefix.
        let keep_from = self
            .held
            .char_indices()
            .map(|(i, _)| i)
            .find(|&i| {
                let suffix = &self.held[i..];
                self.words.iter().any(|w| w.starts_with(suffix))
            })
            .unwrap_or(self.held.len());
        let held = self.held.split_off(keep_from);
        StopScan::Emit(std::mem::replace(&mut self.held, held))
    }

    /// Release whatever is still held back.
    pub fn flush(&mut self) -> String {
        std::mem::take(&mut self.held)
    }
}

/// Joins token bytes into text, holding back an incomplete trailing
/// UTF-8 sequence until the token that completes it arrives.
#[derive(Debug, Default)]
pub struct Utf8Assembler {
    pending: Vec<u8>,
}

impl Utf8Assembler {
    /// Append `bytes` and return whatever is now complete text.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush held bytes, replacing an unfinished sequence.
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}
