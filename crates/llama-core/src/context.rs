//! Safe RAII wrapper around `llama_context`.

use std::sync::Arc;

use tracing::debug;

use crate::batch::LlamaBatch;
use crate::error::{LlamaError, Result};
use crate::model::LlamaModel;
use crate::token::LlamaToken;

/// Owns a `llama_context` pointer and its parent model reference.
pub struct LlamaContext {
    ptr: *mut llama_sys::llama_context,
    /// Keep the model alive for the lifetime of the context.
    model: Arc<LlamaModel>,
    /// Set once an evaluation has produced a logits row.
    has_logits: bool,
}

// Safety: every mutating call takes &mut self, and the type is not Sync,
// so a context is only ever driven from one thread at a time.
unsafe impl Send for LlamaContext {}

impl LlamaContext {
    /// Create a new inference context.
    pub fn new(model: Arc<LlamaModel>, params: &ContextParams) -> Result<Self> {
        let mut raw = unsafe { llama_sys::llama_context_default_params() };
        raw.n_ctx = params.n_ctx;
        raw.n_batch = params.n_batch;
        raw.n_ubatch = params.n_ubatch;
        raw.n_threads = params.n_threads;
        raw.n_threads_batch = params.n_threads_batch;

        let ctx = unsafe { llama_sys::llama_init_from_model(model.as_ptr(), raw) };
        if ctx.is_null() {
            return Err(LlamaError::ContextCreationFailed(
                "llama_init_from_model returned null".into(),
            ));
        }

        let ctx = Self {
            ptr: ctx,
            model,
            has_logits: false,
        };
        debug!(n_ctx = ctx.n_ctx(), n_threads = params.n_threads, "Context created");
        Ok(ctx)
    }

    //  Accessors

    pub fn model(&self) -> &LlamaModel {
        &self.model
    }

    /// Shared handle to the parent model.
    pub fn model_arc(&self) -> Arc<LlamaModel> {
        Arc::clone(&self.model)
    }

    /// Size of the position window actually allocated.
    pub fn n_ctx(&self) -> u32 {
        unsafe { llama_sys::llama_n_ctx(self.ptr) }
    }

    /// Most tokens a single decode accepts.
    pub fn n_batch(&self) -> u32 {
        unsafe { llama_sys::llama_n_batch(self.ptr) }
    }

    //  Core operations

    /// Feed `tokens` into the model at positions `n_past..n_past + len`.
    ///
    /// Inputs longer than [`n_batch`](Self::n_batch) are decoded in
    /// consecutive chunks.
    ///
    /// `n_threads > 0` overrides the evaluation parallelism for this and
    /// later calls; otherwise the context keeps its current setting. On
    /// success the logits for the final token are available through
    /// [`logits`](Self::logits).
    pub fn eval(&mut self, tokens: &[LlamaToken], n_past: i32, n_threads: i32) -> Result<()> {
        if tokens.is_empty() {
            return Err(LlamaError::EmptyInput);
        }
        let n_ctx = self.n_ctx();
        let fits = n_past >= 0 && (n_past as u64 + tokens.len() as u64) <= u64::from(n_ctx);
        if !fits {
            return Err(LlamaError::ContextOverflow {
                n_tokens: tokens.len(),
                n_past,
                n_ctx,
            });
        }

        if n_threads > 0 {
            unsafe { llama_sys::llama_set_n_threads(self.ptr, n_threads, n_threads) }
        }

        // The previous row is overwritten by the engine from here on.
        self.has_logits = false;

        // A single decode may not exceed the context's batch size.
        let n_batch = self.n_batch().max(1) as usize;
        let mut pos = n_past;
        let mut rest = tokens;
        while !rest.is_empty() {
            let (chunk, tail) = rest.split_at(rest.len().min(n_batch));
            let batch = LlamaBatch::for_sequence(chunk, pos, tail.is_empty());
            self.decode(&batch)?;
            pos += chunk.len() as i32;
            rest = tail;
        }

        self.has_logits = true;
        debug!(n_tokens = tokens.len(), n_past, n_batch, "Evaluated");
        Ok(())
    }

    /// Decode (process) a prepared batch.
    pub fn decode(&mut self, batch: &LlamaBatch) -> Result<()> {
        let rc = unsafe { llama_sys::llama_decode(self.ptr, batch.raw()) };
        if rc != 0 {
            return Err(LlamaError::DecodeFailed(rc));
        }
        Ok(())
    }

    /// Scores for the last evaluated token, one per vocabulary entry.
    ///
    /// The slice borrows the context's own buffer, which the next
    /// [`eval`](Self::eval) overwrites; the borrow keeps that from
    /// happening while the view is alive. `None` before the first
    /// successful evaluation.
    pub fn logits(&self) -> Option<&[f32]> {
        if !self.has_logits {
            return None;
        }
        unsafe {
            let p = llama_sys::llama_get_logits_ith(self.ptr, -1);
            if p.is_null() {
                None
            } else {
                Some(std::slice::from_raw_parts(p, self.model.n_vocab() as usize))
            }
        }
    }

    /// Owned copy of [`logits`](Self::logits).
    pub fn logits_to_vec(&self) -> Option<Vec<f32>> {
        self.logits().map(<[f32]>::to_vec)
    }

    /// Drop every cached position so the next evaluation can start at 0.
    pub fn clear_memory(&mut self) {
        unsafe {
            let mem = llama_sys::llama_get_memory(self.ptr);
            if !mem.is_null() {
                llama_sys::llama_memory_clear(mem, false);
            }
        }
        self.has_logits = false;
    }
}

impl Drop for LlamaContext {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            debug!("Freeing llama context");
            unsafe { llama_sys::llama_free(self.ptr) }
        }
    }
}

//  ContextParams

#[derive(Debug, Clone)]
pub struct ContextParams {
    /// Position window; 0 uses the model's training context size.
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_ubatch: u32,
    pub n_threads: i32,
    pub n_threads_batch: i32,
}

impl Default for ContextParams {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get() as i32)
            .unwrap_or(4);
        Self {
            n_ctx: 0,
            n_batch: 2048,
            n_ubatch: 512,
            n_threads: threads,
            n_threads_batch: threads,
        }
    }
}

impl ContextParams {
    /// Defaults with an explicit window and thread count. Non-positive
    /// `n_threads` keeps the default.
    pub fn new(n_ctx: u32, n_threads: i32) -> Self {
        let mut params = Self {
            n_ctx,
            ..Self::default()
        };
        if n_threads > 0 {
            params.n_threads = n_threads;
            params.n_threads_batch = n_threads;
        }
        params
    }
}
