//! Flat C ABI over llama.cpp.
//!
//! Every entry point forwards to `llama-core`. Failures surface as a null
//! handle or a non-zero / negative return; a human-readable reason is kept
//! per thread and can be fetched with [`llc_last_error`].

mod error;
mod handles;

pub use handles::{LlcContext, LlcModel};

use std::ffi::{CStr, CString, c_char};
use std::path::Path;
use std::sync::{Arc, Once};

use llama_core::{
    ContextParams, LlamaContext, LlamaError, LlamaModel, LlamaToken, ModelParams, TOKENIZE_ERROR,
};
use tracing_subscriber::EnvFilter;

use crate::error::{guard, set_last_error, take_last_error};

/// Status returned by [`llc_eval`] for failures detected before the engine
/// is called.
const EVAL_REJECTED: i32 = -1;

//  Backend lifecycle

/// Initialize the llama.cpp backend. Call once before loading any model.
#[unsafe(no_mangle)]
pub extern "C" fn llc_backend_init() {
    guard((), handles::backend_init);
}

/// Release the backend. Models and contexts still open keep the engine up
/// until they are freed.
#[unsafe(no_mangle)]
pub extern "C" fn llc_backend_free() {
    guard((), handles::backend_free);
}

//  Model / context lifecycle

/// Load a GGUF model. `n_gpu_layers = 0` keeps every layer on the CPU.
///
/// Returns null on any failure.
///
/// # Safety
/// `path` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llc_load_model(
    path: *const c_char,
    n_gpu_layers: i32,
) -> *mut LlcModel {
    guard(std::ptr::null_mut(), || {
        if path.is_null() {
            set_last_error("llc_load_model: path is null");
            return std::ptr::null_mut();
        }
        let path = match unsafe { CStr::from_ptr(path) }.to_str() {
            Ok(p) => p,
            Err(e) => {
                set_last_error(format!("llc_load_model: invalid path: {e}"));
                return std::ptr::null_mut();
            }
        };

        let loaded = handles::backend().and_then(|backend| {
            LlamaModel::load_from_file(
                &backend,
                Path::new(path),
                &ModelParams::with_gpu_layers(n_gpu_layers),
            )
        });
        match loaded {
            Ok(model) => Box::into_raw(Box::new(LlcModel {
                inner: Arc::new(model),
            })),
            Err(e) => {
                set_last_error(e.to_string());
                std::ptr::null_mut()
            }
        }
    })
}

/// Free a model. Null is a no-op.
///
/// # Safety
/// `model` must be null or a live pointer from [`llc_load_model`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llc_free_model(model: *mut LlcModel) {
    if model.is_null() {
        return;
    }
    drop(unsafe { Box::from_raw(model) });
}

/// Create an inference context with a window of `n_ctx` positions
/// (0 = the model's training length). Returns null on failure.
///
/// # Safety
/// `model` must be null or a live pointer from [`llc_load_model`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llc_new_context(
    model: *mut LlcModel,
    n_ctx: i32,
    n_threads: i32,
) -> *mut LlcContext {
    guard(std::ptr::null_mut(), || {
        let Some(model) = (unsafe { model.as_ref() }) else {
            set_last_error("llc_new_context: model is null");
            return std::ptr::null_mut();
        };
        let Ok(n_ctx) = u32::try_from(n_ctx) else {
            set_last_error(format!("llc_new_context: invalid context size {n_ctx}"));
            return std::ptr::null_mut();
        };

        let params = ContextParams::new(n_ctx, n_threads);
        match LlamaContext::new(Arc::clone(&model.inner), &params) {
            Ok(ctx) => Box::into_raw(Box::new(LlcContext { inner: ctx })),
            Err(e) => {
                set_last_error(e.to_string());
                std::ptr::null_mut()
            }
        }
    })
}

/// Free a context. Null is a no-op.
///
/// # Safety
/// `ctx` must be null or a live pointer from [`llc_new_context`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llc_free_context(ctx: *mut LlcContext) {
    if ctx.is_null() {
        return;
    }
    drop(unsafe { Box::from_raw(ctx) });
}

//  Tokenization and evaluation

/// Tokenize `text`.
///
/// If `out` is null or `max_tokens <= 0` nothing is written and the number
/// of tokens required is returned. Otherwise up to `max_tokens` tokens are
/// written and the count written is returned; negative means failure
/// (`-required` when `max_tokens` is too small).
///
/// # Safety
/// `model` must be a live model, `text` a NUL-terminated string, and `out`
/// null or valid for `max_tokens` writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llc_tokenize(
    model: *mut LlcModel,
    text: *const c_char,
    add_bos: bool,
    out: *mut i32,
    max_tokens: i32,
) -> i32 {
    guard(TOKENIZE_ERROR, || {
        let Some(model) = (unsafe { model.as_ref() }) else {
            set_last_error("llc_tokenize: model is null");
            return TOKENIZE_ERROR;
        };
        if text.is_null() {
            set_last_error("llc_tokenize: text is null");
            return TOKENIZE_ERROR;
        }
        let text = unsafe { CStr::from_ptr(text) }.to_bytes();

        let out = if out.is_null() || max_tokens <= 0 {
            None
        } else {
            Some(unsafe { std::slice::from_raw_parts_mut(out, max_tokens as usize) })
        };

        let n = llama_core::tokenize_into(&model.inner, text, add_bos, out);
        if n < 0 {
            let reason = if n == TOKENIZE_ERROR {
                "tokenization failed".to_string()
            } else {
                format!("output buffer too small: {} tokens required", n.unsigned_abs())
            };
            set_last_error(format!("llc_tokenize: {reason}"));
        }
        n
    })
}

/// Evaluate `n_tokens` tokens at positions `n_past..`. Returns 0 on success.
///
/// `n_threads > 0` overrides the context's evaluation thread count.
///
/// # Safety
/// `ctx` must be a live context and `tokens` valid for `n_tokens` reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llc_eval(
    ctx: *mut LlcContext,
    tokens: *const i32,
    n_tokens: i32,
    n_past: i32,
    n_threads: i32,
) -> i32 {
    guard(EVAL_REJECTED, || {
        let Some(ctx) = (unsafe { ctx.as_mut() }) else {
            set_last_error("llc_eval: context is null");
            return EVAL_REJECTED;
        };
        let tokens: &[LlamaToken] = if tokens.is_null() || n_tokens <= 0 {
            &[]
        } else {
            unsafe { std::slice::from_raw_parts(tokens, n_tokens as usize) }
        };

        match ctx.inner.eval(tokens, n_past, n_threads) {
            Ok(()) => 0,
            Err(e) => {
                set_last_error(e.to_string());
                match e {
                    LlamaError::DecodeFailed(rc) => rc,
                    _ => EVAL_REJECTED,
                }
            }
        }
    })
}

/// Logits of the last evaluated token, `llc_n_vocab(model)` floats.
///
/// The buffer belongs to the context and is overwritten by the next
/// [`llc_eval`]; copy it out first. Null before the first successful
/// evaluation.
///
/// # Safety
/// `ctx` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llc_get_logits(ctx: *mut LlcContext) -> *const f32 {
    guard(std::ptr::null(), || {
        let Some(ctx) = (unsafe { ctx.as_ref() }) else {
            return std::ptr::null();
        };
        ctx.inner
            .logits()
            .map_or(std::ptr::null(), <[f32]>::as_ptr)
    })
}

//  Vocabulary

/// # Safety
/// `model` must be null or a live model.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llc_n_vocab(model: *const LlcModel) -> i32 {
    guard(0, || unsafe { model.as_ref() }.map_or(0, |m| m.inner.n_vocab()))
}

/// End-of-sequence token id, or -1 for a null model.
///
/// # Safety
/// `model` must be null or a live model.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llc_eos_token(model: *const LlcModel) -> i32 {
    guard(-1, || unsafe { model.as_ref() }.map_or(-1, |m| m.inner.token_eos()))
}

/// Write the text of `token` into `buf` and return the byte count.
///
/// The bytes may end mid code point and are not NUL-terminated. A piece
/// longer than `buf_size` is cut to fit and `buf_size` is returned, which
/// looks the same as an exact fit.
///
/// # Safety
/// `model` must be a live model and `buf` null or valid for `buf_size`
/// writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llc_token_to_piece(
    model: *const LlcModel,
    token: i32,
    buf: *mut c_char,
    buf_size: i32,
) -> i32 {
    guard(-1, || {
        let Some(model) = (unsafe { model.as_ref() }) else {
            set_last_error("llc_token_to_piece: model is null");
            return -1;
        };
        if buf.is_null() || buf_size <= 0 {
            return 0;
        }
        let buf = unsafe { std::slice::from_raw_parts_mut(buf as *mut u8, buf_size as usize) };
        llama_core::token_to_piece_into(&model.inner, token, buf)
    })
}

//  Diagnostics

/// Reason for the most recent failure on this thread, or null.
///
/// The caller owns the string and must release it with
/// [`llc_free_string`]. Fetching clears it.
#[unsafe(no_mangle)]
pub extern "C" fn llc_last_error() -> *mut c_char {
    take_last_error().map_or(std::ptr::null_mut(), CString::into_raw)
}

/// Free a string returned by [`llc_last_error`]. Null is a no-op.
///
/// # Safety
/// `s` must be null or a string from [`llc_last_error`] not yet freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn llc_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}

/// Send adapter and llama.cpp logs to stderr, filtered by `RUST_LOG`
/// (default `warn`). Later calls do nothing.
#[unsafe(no_mangle)]
pub extern "C" fn llc_log_init() {
    static INIT: Once = Once::new();
    guard((), || {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
                )
                .with_writer(std::io::stderr)
                .try_init();
            llama_core::bridge_engine_logs();
        });
    });
}
