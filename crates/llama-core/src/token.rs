//! Tokenization / detokenization.
//!
//! The `*_into` functions expose the engine's caller-sized buffer protocol
//! directly and are what the C surface forwards to. The allocating
//! variants run both phases for Rust callers.

use crate::error::{LlamaError, Result};
use crate::model::LlamaModel;

/// A vocabulary index.
pub type LlamaToken = llama_sys::llama_token;

/// Returned by [`tokenize_into`] when the engine cannot tokenize the text
/// (including overflow of the 32-bit count).
pub const TOKENIZE_ERROR: i32 = i32::MIN;

/// Two-phase tokenization against a caller-owned buffer.
///
/// * `out` is `None` or empty: nothing is written and the number of tokens
///   `text` would produce is returned (always `>= 0` unless the engine
///   fails).
/// * otherwise up to `out.len()` tokens are written and the count written is
///   returned. A negative result means failure; when the buffer was merely
///   too small it is the negated required size.
///
/// Callers that size `out` from the first phase never see truncation.
pub fn tokenize_into(
    model: &LlamaModel,
    text: &[u8],
    add_bos: bool,
    out: Option<&mut [LlamaToken]>,
) -> i32 {
    let Ok(text_len) = i32::try_from(text.len()) else {
        return TOKENIZE_ERROR;
    };
    let text_ptr = text.as_ptr() as *const std::ffi::c_char;

    match out {
        Some(buf) if !buf.is_empty() => {
            let max = i32::try_from(buf.len()).unwrap_or(i32::MAX);
            unsafe {
                llama_sys::llama_tokenize(
                    model.vocab(),
                    text_ptr,
                    text_len,
                    buf.as_mut_ptr(),
                    max,
                    add_bos,
                    false,
                )
            }
        }
        _ => {
            // With no room the engine reports the required size negated.
            let n = unsafe {
                llama_sys::llama_tokenize(
                    model.vocab(),
                    text_ptr,
                    text_len,
                    std::ptr::null_mut(),
                    0,
                    add_bos,
                    false,
                )
            };
            if n == TOKENIZE_ERROR { n } else { n.abs() }
        }
    }
}

/// Tokenize `text` using the model's vocabulary.
pub fn tokenize(model: &LlamaModel, text: &str, add_bos: bool) -> Result<Vec<LlamaToken>> {
    let needed = tokenize_into(model, text.as_bytes(), add_bos, None);
    if needed < 0 {
        return Err(LlamaError::TokenizationFailed(format!(
            "size query returned {needed}"
        )));
    }
    if needed == 0 {
        return Ok(Vec::new());
    }

    let mut tokens = vec![0; needed as usize];
    let written = tokenize_into(model, text.as_bytes(), add_bos, Some(&mut tokens));
    if written < 0 {
        return Err(LlamaError::TokenizationFailed(format!(
            "llama_tokenize returned {written}"
        )));
    }

    tokens.truncate(written as usize);
    Ok(tokens)
}

/// Render `token` into a caller-owned buffer.
///
/// Returns the number of bytes written. When `buf` is too small the piece is
/// cut to fit and `buf.len()` is returned, so a truncated piece is
/// indistinguishable from one that fits exactly. No NUL terminator is
/// added. A negative value is an engine failure.
pub fn token_to_piece_into(model: &LlamaModel, token: LlamaToken, buf: &mut [u8]) -> i32 {
    let len = i32::try_from(buf.len()).unwrap_or(i32::MAX);
    let n = raw_piece(model, token, buf.as_mut_ptr(), len);
    if n >= 0 || n == i32::MIN {
        return n;
    }

    let mut full = vec![0u8; n.unsigned_abs() as usize];
    let m = raw_piece(model, token, full.as_mut_ptr(), full.len() as i32);
    if m < 0 {
        return m;
    }
    let fit = (m as usize).min(buf.len());
    buf[..fit].copy_from_slice(&full[..fit]);
    fit as i32
}

/// Raw bytes of one token, which may be part of a multi-token code point.
pub fn token_to_bytes(model: &LlamaModel, token: LlamaToken) -> Vec<u8> {
    let mut buf = vec![0u8; 32];
    let len = raw_piece(model, token, buf.as_mut_ptr(), buf.len() as i32);

    if len < 0 {
        // Buffer too small; retry at the reported size.
        buf.resize(len.unsigned_abs() as usize, 0);
        let len = raw_piece(model, token, buf.as_mut_ptr(), buf.len() as i32);
        buf.truncate(len.max(0) as usize);
    } else {
        buf.truncate(len as usize);
    }
    buf
}

/// Convert a single token id to its text piece.
pub fn token_to_piece(model: &LlamaModel, token: LlamaToken) -> String {
    String::from_utf8_lossy(&token_to_bytes(model, token)).into_owned()
}

/// Detokenize a token sequence by concatenating its pieces.
pub fn detokenize(model: &LlamaModel, tokens: &[LlamaToken]) -> String {
    let bytes: Vec<u8> = tokens
        .iter()
        .flat_map(|&t| token_to_bytes(model, t))
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn raw_piece(model: &LlamaModel, token: LlamaToken, buf: *mut u8, len: i32) -> i32 {
    unsafe {
        llama_sys::llama_token_to_piece(
            model.vocab(),
            token,
            buf as *mut std::ffi::c_char,
            len,
            0,     // lstrip
            false, // special
        )
    }
}
