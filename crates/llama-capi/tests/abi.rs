//! Calls the exported symbols the way a C host would.
//!
//! Scenarios that need weights read `LLAMA_TEST_MODEL`; the null-handle
//! checks run unconditionally.

use std::ffi::{CStr, CString};
use std::ptr;

use llama_capi::*;

fn take_error() -> Option<String> {
    let p = llc_last_error();
    if p.is_null() {
        return None;
    }
    let msg = unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned();
    unsafe { llc_free_string(p) };
    Some(msg)
}

#[test]
fn freeing_null_handles_is_a_no_op() {
    unsafe {
        llc_free_model(ptr::null_mut());
        llc_free_context(ptr::null_mut());
        llc_free_string(ptr::null_mut());
    }
}

#[test]
fn null_handles_yield_failure_signals() {
    let text = CString::new("hello").unwrap();
    unsafe {
        assert!(llc_new_context(ptr::null_mut(), 512, 4).is_null());
        assert!(take_error().unwrap().contains("model is null"));

        assert_eq!(
            llc_tokenize(ptr::null_mut(), text.as_ptr(), true, ptr::null_mut(), 0),
            i32::MIN
        );
        assert_ne!(llc_eval(ptr::null_mut(), ptr::null(), 0, 0, 4), 0);
        assert!(llc_get_logits(ptr::null_mut()).is_null());
        assert_eq!(llc_n_vocab(ptr::null()), 0);
        assert_eq!(llc_eos_token(ptr::null()), -1);
        assert!(llc_load_model(ptr::null(), 0).is_null());
    }
}

#[test]
fn log_init_is_idempotent() {
    llc_log_init();
    llc_log_init();
}

/// Full C-style flow against a real model; runs only with `LLAMA_TEST_MODEL`.
#[test]
fn hello_world_through_the_abi() {
    let Some(path) = std::env::var_os("LLAMA_TEST_MODEL") else {
        eprintln!("LLAMA_TEST_MODEL not set, skipping");
        return;
    };
    let path = CString::new(path.to_string_lossy().as_bytes()).unwrap();
    let text = CString::new("hello world").unwrap();

    unsafe {
        llc_backend_init();
        // A second init while live changes nothing.
        llc_backend_init();

        let model = llc_load_model(path.as_ptr(), 0);
        assert!(!model.is_null(), "{:?}", take_error());
        let ctx = llc_new_context(model, 512, 4);
        assert!(!ctx.is_null(), "{:?}", take_error());

        // Phase one: size query, with and without a buffer.
        let n = llc_tokenize(model, text.as_ptr(), true, ptr::null_mut(), 0);
        assert!(n >= 2, "required {n}");
        let mut sentinel = [-7i32; 4];
        assert_eq!(llc_tokenize(model, text.as_ptr(), true, sentinel.as_mut_ptr(), 0), n);
        assert_eq!(sentinel, [-7; 4]);

        // Phase two: exact fill.
        let mut tokens = vec![0i32; n as usize];
        assert_eq!(llc_tokenize(model, text.as_ptr(), true, tokens.as_mut_ptr(), n), n);

        assert!(llc_get_logits(ctx).is_null());
        assert_eq!(llc_eval(ctx, tokens.as_ptr(), n, 0, 4), 0);

        let n_vocab = llc_n_vocab(model);
        assert!(n_vocab > 0);
        let logits = llc_get_logits(ctx);
        assert!(!logits.is_null());
        let logits = std::slice::from_raw_parts(logits, n_vocab as usize);
        assert!(logits.iter().all(|l| !l.is_nan()));

        let eos = llc_eos_token(model);
        assert_eq!(eos, llc_eos_token(model));

        // Pieces of the non-BOS tokens spell the text back.
        let mut rebuilt = Vec::new();
        let mut buf = [0 as std::ffi::c_char; 64];
        for &t in &tokens[1..] {
            let len = llc_token_to_piece(model, t, buf.as_mut_ptr(), buf.len() as i32);
            assert!(len >= 0);
            rebuilt.extend(buf[..len as usize].iter().map(|&b| b as u8));
        }
        let rebuilt = String::from_utf8_lossy(&rebuilt);
        assert!(rebuilt.contains("hello"), "{rebuilt:?}");

        // Window overflow is reported, not attempted.
        assert_ne!(llc_eval(ctx, tokens.as_ptr(), n, 512, 4), 0);
        assert!(take_error().unwrap().contains("exceeds context window"));

        llc_free_context(ctx);
        llc_free_model(model);
        llc_backend_free();
    }
}
