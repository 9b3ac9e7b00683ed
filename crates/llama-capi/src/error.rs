use std::any::Any;
use std::cell::RefCell;
use std::ffi::CString;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{error, warn};

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Store an error message for later retrieval via `llc_last_error`.
pub fn set_last_error(msg: impl Into<String>) {
    let msg = msg.into();
    warn!(target: "llama_capi", "{msg}");
    // Interior NULs would truncate the C string; drop them instead.
    let bytes: Vec<u8> = msg.into_bytes().into_iter().filter(|&b| b != 0).collect();
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(bytes).ok();
    });
}

/// Take the last error message, leaving `None` in its place.
pub fn take_last_error() -> Option<CString> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

/// Run `f`, turning a panic into `on_panic` so no unwind crosses the ABI.
pub fn guard<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(v) => v,
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!(target: "llama_capi", "panic at FFI boundary: {msg}");
            set_last_error(format!("internal panic: {msg}"));
            on_panic
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_error_is_taken_once() {
        set_last_error("model not found");
        assert_eq!(take_last_error().unwrap().to_str().unwrap(), "model not found");
        assert!(take_last_error().is_none());
    }

    #[test]
    fn interior_nul_is_stripped() {
        set_last_error("bad\0path");
        assert_eq!(take_last_error().unwrap().to_str().unwrap(), "badpath");
    }

    #[test]
    fn guard_converts_panics() {
        let out = guard(-1, || -> i32 { panic!("boom") });
        assert_eq!(out, -1);
        let msg = take_last_error().unwrap();
        assert!(msg.to_str().unwrap().contains("boom"));
    }

    #[test]
    fn guard_passes_values_through() {
        assert_eq!(guard(-1, || 7), 7);
    }
}
