//! Process-wide llama.cpp backend lifecycle and system queries.

use std::ffi::CStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{debug, info};

use crate::error::{LlamaError, Result};

const UNINIT: u8 = 0;
const LIVE: u8 = 1;
const FREED: u8 = 2;

static STATE: AtomicU8 = AtomicU8::new(UNINIT);

/// Handle to the initialized llama.cpp backend.
///
/// There is at most one per process. [`LlamaBackend::init`] moves the
/// backend from uninitialized to live; dropping the last `Arc` frees it.
/// Every [`LlamaModel`](crate::LlamaModel) holds a clone, so the engine is
/// torn down only after all models and contexts are gone. A freed backend
/// cannot be initialized again.
pub struct LlamaBackend {
    _private: (),
}

impl LlamaBackend {
    /// Initialize the llama.cpp backend.
    pub fn init() -> Result<Arc<Self>> {
        match STATE.compare_exchange(UNINIT, LIVE, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                unsafe {
                    llama_sys::llama_backend_init();
                }
                info!("llama.cpp backend initialized");
                Ok(Arc::new(Self { _private: () }))
            }
            Err(LIVE) => Err(LlamaError::BackendAlreadyInitialized),
            Err(_) => Err(LlamaError::BackendReleased),
        }
    }

    /// `true` while a backend handle is alive somewhere in the process.
    pub fn is_live() -> bool {
        STATE.load(Ordering::Acquire) == LIVE
    }

    /// Route llama.cpp's own log output into `tracing`.
    ///
    /// Messages land under the `llama.cpp` target, so they can be filtered
    /// independently, e.g. `RUST_LOG=llama.cpp=warn`.
    pub fn set_log_callback(&self) {
        bridge_engine_logs();
        debug!("llama.cpp log callback installed");
    }

    /// Human-readable description of the compiled-in compute features.
    pub fn system_info(&self) -> String {
        unsafe {
            CStr::from_ptr(llama_sys::llama_print_system_info())
                .to_string_lossy()
                .into_owned()
        }
    }
}

impl Drop for LlamaBackend {
    fn drop(&mut self) {
        unsafe {
            llama_sys::llama_backend_free();
        }
        STATE.store(FREED, Ordering::Release);
        info!("llama.cpp backend freed");
    }
}

/// Install the llama.cpp → `tracing` log bridge.
///
/// Safe to call before the backend is initialized; later calls replace the
/// earlier callback with an identical one.
pub fn bridge_engine_logs() {
    unsafe extern "C" fn cb(
        level: llama_sys::ggml_log_level,
        text: *const std::ffi::c_char,
        _user_data: *mut std::ffi::c_void,
    ) {
        if text.is_null() {
            return;
        }
        let msg = unsafe { CStr::from_ptr(text) }.to_string_lossy();
        let msg = msg.trim();
        if msg.is_empty() {
            return;
        }
        // ggml_log_level: DEBUG=1, INFO=2, WARN=3, ERROR=4, CONT=5
        match level {
            4 => tracing::error!(target: "llama.cpp", "{msg}"),
            3 => tracing::warn!(target: "llama.cpp", "{msg}"),
            2 => tracing::info!(target: "llama.cpp", "{msg}"),
            _ => tracing::debug!(target: "llama.cpp", "{msg}"),
        }
    }

    unsafe {
        llama_sys::llama_log_set(Some(cb), std::ptr::null_mut());
    }
}
