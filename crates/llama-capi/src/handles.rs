//! Opaque handle types and the process-wide backend slot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use llama_core::{LlamaBackend, LlamaContext, LlamaError, LlamaModel};
use tracing::debug;

use crate::error::set_last_error;

/// Loaded model, opaque to C (`llc_model`).
pub struct LlcModel {
    pub(crate) inner: Arc<LlamaModel>,
}

/// Inference context, opaque to C (`llc_context`).
pub struct LlcContext {
    pub(crate) inner: LlamaContext,
}

static BACKEND: Mutex<Option<Arc<LlamaBackend>>> = Mutex::new(None);

fn slot() -> MutexGuard<'static, Option<Arc<LlamaBackend>>> {
    BACKEND.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn backend_init() {
    let mut slot = slot();
    if slot.is_some() {
        debug!("llc_backend_init: already initialized");
        return;
    }
    match LlamaBackend::init() {
        Ok(backend) => *slot = Some(backend),
        Err(e) => set_last_error(e.to_string()),
    }
}

/// Release the C side's hold on the backend. The engine itself shuts down
/// once the last model loaded through it is freed.
pub(crate) fn backend_free() {
    let released = slot().take();
    if released.is_none() {
        debug!("llc_backend_free: backend was not initialized");
    }
}

pub(crate) fn backend() -> Result<Arc<LlamaBackend>, LlamaError> {
    slot().clone().ok_or(LlamaError::BackendNotInitialized)
}
