//! Safe RAII wrapper around `llama_model`.

use std::ffi::CString;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::LlamaBackend;
use crate::error::{LlamaError, Result};
use crate::token::LlamaToken;

/// Owns a `llama_model` pointer and frees it on drop.
///
/// Holds the backend handle so the engine outlives every loaded model.
pub struct LlamaModel {
    ptr: *mut llama_sys::llama_model,
    _backend: Arc<LlamaBackend>,
}

// Safety: llama_model is internally read-only after creation.
unsafe impl Send for LlamaModel {}
unsafe impl Sync for LlamaModel {}

impl LlamaModel {
    /// Load a GGUF model from `path`.
    ///
    /// Every engine-side failure (missing file, corrupt or unsupported
    /// weights, out of memory) surfaces as the same
    /// [`LlamaError::ModelLoadFailed`].
    pub fn load_from_file(
        backend: &Arc<LlamaBackend>,
        path: &Path,
        params: &ModelParams,
    ) -> Result<Self> {
        let path_str = path.to_str().ok_or_else(|| LlamaError::ModelLoadFailed {
            path: path.display().to_string(),
            reason: "Invalid UTF-8 in path".into(),
        })?;
        let c_path = CString::new(path_str).map_err(|_| LlamaError::ModelLoadFailed {
            path: path_str.into(),
            reason: "Path contains null byte".into(),
        })?;

        let mut raw = unsafe { llama_sys::llama_model_default_params() };
        raw.n_gpu_layers = params.n_gpu_layers;
        raw.use_mmap = params.use_mmap;
        raw.use_mlock = params.use_mlock;

        info!(path = %path.display(), n_gpu_layers = params.n_gpu_layers, "Loading model…");
        let model = unsafe { llama_sys::llama_model_load_from_file(c_path.as_ptr(), raw) };

        if model.is_null() {
            return Err(LlamaError::ModelLoadFailed {
                path: path_str.into(),
                reason: "llama_model_load_from_file returned null".into(),
            });
        }

        let model = Self {
            ptr: model,
            _backend: Arc::clone(backend),
        };
        info!(
            path = %path.display(),
            desc = %model.desc(),
            n_params = model.n_params(),
            n_vocab = model.n_vocab(),
            "Model loaded"
        );
        Ok(model)
    }

    //  Accessors

    pub(crate) fn as_ptr(&self) -> *mut llama_sys::llama_model {
        self.ptr
    }

    /// Vocabulary handle (valid for the lifetime of the model).
    pub(crate) fn vocab(&self) -> *const llama_sys::llama_vocab {
        unsafe { llama_sys::llama_model_get_vocab(self.ptr) }
    }

    pub fn n_params(&self) -> u64 {
        unsafe { llama_sys::llama_model_n_params(self.ptr) }
    }

    pub fn desc(&self) -> String {
        let mut buf = vec![0u8; 256];
        let len = unsafe {
            llama_sys::llama_model_desc(
                self.ptr,
                buf.as_mut_ptr() as *mut std::ffi::c_char,
                buf.len(),
            )
        };
        if len > 0 {
            buf.truncate((len as usize).min(buf.len()));
            String::from_utf8_lossy(&buf).into_owned()
        } else {
            String::new()
        }
    }

    /// Context length the model was trained with.
    pub fn n_ctx_train(&self) -> i32 {
        unsafe { llama_sys::llama_model_n_ctx_train(self.ptr) }
    }

    //  Vocabulary

    /// Number of entries in the vocabulary; also the length of every
    /// logits row.
    pub fn n_vocab(&self) -> i32 {
        unsafe { llama_sys::llama_vocab_n_tokens(self.vocab()) }
    }

    pub fn token_bos(&self) -> LlamaToken {
        unsafe { llama_sys::llama_vocab_bos(self.vocab()) }
    }

    /// End-of-sequence token; generation stops when it is sampled.
    pub fn token_eos(&self) -> LlamaToken {
        unsafe { llama_sys::llama_vocab_eos(self.vocab()) }
    }

    /// End-of-turn token, or `-1` when the vocabulary has none.
    pub fn token_eot(&self) -> LlamaToken {
        unsafe { llama_sys::llama_vocab_eot(self.vocab()) }
    }
}

impl Drop for LlamaModel {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            debug!("Freeing llama model");
            unsafe { llama_sys::llama_model_free(self.ptr) }
        }
    }
}

//  ModelParams

/// Parameters for [`LlamaModel::load_from_file`].
#[derive(Debug, Clone)]
pub struct ModelParams {
    /// Layers to offload to GPU. 0 = CPU only, -1 = all.
    pub n_gpu_layers: i32,
    /// Use memory-mapped I/O.
    pub use_mmap: bool,
    /// Lock model memory (prevent swapping).
    pub use_mlock: bool,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            n_gpu_layers: -1,
            use_mmap: true,
            use_mlock: false,
        }
    }
}

impl ModelParams {
    /// Defaults with an explicit offload depth.
    pub fn with_gpu_layers(n_gpu_layers: i32) -> Self {
        Self {
            n_gpu_layers,
            ..Self::default()
        }
    }
}
