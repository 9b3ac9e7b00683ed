//! Engine configuration persisted as JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::ContextParams;
use crate::error::{LlamaError, Result};
use crate::model::ModelParams;
use crate::sampler::SamplingParams;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "LLAMA_CAPI_CONFIG";
/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "llama-capi.json";

/// Everything needed to open a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// GGUF weights file.
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    /// Layers offloaded to the GPU (0 = CPU only, -1 = all).
    #[serde(default = "default_gpu_layers")]
    pub n_gpu_layers: i32,
    /// Position window (0 = model's training length).
    #[serde(default = "default_ctx_size")]
    pub ctx_size: u32,
    #[serde(default = "default_threads")]
    pub threads: i32,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
    #[serde(default)]
    pub stop_words: Vec<String>,
    #[serde(default)]
    pub sampling: SamplingParams,
}

fn default_gpu_layers() -> i32 {
    35
}
fn default_ctx_size() -> u32 {
    4096
}
fn default_threads() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1) as i32)
        .unwrap_or(1)
}
fn default_max_new_tokens() -> u32 {
    128
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            n_gpu_layers: default_gpu_layers(),
            ctx_size: default_ctx_size(),
            threads: default_threads(),
            max_new_tokens: default_max_new_tokens(),
            stop_words: Vec::new(),
            sampling: SamplingParams::default(),
        }
    }
}

impl EngineConfig {
    /// Load the first config found among `explicit`, `$LLAMA_CAPI_CONFIG`
    /// and `./llama-capi.json`; defaults when none exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::load_first(candidates(explicit, env_path, PathBuf::from(DEFAULT_CONFIG_FILE)))
    }

    /// Parse the first existing file in `paths`, or return defaults.
    fn load_first(paths: impl IntoIterator<Item = PathBuf>) -> Result<Self> {
        for path in paths {
            if path.is_file() {
                return Self::from_file(&path);
            }
        }
        debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Parse one config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|source| LlamaError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&data).map_err(|source| LlamaError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Persist as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let io_err = |source| LlamaError::ConfigIo {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| LlamaError::Other(format!("serialize config: {e}")))?;
        std::fs::write(path, data).map_err(io_err)
    }

    pub fn model_params(&self) -> ModelParams {
        ModelParams::with_gpu_layers(self.n_gpu_layers)
    }

    pub fn context_params(&self) -> ContextParams {
        ContextParams::new(self.ctx_size, self.threads)
    }
}

/// Lookup order: explicit path, then the environment, then the working
/// directory.
fn candidates(explicit: Option<&Path>, env: Option<PathBuf>, cwd_file: PathBuf) -> Vec<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .into_iter()
        .chain(env)
        .chain(std::iter::once(cwd_file))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.n_gpu_layers, 35);
        assert_eq!(cfg.ctx_size, 4096);
        assert_eq!(cfg.max_new_tokens, 128);
        assert!(cfg.threads >= 1);
    }

    #[test]
    fn save_then_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/engine.json");
        let cfg = EngineConfig {
            model_path: Some(PathBuf::from("/models/tiny.gguf")),
            n_gpu_layers: 0,
            ctx_size: 512,
            threads: 4,
            sampling: SamplingParams {
                top_k: 40,
                seed: Some(1),
                ..SamplingParams::default()
            },
            ..EngineConfig::default()
        };
        cfg.save(&path).unwrap();

        let loaded = EngineConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = EngineConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, LlamaError::ConfigParse { .. }));
    }

    fn write_config(dir: &Path, name: &str, max_new_tokens: u32) -> PathBuf {
        let path = dir.join(name);
        let cfg = EngineConfig {
            max_new_tokens,
            ..EngineConfig::default()
        };
        cfg.save(&path).unwrap();
        path
    }

    #[test]
    fn search_order_is_explicit_env_cwd() {
        let explicit = PathBuf::from("a.json");
        let env = PathBuf::from("b.json");
        let cwd = PathBuf::from(DEFAULT_CONFIG_FILE);
        assert_eq!(
            candidates(Some(&explicit), Some(env.clone()), cwd.clone()),
            vec![explicit, env.clone(), cwd.clone()]
        );
        assert_eq!(candidates(None, Some(env.clone()), cwd.clone()), vec![env, cwd.clone()]);
        assert_eq!(candidates(None, None, cwd.clone()), vec![cwd]);
    }

    #[test]
    fn explicit_path_beats_environment() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = write_config(dir.path(), "explicit.json", 1);
        let env = write_config(dir.path(), "env.json", 2);
        let cwd = write_config(dir.path(), DEFAULT_CONFIG_FILE, 3);

        let cfg = EngineConfig::load_first(candidates(Some(&explicit), Some(env), cwd)).unwrap();
        assert_eq!(cfg.max_new_tokens, 1);
    }

    #[test]
    fn environment_beats_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let env = write_config(dir.path(), "env.json", 2);
        let cwd = write_config(dir.path(), DEFAULT_CONFIG_FILE, 3);

        let cfg = EngineConfig::load_first(candidates(None, Some(env), cwd)).unwrap();
        assert_eq!(cfg.max_new_tokens, 2);
    }

    #[test]
    fn missing_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone.json");
        let cwd = write_config(dir.path(), DEFAULT_CONFIG_FILE, 3);

        let paths = candidates(Some(&gone), Some(gone.clone()), cwd);
        let cfg = EngineConfig::load_first(paths).unwrap();
        assert_eq!(cfg.max_new_tokens, 3);
    }

    #[test]
    fn no_file_anywhere_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig::load_first(candidates(
            None,
            Some(dir.path().join("env.json")),
            dir.path().join(DEFAULT_CONFIG_FILE),
        ))
        .unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn params_follow_config() {
        let cfg = EngineConfig {
            n_gpu_layers: 0,
            ctx_size: 512,
            threads: 3,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.model_params().n_gpu_layers, 0);
        let cp = cfg.context_params();
        assert_eq!(cp.n_ctx, 512);
        assert_eq!(cp.n_threads, 3);
        assert_eq!(cp.n_threads_batch, 3);
    }
}
