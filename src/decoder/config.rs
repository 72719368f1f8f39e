use std::fs;
use std::path::Path;

use num_cpus::get_physical;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "CTC_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub n_threads: usize,
    /// Longest encoder output the arena is reserved for.
    pub max_frames: usize,
    /// Explicit arena size; skips worst-case reservation when set.
    pub arena_bytes: Option<usize>,
    pub frame_shift_sec: f32,
    pub prefer_accelerator: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            n_threads: get_physical(),
            max_frames: 3000,
            arena_bytes: None,
            frame_shift_sec: 0.06,
            prefer_accelerator: false,
        }
    }
}

impl DecoderConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides(ENV_PREFIX);
        config
    }

    /// Reads a JSON file, then lets `CTC_*` variables override it.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        let mut config: Self = serde_json::from_str(&content)?;
        config.apply_env_overrides(ENV_PREFIX);
        Ok(config)
    }

    fn apply_env_overrides(&mut self, prefix: &str) {
        let read = |suffix: &str| {
            let key = format!("{prefix}{suffix}");
            std::env::var(&key).ok().map(|value| (key, value))
        };
        fn parsed<T: std::str::FromStr>((key, value): (String, String)) -> Option<T> {
            let parsed = value.trim().parse().ok();
            if parsed.is_none() {
                log::warn!("Ignoring invalid {key}={value:?}");
            }
            parsed
        }

        if let Some(v) = read("THREADS").and_then(parsed::<usize>) {
            self.n_threads = v.max(1);
        }
        if let Some(v) = read("MAX_FRAMES").and_then(parsed::<usize>) {
            self.max_frames = v.max(1);
        }
        if let Some(v) = read("ARENA_BYTES").and_then(parsed::<usize>) {
            self.arena_bytes = Some(v);
        }
        if let Some(v) = read("FRAME_SHIFT_SEC").and_then(parsed::<f32>) {
            self.frame_shift_sec = v;
        }
        if let Some(v) = read("PREFER_ACCELERATOR").and_then(parsed::<bool>) {
            self.prefer_accelerator = v;
        }
    }
}
