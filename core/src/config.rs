use std::path::PathBuf;
use std::time::Duration;

use crate::flags::CORS_ORIGIN;
use crate::flags::DISCONNECT_GRACE_SEC;
use crate::flags::IDLE_TIMEOUT_SEC;
use crate::flags::KV_BACKEND;
use crate::flags::KV_DATA_DIR;
use crate::flags::KV_REGION;
use crate::flags::LM_API_BASE;
use crate::flags::LM_API_KEY;
use crate::flags::LM_MODEL_NAME;
use crate::flags::PORT;
use crate::flags::SUMMARY_INTERVAL_SEC;
use crate::flags::TEMP_DIR;

/// Runtime configuration for the engine and server.
///
/// Production builds this from the environment via [`Config::from_env`];
/// tests construct it directly to shrink timers.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub kv_backend: KvBackend,
    /// Opaque location hint for the KV adapter; unused by the built-in
    /// backends but carried for external ones.
    pub kv_region: Option<String>,
    pub cors_origin: Option<String>,
    /// Scratch directory for the code executor.
    pub temp_dir: PathBuf,
    pub idle_timeout: Duration,
    pub summary_interval: Duration,
    pub disconnect_grace: Duration,
    pub evaluator: EvaluatorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvBackend {
    /// In-process only; documents die with the process.
    Memory,
    /// Write-through JSON document per session code.
    File { dir: PathBuf },
}

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl Config {
    pub fn from_env() -> Self {
        let kv_backend = match *KV_BACKEND {
            "file" => KvBackend::File {
                dir: PathBuf::from(*KV_DATA_DIR),
            },
            _ => KvBackend::Memory,
        };
        Self {
            port: *PORT,
            kv_backend,
            kv_region: KV_REGION.map(str::to_string),
            cors_origin: CORS_ORIGIN.map(str::to_string),
            temp_dir: TEMP_DIR
                .map(PathBuf::from)
                .unwrap_or_else(default_temp_dir),
            idle_timeout: Duration::from_secs(*IDLE_TIMEOUT_SEC),
            summary_interval: Duration::from_secs(*SUMMARY_INTERVAL_SEC),
            disconnect_grace: Duration::from_secs(*DISCONNECT_GRACE_SEC),
            evaluator: EvaluatorConfig {
                api_base: LM_API_BASE.to_string(),
                api_key: LM_API_KEY.map(str::to_string),
                model: LM_MODEL_NAME.to_string(),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8787,
            kv_backend: KvBackend::Memory,
            kv_region: None,
            cors_origin: None,
            temp_dir: default_temp_dir(),
            idle_timeout: Duration::from_secs(1800),
            summary_interval: Duration::from_secs(30),
            disconnect_grace: Duration::from_secs(300),
            evaluator: EvaluatorConfig {
                api_base: "https://api.openai.com/v1".to_string(),
                api_key: None,
                model: "gpt-4o-mini".to_string(),
            },
        }
    }
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir().join("classdeck")
}
