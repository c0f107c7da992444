//! TOML configuration file loading
//!
//! Supports `~/.config/echo-bridge/config.toml` as a persistent config source.
//! All fields are optional — the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct EchoConfigFile {
    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Fuzzy matching configuration
    #[serde(default)]
    pub matching: MatchingFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Recording window per utterance, in seconds
    pub capture_secs: Option<f64>,

    /// Target sample rate for clips
    pub sample_rate: Option<u32>,

    /// STT provider ("gemini" or "whisper")
    pub stt_provider: Option<String>,

    /// STT model (e.g. "gemini-2.0-flash", "whisper-1")
    pub stt_model: Option<String>,

    /// Instruction hint sent with every clip
    pub stt_hint: Option<String>,

    /// Override for the STT endpoint base URL
    pub stt_base_url: Option<String>,

    /// Transcription request timeout, in seconds
    pub stt_timeout_secs: Option<u64>,

    /// TTS provider ("openai", "elevenlabs" or "console")
    pub tts_provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,

    /// Speech synthesis request timeout, in seconds
    pub tts_timeout_secs: Option<u64>,

    /// Longest a single utterance may take before it is abandoned, in seconds
    pub utterance_limit_secs: Option<u64>,

    /// Consecutive failed utterances before apologies go quiet
    pub max_consecutive_apologies: Option<u32>,
}

/// Fuzzy matching configuration
#[derive(Debug, Default, Deserialize)]
pub struct MatchingFileConfig {
    /// Minimum similarity in `[0, 1]`
    pub threshold: Option<f64>,

    /// Queries shorter than this are rejected
    pub min_query_len: Option<usize>,

    /// Fold spellings that sound alike before scoring
    pub phonetic: Option<bool>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub gemini: Option<String>,
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `EchoConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> EchoConfigFile {
    config_file_path().map_or_else(EchoConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Missing or malformed files fall back to defaults.
pub fn load_config_from(path: &Path) -> EchoConfigFile {
    if !path.exists() {
        return EchoConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                EchoConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            EchoConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/echo-bridge/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("echo-bridge").join("config.toml"))
}
