//! Configuration management for the voice command engine

pub mod file;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::{Error, Result};

/// Default recording window per utterance
const DEFAULT_CAPTURE_SECS: f64 = 4.0;

/// Default transcription timeout
const DEFAULT_STT_TIMEOUT_SECS: u64 = 15;

/// Default hint sent to the transcription service
pub const DEFAULT_STT_HINT: &str = "Transcribe this voice command accurately. The speaker has an \
    Indian English accent and is navigating a mobile app.";

/// Engine configuration
#[derive(Debug, Default)]
pub struct Config {
    /// Voice capture, transcription and speech settings
    pub voice: VoiceConfig,

    /// Fuzzy matching settings
    pub matching: MatchingConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Speech-to-text backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SttProvider {
    /// Google Gemini `generateContent` with inline audio
    #[default]
    Gemini,
    /// `OpenAI` Whisper transcription endpoint
    Whisper,
}

impl FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "whisper" | "openai" => Ok(Self::Whisper),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

impl fmt::Display for SttProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::Whisper => write!(f, "whisper"),
        }
    }
}

/// Text-to-speech backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsProvider {
    /// `OpenAI` speech endpoint
    #[default]
    OpenAi,
    /// `ElevenLabs` speech endpoint
    ElevenLabs,
    /// Print utterances to stdout (headless)
    Console,
}

impl FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "elevenlabs" => Ok(Self::ElevenLabs),
            "console" | "none" => Ok(Self::Console),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Fixed recording window per utterance
    pub capture_window: Duration,

    /// Sample rate of encoded clips
    pub sample_rate: u32,

    /// STT backend
    pub stt_provider: SttProvider,

    /// STT model identifier
    pub stt_model: String,

    /// Accent/domain hint sent alongside each clip
    pub stt_hint: String,

    /// Override for the STT endpoint base URL
    pub stt_base_url: Option<String>,

    /// Upper bound on one transcription round-trip
    pub stt_timeout: Duration,

    /// TTS backend
    pub tts_provider: TtsProvider,

    /// TTS model identifier
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// Upper bound on one synthesis request
    pub tts_timeout: Duration,

    /// Upper bound on one utterance, synthesis and playback together
    pub utterance_limit: Duration,

    /// Consecutive failed utterances after which apologies stop
    pub max_consecutive_apologies: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            capture_window: Duration::from_secs_f64(DEFAULT_CAPTURE_SECS),
            sample_rate: crate::voice::SAMPLE_RATE,
            stt_provider: SttProvider::Gemini,
            stt_model: "gemini-2.0-flash".to_string(),
            stt_hint: DEFAULT_STT_HINT.to_string(),
            stt_base_url: None,
            stt_timeout: Duration::from_secs(DEFAULT_STT_TIMEOUT_SECS),
            tts_provider: TtsProvider::OpenAi,
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
            tts_timeout: crate::voice::DEFAULT_TTS_TIMEOUT,
            utterance_limit: crate::voice::DEFAULT_UTTERANCE_LIMIT,
            max_consecutive_apologies: 3,
        }
    }
}

/// Fuzzy matching configuration
#[derive(Debug, Clone, Copy)]
pub struct MatchingConfig {
    /// Minimum similarity in `[0, 1]` for an entity to match
    pub threshold: f64,

    /// Queries shorter than this many characters are rejected
    pub min_query_len: usize,

    /// Fold alike-sounding spellings before scoring
    pub phonetic: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            min_query_len: 3,
            phonetic: true,
        }
    }
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    /// Google Gemini API key (transcription)
    pub gemini: Option<SecretString>,

    /// `OpenAI` API key (Whisper and TTS)
    pub openai: Option<SecretString>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<SecretString>,
}

impl Config {
    /// Load configuration from the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if a provider name or number cannot be parsed
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// Precedence is env > file > default.
    ///
    /// # Errors
    ///
    /// Returns error if a provider name or number cannot be parsed
    pub fn from_sources<F>(fc: file::EchoConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = VoiceConfig::default();

        let api_keys = ApiKeys {
            gemini: env("GEMINI_API_KEY")
                .or_else(|| env("EXPO_PUBLIC_GEMINI_API_KEY"))
                .or(fc.api_keys.gemini)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
            openai: env("OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
            elevenlabs: env("ELEVENLABS_API_KEY")
                .or(fc.api_keys.elevenlabs)
                .filter(|k| !k.is_empty())
                .map(SecretString::from),
        };

        let capture_secs = match env("ECHO_CAPTURE_SECS") {
            Some(s) => Some(parse_number::<f64>("ECHO_CAPTURE_SECS", &s)?),
            None => fc.voice.capture_secs,
        };
        let capture_window = match capture_secs {
            Some(secs) if secs > 0.0 && secs.is_finite() => Duration::from_secs_f64(secs),
            Some(secs) => {
                return Err(Error::Config(format!(
                    "capture window must be positive, got {secs}"
                )));
            }
            None => defaults.capture_window,
        };

        let stt_provider = env("ECHO_STT_PROVIDER")
            .or(fc.voice.stt_provider)
            .map(|s| s.parse::<SttProvider>())
            .transpose()?
            .unwrap_or_default();

        // Each provider has its own sensible model default
        let stt_model = env("ECHO_STT_MODEL")
            .or(fc.voice.stt_model)
            .unwrap_or_else(|| match stt_provider {
                SttProvider::Gemini => defaults.stt_model.clone(),
                SttProvider::Whisper => "whisper-1".to_string(),
            });

        let stt_timeout = match env("ECHO_STT_TIMEOUT_SECS") {
            Some(s) => Duration::from_secs(parse_number::<u64>("ECHO_STT_TIMEOUT_SECS", &s)?),
            None => fc
                .voice
                .stt_timeout_secs
                .map_or(defaults.stt_timeout, Duration::from_secs),
        };

        let tts_provider = env("ECHO_TTS_PROVIDER")
            .or(fc.voice.tts_provider)
            .map(|s| s.parse::<TtsProvider>())
            .transpose()?
            .unwrap_or_default();

        let tts_timeout = match env("ECHO_TTS_TIMEOUT_SECS") {
            Some(s) => Duration::from_secs(parse_number::<u64>("ECHO_TTS_TIMEOUT_SECS", &s)?),
            None => fc
                .voice
                .tts_timeout_secs
                .map_or(defaults.tts_timeout, Duration::from_secs),
        };

        // A single utterance can never be cut off before its synthesis deadline
        let utterance_limit = fc
            .voice
            .utterance_limit_secs
            .map_or(defaults.utterance_limit, Duration::from_secs)
            .max(tts_timeout);

        let voice = VoiceConfig {
            capture_window,
            sample_rate: fc.voice.sample_rate.unwrap_or(defaults.sample_rate),
            stt_provider,
            stt_model,
            stt_hint: fc.voice.stt_hint.unwrap_or(defaults.stt_hint),
            stt_base_url: env("ECHO_STT_BASE_URL").or(fc.voice.stt_base_url),
            stt_timeout,
            tts_provider,
            tts_model: fc.voice.tts_model.unwrap_or(defaults.tts_model),
            tts_voice: fc.voice.tts_voice.unwrap_or(defaults.tts_voice),
            tts_speed: fc.voice.tts_speed.unwrap_or(defaults.tts_speed).clamp(0.25, 4.0),
            tts_timeout,
            utterance_limit,
            max_consecutive_apologies: fc
                .voice
                .max_consecutive_apologies
                .unwrap_or(defaults.max_consecutive_apologies),
        };

        let match_defaults = MatchingConfig::default();
        let threshold = match env("ECHO_MATCH_THRESHOLD") {
            Some(s) => parse_number::<f64>("ECHO_MATCH_THRESHOLD", &s)?,
            None => fc.matching.threshold.unwrap_or(match_defaults.threshold),
        };
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Config(format!(
                "match threshold must be within [0, 1], got {threshold}"
            )));
        }

        let matching = MatchingConfig {
            threshold,
            min_query_len: fc
                .matching
                .min_query_len
                .unwrap_or(match_defaults.min_query_len),
            phonetic: fc.matching.phonetic.unwrap_or(match_defaults.phonetic),
        };

        Ok(Self {
            voice,
            matching,
            api_keys,
        })
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key} is not a valid number: {value}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;
    use file::EchoConfigFile;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(EchoConfigFile::default(), env_from(&[])).unwrap();

        assert_eq!(config.voice.capture_window, Duration::from_secs(4));
        assert_eq!(config.voice.stt_provider, SttProvider::Gemini);
        assert_eq!(config.voice.stt_model, "gemini-2.0-flash");
        assert_eq!(config.voice.stt_timeout, Duration::from_secs(15));
        assert_eq!(config.voice.tts_timeout, Duration::from_secs(20));
        assert!((config.matching.threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.matching.min_query_len, 3);
        assert!(config.api_keys.gemini.is_none());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut fc = EchoConfigFile::default();
        fc.voice.capture_secs = Some(6.0);
        fc.api_keys.gemini = Some("from-file".to_string());

        let config = Config::from_sources(
            fc,
            env_from(&[("ECHO_CAPTURE_SECS", "2.5"), ("GEMINI_API_KEY", "from-env")]),
        )
        .unwrap();

        assert_eq!(config.voice.capture_window, Duration::from_millis(2500));
        assert_eq!(
            config.api_keys.gemini.as_ref().map(|k| k.expose_secret().to_string()),
            Some("from-env".to_string())
        );
    }

    #[test]
    fn test_tts_timeout_bounds_utterance_limit() {
        let mut fc = EchoConfigFile::default();
        fc.voice.utterance_limit_secs = Some(5);

        let config =
            Config::from_sources(fc, env_from(&[("ECHO_TTS_TIMEOUT_SECS", "8")])).unwrap();

        assert_eq!(config.voice.tts_timeout, Duration::from_secs(8));
        assert_eq!(config.voice.utterance_limit, Duration::from_secs(8));
        assert!(
            Config::from_sources(EchoConfigFile::default(), env_from(&[("ECHO_TTS_TIMEOUT_SECS", "soon")]))
                .is_err()
        );
    }

    #[test]
    fn test_whisper_provider_picks_whisper_model() {
        let config =
            Config::from_sources(EchoConfigFile::default(), env_from(&[("ECHO_STT_PROVIDER", "whisper")]))
                .unwrap();

        assert_eq!(config.voice.stt_provider, SttProvider::Whisper);
        assert_eq!(config.voice.stt_model, "whisper-1");
    }

    #[test]
    fn test_empty_key_is_missing() {
        let config =
            Config::from_sources(EchoConfigFile::default(), env_from(&[("GEMINI_API_KEY", "")]))
                .unwrap();
        assert!(config.api_keys.gemini.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(
            Config::from_sources(EchoConfigFile::default(), env_from(&[("ECHO_STT_PROVIDER", "siri")]))
                .is_err()
        );
        assert!(
            Config::from_sources(EchoConfigFile::default(), env_from(&[("ECHO_MATCH_THRESHOLD", "1.5")]))
                .is_err()
        );
        assert!(
            Config::from_sources(EchoConfigFile::default(), env_from(&[("ECHO_CAPTURE_SECS", "-1")]))
                .is_err()
        );
    }
}
