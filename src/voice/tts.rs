//! Text-to-speech (TTS) processing

use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::playback::AudioPlayback;
use super::stt::build_client;
use crate::config::{Config, TtsProvider};
use crate::{Error, Result};

/// Speaks one utterance at a time
///
/// `speak` resolves when the utterance has finished playing, was stopped,
/// or failed. `stop` interrupts whatever is playing right now.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Speak `text` to completion
    ///
    /// # Errors
    ///
    /// Returns `Tts` or `SpeechPlayback` when synthesis or output fails
    async fn speak(&self, text: &str) -> Result<()>;

    /// Interrupt the current utterance, if any
    fn stop(&self);
}

/// Default upper bound on one synthesis request
pub const DEFAULT_TTS_TIMEOUT: Duration = Duration::from_secs(20);

/// How often a pending synthesis checks its stop token
const STOP_POLL: Duration = Duration::from_millis(20);

/// Build the speech engine selected in configuration
///
/// Falls back to [`ConsoleSpeech`] when the chosen provider has no key.
#[must_use]
pub fn speech_from_config(config: &Config) -> Arc<dyn SpeechEngine> {
    let voice = &config.voice;
    let synthesizer = match voice.tts_provider {
        TtsProvider::Console => None,
        TtsProvider::OpenAi => config.api_keys.openai.as_ref().map(|key| {
            TextToSpeech::new_openai(
                key.expose_secret().to_string().into(),
                voice.tts_voice.clone(),
                voice.tts_speed,
                voice.tts_model.clone(),
            )
            .with_timeout(voice.tts_timeout)
        }),
        TtsProvider::ElevenLabs => config.api_keys.elevenlabs.as_ref().map(|key| {
            TextToSpeech::new_elevenlabs(
                key.expose_secret().to_string().into(),
                voice.tts_voice.clone(),
                "eleven_monolingual_v1".to_string(),
            )
            .with_timeout(voice.tts_timeout)
        }),
    };

    match synthesizer {
        Some(tts) => Arc::new(CloudSpeech::new(tts)),
        None => {
            if voice.tts_provider != TtsProvider::Console {
                tracing::warn!(
                    provider = ?voice.tts_provider,
                    "no TTS key configured, speaking to console"
                );
            }
            Arc::new(ConsoleSpeech)
        }
    }
}

/// TTS provider backend
#[derive(Clone, Copy, Debug)]
enum Backend {
    OpenAi,
    ElevenLabs,
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    voice: String,
    speed: f32,
    model: String,
    backend: Backend,
    timeout: Duration,
}

impl TextToSpeech {
    /// Create a TTS instance using `OpenAI`
    #[must_use]
    pub fn new_openai(api_key: SecretString, voice: String, speed: f32, model: String) -> Self {
        Self {
            client: build_client(DEFAULT_TTS_TIMEOUT),
            api_key,
            voice,
            speed,
            model,
            backend: Backend::OpenAi,
            timeout: DEFAULT_TTS_TIMEOUT,
        }
    }

    /// Create a TTS instance using `ElevenLabs`
    #[must_use]
    pub fn new_elevenlabs(api_key: SecretString, voice_id: String, model: String) -> Self {
        Self {
            client: build_client(DEFAULT_TTS_TIMEOUT),
            api_key,
            voice: voice_id,
            // ElevenLabs doesn't use speed in the same way
            speed: 1.0,
            model,
            backend: Backend::ElevenLabs,
            timeout: DEFAULT_TTS_TIMEOUT,
        }
    }

    /// Bound every synthesis request by `timeout`
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self.timeout = timeout;
        self
    }

    /// Request timeout in effect
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Synthesize text to MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        match self.backend {
            Backend::OpenAi => self.synthesize_openai(text).await,
            Backend::ElevenLabs => self.synthesize_elevenlabs(text).await,
        }
    }

    /// An expired request surfaces as a playback failure so the caller moves on
    fn request_error(&self, err: &reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::SpeechPlayback(format!(
                "speech synthesis timed out after {}s",
                self.timeout.as_secs()
            ))
        } else {
            Error::Tts(err.to_string())
        }
    }

    async fn synthesize_openai(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.request_error(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| self.request_error(&e))?;
        Ok(audio.to_vec())
    }

    async fn synthesize_elevenlabs(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{}", self.voice);

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.request_error(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| self.request_error(&e))?;
        Ok(audio.to_vec())
    }
}

/// Stop flags of the utterances currently in flight
///
/// Every utterance gets a fresh flag, so starting one never clears a stop
/// aimed at another.
#[derive(Default)]
struct StopTokens {
    live: Mutex<Vec<Arc<AtomicBool>>>,
}

impl StopTokens {
    fn issue(&self) -> Arc<AtomicBool> {
        let token = Arc::new(AtomicBool::new(false));
        self.lock().push(Arc::clone(&token));
        token
    }

    fn retire(&self, token: &Arc<AtomicBool>) {
        self.lock().retain(|live| !Arc::ptr_eq(live, token));
    }

    fn trip_all(&self) {
        for token in self.lock().iter() {
            token.store(true, Ordering::SeqCst);
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<AtomicBool>>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One utterance's stop flag; tripped and retired when the utterance ends
///
/// Dropping the guard mid-playback (a cancelled `speak` future) still
/// silences the blocking playback thread.
struct Utterance<'a> {
    tokens: &'a StopTokens,
    token: Arc<AtomicBool>,
}

impl<'a> Utterance<'a> {
    fn begin(tokens: &'a StopTokens) -> Self {
        let token = tokens.issue();
        Self { tokens, token }
    }

    fn stopped(&self) -> bool {
        self.token.load(Ordering::SeqCst)
    }

    async fn until_stopped(&self) {
        while !self.stopped() {
            tokio::time::sleep(STOP_POLL).await;
        }
    }
}

impl Drop for Utterance<'_> {
    fn drop(&mut self) {
        self.token.store(true, Ordering::SeqCst);
        self.tokens.retire(&self.token);
    }
}

/// Synthesizes in the cloud and plays through the default output device
pub struct CloudSpeech {
    tts: TextToSpeech,
    tokens: StopTokens,
}

impl CloudSpeech {
    /// Wrap a synthesizer
    #[must_use]
    pub fn new(tts: TextToSpeech) -> Self {
        Self {
            tts,
            tokens: StopTokens::default(),
        }
    }
}

#[async_trait]
impl SpeechEngine for CloudSpeech {
    async fn speak(&self, text: &str) -> Result<()> {
        let utterance = Utterance::begin(&self.tokens);

        let audio = tokio::select! {
            audio = self.tts.synthesize(text) => audio?,
            () = utterance.until_stopped() => {
                tracing::debug!("utterance stopped during synthesis");
                return Ok(());
            }
        };
        if utterance.stopped() {
            tracing::debug!("utterance stopped before playback");
            return Ok(());
        }

        let stop = Arc::clone(&utterance.token);
        tokio::task::spawn_blocking(move || {
            let playback = AudioPlayback::new(stop)?;
            playback.play_mp3_blocking(&audio)
        })
        .await
        .map_err(|e| Error::SpeechPlayback(format!("playback task failed: {e}")))?
        .map_err(|e| Error::SpeechPlayback(e.to_string()))
    }

    fn stop(&self) {
        self.tokens.trip_all();
    }
}

/// Prints utterances instead of speaking them
///
/// Used headless and when no TTS credentials are configured.
pub struct ConsoleSpeech;

#[async_trait]
impl SpeechEngine for ConsoleSpeech {
    async fn speak(&self, text: &str) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "🔊 {text}")?;
        stdout.flush()?;
        Ok(())
    }

    fn stop(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_falls_back_to_console() {
        let config = Config::default();
        // Only type-checks the fallback path; ConsoleSpeech has no state to inspect
        let engine = speech_from_config(&config);
        engine.stop();
    }

    #[tokio::test]
    async fn test_console_speech_completes() {
        assert!(ConsoleSpeech.speak("hello").await.is_ok());
    }

    #[test]
    fn test_new_utterance_does_not_clear_earlier_stop() {
        let tokens = StopTokens::default();
        let first = Utterance::begin(&tokens);
        tokens.trip_all();

        let second = Utterance::begin(&tokens);
        assert!(first.stopped());
        assert!(!second.stopped());
        assert_eq!(tokens.in_flight(), 2);
    }

    #[test]
    fn test_finished_utterance_is_retired_and_silenced() {
        let tokens = StopTokens::default();
        let utterance = Utterance::begin(&tokens);
        let flag = Arc::clone(&utterance.token);

        drop(utterance);
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(tokens.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_pending_utterance_wakes_on_stop() {
        let tokens = StopTokens::default();
        let utterance = Utterance::begin(&tokens);
        tokens.trip_all();

        tokio::time::timeout(Duration::from_secs(1), utterance.until_stopped())
            .await
            .unwrap();
    }

    #[test]
    fn test_configured_timeout_reaches_synthesizer() {
        let tts = TextToSpeech::new_openai(
            "key".to_string().into(),
            "alloy".to_string(),
            1.0,
            "tts-1".to_string(),
        );
        assert_eq!(tts.timeout(), DEFAULT_TTS_TIMEOUT);

        let tts = tts.with_timeout(Duration::from_secs(3));
        assert_eq!(tts.timeout(), Duration::from_secs(3));
    }
}
