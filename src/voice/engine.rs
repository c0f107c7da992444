//! Process-wide owner of the microphone and the speaker

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::capture::{CaptureUnit, MicrophoneSource};
use super::sequencer::{Speaker, SpeechSequencer};
use super::session::VoiceSession;
use super::stt::{Transcriber, transcriber_from_config};
use super::tts::{SpeechEngine, speech_from_config};
use crate::Config;
use crate::command::Interpreter;

/// Session and speech queue belonging to one screen mount
#[derive(Clone)]
pub struct Mount {
    /// Listen state machine for this mount
    pub session: VoiceSession,
    /// Speech queue for this mount
    pub sequencer: SpeechSequencer,
}

impl Mount {
    /// Stop capture and flush speech
    pub fn teardown(&self) {
        self.session.cancel();
        self.sequencer.flush();
    }
}

/// Holds the exclusive audio resources and hands them to one mount at a time
///
/// Mounting a screen tears down the previous mount first, so two screens can
/// never hold the microphone or the speaker together. Speech from the new
/// mount waits until the old mount's stopped utterance has actually ended.
pub struct VoiceEngine {
    capture: Arc<CaptureUnit>,
    transcriber: Arc<dyn Transcriber>,
    speech: Arc<dyn SpeechEngine>,
    speaker: Speaker,
    interpreter: Arc<Interpreter>,
    stt_timeout: Duration,
    max_consecutive_apologies: u32,
    current: Mutex<Option<Mount>>,
}

impl VoiceEngine {
    /// Assemble an engine from its parts
    #[must_use]
    pub fn new(
        capture: Arc<CaptureUnit>,
        transcriber: Arc<dyn Transcriber>,
        speech: Arc<dyn SpeechEngine>,
        config: &Config,
    ) -> Self {
        Self {
            capture,
            transcriber,
            speech,
            speaker: Speaker::new(config.voice.utterance_limit),
            interpreter: Arc::new(Interpreter::from_config(&config.matching)),
            stt_timeout: config.voice.stt_timeout,
            max_consecutive_apologies: config.voice.max_consecutive_apologies,
            current: Mutex::new(None),
        }
    }

    /// Build an engine on the default microphone and configured services
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let source = MicrophoneSource::new(config.voice.sample_rate);
        let capture = CaptureUnit::new(
            Box::new(source),
            config.voice.capture_window,
            config.voice.sample_rate,
        );
        let transcriber: Arc<dyn Transcriber> = Arc::from(transcriber_from_config(config));

        tracing::info!(
            stt = %config.voice.stt_provider,
            model = %config.voice.stt_model,
            window_ms = config.voice.capture_window.as_millis(),
            "voice engine ready"
        );

        Self::new(capture, transcriber, speech_from_config(config), config)
    }

    /// Start a fresh mount, tearing down the previous one
    pub fn mount(&self) -> Mount {
        let mut current = self.lock_current();
        if let Some(previous) = current.take() {
            tracing::debug!(session = previous.session.id(), "tearing down previous mount");
            previous.teardown();
        }

        let session = VoiceSession::new(
            Arc::clone(&self.capture),
            Arc::clone(&self.transcriber),
            self.stt_timeout,
        );
        let sequencer = SpeechSequencer::sharing(
            session.clone(),
            Arc::clone(&self.speech),
            self.speaker.clone(),
        );
        let mount = Mount { session, sequencer };

        *current = Some(mount.clone());
        mount
    }

    /// Tear down `session`'s mount if it is still the current one
    pub fn unmount(&self, session: &VoiceSession) {
        let mut current = self.lock_current();
        if current
            .as_ref()
            .is_some_and(|m| m.session.id() == session.id())
        {
            if let Some(mount) = current.take() {
                mount.teardown();
            }
        }
    }

    /// Shared command interpreter
    #[must_use]
    pub fn interpreter(&self) -> Arc<Interpreter> {
        Arc::clone(&self.interpreter)
    }

    /// Shared capture unit
    #[must_use]
    pub const fn capture(&self) -> &Arc<CaptureUnit> {
        &self.capture
    }

    /// Consecutive failures after which apologies go quiet
    #[must_use]
    pub const fn max_consecutive_apologies(&self) -> u32 {
        self.max_consecutive_apologies
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<Mount>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
