//! Voice processing module
//!
//! Handles microphone capture, transcription, speech output and the state
//! machine that keeps them from overlapping.

mod capture;
mod clip;
mod engine;
mod playback;
mod sequencer;
mod session;
mod stt;
mod tts;

pub use capture::{
    AudioSessionMode, AudioSource, CaptureHandle, CaptureUnit, MicrophoneSource, Permission,
    SAMPLE_RATE,
};
pub use clip::{AudioClip, WAV_MIME, resample, samples_to_wav};
pub use engine::{Mount, VoiceEngine};
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, decode_mp3};
pub use sequencer::{
    DEFAULT_UTTERANCE_LIMIT, SpeakMode, Speaker, SpeechOutcome, SpeechSequencer, SpeechTicket,
};
pub use session::{
    ListenOutcome, ListenTicket, Phase, SessionEvent, SessionSnapshot, VoiceSession,
};
pub use stt::{
    GeminiTranscriber, Transcriber, WhisperTranscriber, parse_gemini_response,
    transcriber_from_config,
};
pub use tts::{
    CloudSpeech, ConsoleSpeech, DEFAULT_TTS_TIMEOUT, SpeechEngine, TextToSpeech, speech_from_config,
};
