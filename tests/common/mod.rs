//! Shared test utilities: scripted microphone, transcriber and speaker

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use echo_bridge::voice::{
    AudioClip, AudioSource, CaptureUnit, SAMPLE_RATE, SpeechEngine, Transcriber, VoiceEngine,
};
use echo_bridge::{Config, Error, Result};

/// Capture window used by the fake microphone
pub const WINDOW: Duration = Duration::from_millis(20);

/// Tracks whether the fake microphone is open
#[derive(Default)]
pub struct MicProbe {
    open: AtomicBool,
    starts: AtomicUsize,
    overlaps: AtomicUsize,
}

impl MicProbe {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Starts that happened while the microphone was already open
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

/// Microphone producing a short tone, or refusing access
pub struct FakeMic {
    probe: Arc<MicProbe>,
    deny: bool,
}

impl FakeMic {
    pub fn new(probe: Arc<MicProbe>) -> Self {
        Self { probe, deny: false }
    }

    pub fn denied(probe: Arc<MicProbe>) -> Self {
        Self { probe, deny: true }
    }
}

impl AudioSource for FakeMic {
    fn request_permission(&mut self) -> Result<()> {
        if self.deny {
            Err(Error::PermissionDenied)
        } else {
            Ok(())
        }
    }

    fn start(&mut self) -> Result<()> {
        self.probe.starts.fetch_add(1, Ordering::SeqCst);
        if self.probe.open.swap(true, Ordering::SeqCst) {
            self.probe.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<Vec<f32>> {
        self.probe.open.store(false, Ordering::SeqCst);
        Ok(vec![0.25; 320])
    }
}

/// One scripted transcription result
#[derive(Debug, Clone)]
pub enum Reply {
    Text(&'static str),
    Delayed(Duration, &'static str),
    Status(u16),
    Empty,
}

/// Transcriber answering from a script; repeats `Empty` once exhausted
#[derive(Default)]
pub struct ScriptedTranscriber {
    replies: Mutex<VecDeque<Reply>>,
    calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _clip: AudioClip) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Empty);

        match reply {
            Reply::Text(text) => Ok(text.to_string()),
            Reply::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text.to_string())
            }
            Reply::Status(status) => Err(Error::Service {
                status,
                body: "scripted failure".to_string(),
            }),
            Reply::Empty => Err(Error::EmptyResult),
        }
    }
}

/// Speaker that records what it said and whether the microphone was open
pub struct RecordingSpeech {
    probe: Arc<MicProbe>,
    spoken: Mutex<Vec<String>>,
    spoke_while_listening: AtomicUsize,
    delay: Duration,
}

impl RecordingSpeech {
    pub fn new(probe: Arc<MicProbe>) -> Self {
        Self {
            probe,
            spoken: Mutex::new(Vec::new()),
            spoke_while_listening: AtomicUsize::new(0),
            delay: Duration::from_millis(2),
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn spoke_while_listening(&self) -> usize {
        self.spoke_while_listening.load(Ordering::SeqCst)
    }

    /// Whether anything spoken so far contains `needle`
    pub fn said(&self, needle: &str) -> bool {
        self.spoken.lock().unwrap().iter().any(|s| s.contains(needle))
    }
}

#[async_trait]
impl SpeechEngine for RecordingSpeech {
    async fn speak(&self, text: &str) -> Result<()> {
        if self.probe.is_open() {
            self.spoke_while_listening.fetch_add(1, Ordering::SeqCst);
        }
        self.spoken.lock().unwrap().push(text.to_string());
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    fn stop(&self) {}
}

/// Speaker whose utterances run for a fixed length unless stopped
///
/// Counts utterances that started while another was still playing.
pub struct StoppableSpeech {
    length: Duration,
    live: Mutex<Vec<Arc<AtomicBool>>>,
    active: AtomicUsize,
    overlaps: AtomicUsize,
    finished: Mutex<Vec<String>>,
    interrupted: Mutex<Vec<String>>,
}

impl StoppableSpeech {
    pub fn new(length: Duration) -> Self {
        Self {
            length,
            live: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            overlaps: AtomicUsize::new(0),
            finished: Mutex::new(Vec::new()),
            interrupted: Mutex::new(Vec::new()),
        }
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    /// Utterances that played to the end
    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }

    /// Utterances cut off by `stop`
    pub fn interrupted(&self) -> Vec<String> {
        self.interrupted.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechEngine for StoppableSpeech {
    async fn speak(&self, text: &str) -> Result<()> {
        let token = Arc::new(AtomicBool::new(false));
        self.live.lock().unwrap().push(Arc::clone(&token));
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        let started = Instant::now();
        while started.elapsed() < self.length && !token.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.live.lock().unwrap().retain(|t| !Arc::ptr_eq(t, &token));
        let log = if token.load(Ordering::SeqCst) {
            &self.interrupted
        } else {
            &self.finished
        };
        log.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn stop(&self) {
        for token in self.live.lock().unwrap().iter() {
            token.store(true, Ordering::SeqCst);
        }
    }
}

/// Engine over a silent fake microphone that speaks through `speech`
pub fn engine_speaking_through(speech: Arc<dyn SpeechEngine>) -> Arc<VoiceEngine> {
    let probe = Arc::new(MicProbe::default());
    let capture = CaptureUnit::new(Box::new(FakeMic::new(probe)), WINDOW, SAMPLE_RATE);
    let transcriber: Arc<dyn Transcriber> = Arc::new(ScriptedTranscriber::default());

    Arc::new(VoiceEngine::new(
        capture,
        transcriber,
        speech,
        &Config::default(),
    ))
}

/// Everything a test needs to drive and observe an engine
pub struct Rig {
    pub engine: Arc<VoiceEngine>,
    pub probe: Arc<MicProbe>,
    pub transcriber: Arc<ScriptedTranscriber>,
    pub speech: Arc<RecordingSpeech>,
}

/// Engine over a fake microphone and a scripted transcriber
pub fn rig(replies: impl IntoIterator<Item = Reply>) -> Rig {
    rig_with(replies, false)
}

/// Engine whose microphone refuses access
pub fn denied_rig() -> Rig {
    rig_with([], true)
}

fn rig_with(replies: impl IntoIterator<Item = Reply>, deny: bool) -> Rig {
    let probe = Arc::new(MicProbe::default());
    let mic = if deny {
        FakeMic::denied(Arc::clone(&probe))
    } else {
        FakeMic::new(Arc::clone(&probe))
    };
    let capture = CaptureUnit::new(Box::new(mic), WINDOW, SAMPLE_RATE);
    let transcriber = Arc::new(ScriptedTranscriber::new(replies));
    let speech = Arc::new(RecordingSpeech::new(Arc::clone(&probe)));

    let mut config = Config::default();
    config.voice.stt_timeout = Duration::from_secs(2);

    let engine = Arc::new(VoiceEngine::new(
        capture,
        Arc::clone(&transcriber) as Arc<dyn Transcriber>,
        Arc::clone(&speech) as Arc<dyn SpeechEngine>,
        &config,
    ));

    Rig {
        engine,
        probe,
        transcriber,
        speech,
    }
}
