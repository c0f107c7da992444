//! Speech feedback sequencing
//!
//! All speech for a mount goes through one [`SpeechSequencer`]. Requests are
//! sent over a channel to a single worker task, so at most one utterance is
//! ever playing and they play in the order they were issued. Each request
//! holds a speech reservation on the [`VoiceSession`] from the moment it is
//! accepted until its ticket resolves, which keeps the microphone closed for
//! the whole time speech is pending.
//!
//! Sequencers of different mounts share one [`Speaker`]. A new mount's
//! speech waits for the previous mount's in-flight utterance to end, so the
//! output device never plays two utterances at once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};

use super::session::VoiceSession;
use super::tts::SpeechEngine;
use crate::{Error, Result};

/// How a new utterance relates to speech already pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeakMode {
    /// Play after everything already queued
    #[default]
    Queue,
    /// Play now or not at all; refused while anything is pending
    Immediate,
}

/// How one utterance ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// Played to the end
    Completed,
    /// The engine failed; callers continue as if it had completed
    Failed(String),
    /// Flushed before or while playing
    Cancelled,
}

impl SpeechOutcome {
    /// Whether the caller should carry on with its next step
    ///
    /// Playback failures count as finished so the listen/speak handshake
    /// never stalls.
    #[must_use]
    pub const fn should_continue(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

/// Completion of one queued utterance
#[derive(Debug)]
pub struct SpeechTicket {
    rx: oneshot::Receiver<SpeechOutcome>,
}

impl SpeechTicket {
    /// Wait until the utterance has played, failed, or been flushed
    pub async fn done(self) -> SpeechOutcome {
        self.rx.await.unwrap_or(SpeechOutcome::Cancelled)
    }
}

/// Default upper bound on one utterance, synthesis and playback together
pub const DEFAULT_UTTERANCE_LIMIT: Duration = Duration::from_secs(60);

/// The process-wide output device, as seen by sequencers
#[derive(Clone)]
pub struct Speaker {
    lock: Arc<Mutex<()>>,
    limit: Duration,
}

impl Speaker {
    /// Speaker that abandons any utterance running longer than `limit`
    #[must_use]
    pub fn new(limit: Duration) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            limit,
        }
    }

    /// Per-utterance limit
    #[must_use]
    pub const fn limit(&self) -> Duration {
        self.limit
    }
}

impl Default for Speaker {
    fn default() -> Self {
        Self::new(DEFAULT_UTTERANCE_LIMIT)
    }
}

struct SpeechRequest {
    text: String,
    generation: u64,
    done_tx: oneshot::Sender<SpeechOutcome>,
}

/// Serializes speech for one session
#[derive(Clone)]
pub struct SpeechSequencer {
    session: VoiceSession,
    engine: Arc<dyn SpeechEngine>,
    tx: mpsc::UnboundedSender<SpeechRequest>,
    generation: Arc<AtomicU64>,
}

impl SpeechSequencer {
    /// Spawn the worker for `session` on a speaker of its own
    #[must_use]
    pub fn new(session: VoiceSession, engine: Arc<dyn SpeechEngine>) -> Self {
        Self::sharing(session, engine, Speaker::default())
    }

    /// Spawn the worker for `session`, taking turns on `speaker`
    #[must_use]
    pub fn sharing(session: VoiceSession, engine: Arc<dyn SpeechEngine>, speaker: Speaker) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = Arc::new(AtomicU64::new(0));

        tokio::spawn(run_worker(
            rx,
            session.clone(),
            Arc::clone(&engine),
            Arc::clone(&generation),
            speaker,
        ));

        Self {
            session,
            engine,
            tx,
            generation,
        }
    }

    /// Issue one utterance
    ///
    /// # Errors
    ///
    /// Returns `ReentrancyRejected` while the session is listening or
    /// processing, or in `Immediate` mode while other speech is pending
    pub fn speak(&self, text: impl Into<String>, mode: SpeakMode) -> Result<SpeechTicket> {
        match mode {
            SpeakMode::Queue => self.session.begin_speech()?,
            SpeakMode::Immediate => self.session.begin_exclusive_speech()?,
        }

        let text = text.into();
        let (done_tx, rx) = oneshot::channel();
        let request = SpeechRequest {
            text,
            generation: self.generation.load(Ordering::SeqCst),
            done_tx,
        };

        if self.tx.send(request).is_err() {
            self.session.end_speech();
            return Err(Error::SpeechPlayback("speech worker stopped".to_string()));
        }

        Ok(SpeechTicket { rx })
    }

    /// Queue several utterances back to back and wait for all of them
    ///
    /// Stops early and returns the first outcome that is not a completion.
    ///
    /// # Errors
    ///
    /// Returns error if the session refuses the reservation
    pub async fn speak_all<I, S>(&self, texts: I) -> Result<SpeechOutcome>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tickets = texts
            .into_iter()
            .map(|text| self.speak(text, SpeakMode::Queue))
            .collect::<Result<Vec<_>>>()?;

        let mut last = SpeechOutcome::Completed;
        for ticket in tickets {
            last = ticket.done().await;
            if last == SpeechOutcome::Cancelled {
                break;
            }
        }
        Ok(last)
    }

    /// Drop everything queued and stop the current utterance
    ///
    /// Pending tickets resolve as `Cancelled`.
    pub fn flush(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.engine.stop();
        tracing::debug!(session = self.session.id(), generation, "speech flushed");
    }

    /// Session this sequencer speaks for
    #[must_use]
    pub const fn session(&self) -> &VoiceSession {
        &self.session
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<SpeechRequest>,
    session: VoiceSession,
    engine: Arc<dyn SpeechEngine>,
    generation: Arc<AtomicU64>,
    speaker: Speaker,
) {
    while let Some(request) = rx.recv().await {
        let current = || generation.load(Ordering::SeqCst) == request.generation;

        let outcome = if current() {
            let _turn = speaker.lock.lock().await;
            // Flushed while waiting for the previous mount's utterance
            if current() {
                tracing::debug!(session = session.id(), text = %request.text, "speaking");
                speak_one(engine.as_ref(), &request.text, speaker.limit, current).await
            } else {
                SpeechOutcome::Cancelled
            }
        } else {
            SpeechOutcome::Cancelled
        };

        // Release the reservation before waking the caller so it can listen
        session.end_speech();
        let _ = request.done_tx.send(outcome);
    }

    tracing::debug!(session = session.id(), "speech worker stopped");
}

async fn speak_one(
    engine: &dyn SpeechEngine,
    text: &str,
    limit: Duration,
    current: impl Fn() -> bool,
) -> SpeechOutcome {
    match tokio::time::timeout(limit, engine.speak(text)).await {
        Ok(Ok(())) if current() => SpeechOutcome::Completed,
        Ok(Ok(())) => SpeechOutcome::Cancelled,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "speech playback failed, continuing");
            SpeechOutcome::Failed(e.to_string())
        }
        Err(_) => {
            engine.stop();
            tracing::warn!(limit_ms = limit.as_millis(), "utterance overran its limit, stopped");
            SpeechOutcome::Failed(format!("utterance exceeded {}ms", limit.as_millis()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::voice::capture::{AudioSource, CaptureUnit, SAMPLE_RATE};
    use crate::voice::clip::AudioClip;
    use crate::voice::session::Phase;
    use crate::voice::stt::Transcriber;

    struct NullSource;

    impl AudioSource for NullSource {
        fn request_permission(&mut self) -> Result<()> {
            Ok(())
        }
        fn start(&mut self) -> Result<()> {
            Ok(())
        }
        fn stop(&mut self) -> Result<Vec<f32>> {
            Ok(Vec::new())
        }
    }

    struct NullTranscriber;

    #[async_trait]
    impl Transcriber for NullTranscriber {
        async fn transcribe(&self, _clip: AudioClip) -> Result<String> {
            Err(Error::EmptyResult)
        }
    }

    #[derive(Default)]
    struct Recorder {
        spoken: Mutex<Vec<String>>,
        fail: bool,
    }

    /// Never finishes an utterance
    #[derive(Default)]
    struct Hung {
        stops: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl SpeechEngine for Hung {
        async fn speak(&self, _text: &str) -> Result<()> {
            std::future::pending::<Result<()>>().await
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl SpeechEngine for Recorder {
        async fn speak(&self, text: &str) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.spoken.lock().unwrap().push(text.to_string());
            if self.fail {
                Err(Error::Tts("offline".to_string()))
            } else {
                Ok(())
            }
        }

        fn stop(&self) {}
    }

    fn session() -> VoiceSession {
        let capture = CaptureUnit::new(Box::new(NullSource), Duration::from_millis(10), SAMPLE_RATE);
        VoiceSession::new(capture, Arc::new(NullTranscriber), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_queue_plays_in_order() {
        let engine = Arc::new(Recorder::default());
        let seq = SpeechSequencer::new(session(), engine.clone());

        let outcome = seq.speak_all(["one", "two", "three"]).await.unwrap();
        assert_eq!(outcome, SpeechOutcome::Completed);
        assert_eq!(*engine.spoken.lock().unwrap(), vec!["one", "two", "three"]);
        assert_eq!(seq.session().phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_immediate_rejected_while_pending() {
        let seq = SpeechSequencer::new(session(), Arc::new(Recorder::default()));

        let first = seq.speak("first", SpeakMode::Queue).unwrap();
        assert!(matches!(
            seq.speak("urgent", SpeakMode::Immediate),
            Err(Error::ReentrancyRejected { .. })
        ));
        assert_eq!(first.done().await, SpeechOutcome::Completed);
        assert!(seq.speak("urgent", SpeakMode::Immediate).is_ok());
    }

    #[tokio::test]
    async fn test_flush_cancels_queued() {
        let engine = Arc::new(Recorder::default());
        let seq = SpeechSequencer::new(session(), engine.clone());

        let a = seq.speak("a", SpeakMode::Queue).unwrap();
        let b = seq.speak("b", SpeakMode::Queue).unwrap();
        seq.flush();

        assert_eq!(a.done().await, SpeechOutcome::Cancelled);
        assert_eq!(b.done().await, SpeechOutcome::Cancelled);
        assert_eq!(seq.session().speech_outstanding(), 0);
    }

    #[tokio::test]
    async fn test_failure_counts_as_done() {
        let engine = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let seq = SpeechSequencer::new(session(), engine);

        let outcome = seq.speak("hello", SpeakMode::Queue).unwrap().done().await;
        assert!(outcome.should_continue());
        assert_eq!(seq.session().phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_hung_engine_releases_session() {
        let engine = Arc::new(Hung::default());
        let speaker = Speaker::new(Duration::from_millis(50));
        let seq = SpeechSequencer::sharing(session(), engine.clone(), speaker);

        let outcome = seq.speak("hello", SpeakMode::Queue).unwrap().done().await;
        assert!(matches!(outcome, SpeechOutcome::Failed(_)));
        assert!(outcome.should_continue());
        assert_eq!(engine.stops.load(Ordering::SeqCst), 1);
        assert_eq!(seq.session().phase(), Phase::Idle);
        assert!(seq.session().start().is_ok());
    }

    #[tokio::test]
    async fn test_shared_speaker_takes_turns() {
        let speaker = Speaker::default();
        let engine = Arc::new(Recorder::default());
        let first = SpeechSequencer::sharing(session(), engine.clone(), speaker.clone());
        let second = SpeechSequencer::sharing(session(), engine.clone(), speaker);

        let a = first.speak("a", SpeakMode::Queue).unwrap();
        let b = second.speak("b", SpeakMode::Queue).unwrap();
        assert_eq!(a.done().await, SpeechOutcome::Completed);
        assert_eq!(b.done().await, SpeechOutcome::Completed);
        assert_eq!(engine.spoken.lock().unwrap().len(), 2);
    }
}
