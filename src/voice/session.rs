//! Voice session state machine
//!
//! A [`VoiceSession`] is created for every screen mount and is the single
//! source of truth for what the engine is doing on that screen's behalf:
//!
//! ```text
//!          start()            window elapses           transcript / failure
//!  Idle ───────────▶ Listening ───────────▶ Processing ─────────────────────▶ Idle
//!   │ ▲
//!   │ └──── end_speech() (last outstanding utterance)
//!   └─────▶ Speaking   begin_speech(), only from Idle or Speaking
//! ```
//!
//! Every public entry point checks the current [`Phase`] under one lock before
//! doing any asynchronous work. Results that arrive after [`VoiceSession::cancel`]
//! are recognized by their epoch and dropped.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{oneshot, watch};

use super::capture::{CaptureHandle, CaptureUnit};
use super::stt::Transcriber;
use crate::error::ErrorKind;
use crate::{Error, Result};

/// Maximum number of events kept in a session's history
const HISTORY_LIMIT: usize = 512;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// What the engine is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Nothing in flight
    #[default]
    Idle,
    /// Microphone window open
    Listening,
    /// Clip sent for transcription
    Processing,
    /// One or more utterances queued or playing
    Speaking,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Processing => write!(f, "processing"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}

/// Observable view of a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current phase
    pub phase: Phase,
    /// Text of the last successful utterance, until a consumer takes it
    pub recognized_text: Option<String>,
    /// Message of the last failed utterance
    pub last_error: Option<String>,
    /// Number of utterances started so far
    pub utterances: u64,
}

/// Entry in a session's history log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Phase changed
    Transition {
        /// Phase left
        from: Phase,
        /// Phase entered
        to: Phase,
    },
    /// A call was refused because of the current phase
    Rejected {
        /// Operation that was attempted
        operation: &'static str,
        /// Phase at the time
        phase: Phase,
    },
    /// A transcript was published
    Recognized {
        /// Utterance number
        utterance: u64,
    },
    /// An utterance failed
    Failed {
        /// Utterance number
        utterance: u64,
        /// Failure category
        kind: ErrorKind,
    },
    /// A result arrived after the session was cancelled
    StaleDiscarded {
        /// Utterance number
        utterance: u64,
    },
}

/// How one listen cycle ended
#[derive(Debug)]
pub enum ListenOutcome {
    /// Text is waiting in [`VoiceSession::take_recognized_text`]
    Recognized,
    /// Capture or transcription failed; the session is idle again
    Failed(Error),
    /// The session was cancelled before the cycle completed
    Cancelled,
}

/// Completion of one listen cycle started by [`VoiceSession::start`]
#[derive(Debug)]
pub struct ListenTicket {
    utterance: u64,
    rx: oneshot::Receiver<ListenOutcome>,
}

impl ListenTicket {
    /// Utterance number this ticket belongs to
    #[must_use]
    pub const fn utterance(&self) -> u64 {
        self.utterance
    }

    /// Wait for the cycle to finish
    pub async fn outcome(self) -> ListenOutcome {
        self.rx.await.unwrap_or(ListenOutcome::Cancelled)
    }
}

#[derive(Default)]
struct SessionState {
    phase: Phase,
    recognized_text: Option<String>,
    last_error: Option<String>,
    utterances: u64,
    epoch: u64,
    speech_outstanding: usize,
    capture_disabled: bool,
    permission_notice_given: bool,
    history: VecDeque<SessionEvent>,
}

impl SessionState {
    fn record(&mut self, event: SessionEvent) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(event);
    }

    fn transition(&mut self, to: Phase) {
        let from = self.phase;
        if from != to {
            self.phase = to;
            self.record(SessionEvent::Transition { from, to });
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            recognized_text: self.recognized_text.clone(),
            last_error: self.last_error.clone(),
            utterances: self.utterances,
        }
    }
}

struct SessionInner {
    id: u64,
    capture: Arc<CaptureUnit>,
    transcriber: Arc<dyn Transcriber>,
    stt_timeout: Duration,
    state: Mutex<SessionState>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the state held by `guard` and release the lock
    fn publish(&self, guard: MutexGuard<'_, SessionState>) {
        let snapshot = guard.snapshot();
        drop(guard);
        self.snapshot_tx.send_replace(snapshot);
    }

    /// Lock the state only if `epoch` is still current
    fn lock_current(&self, epoch: u64, utterance: u64) -> Option<MutexGuard<'_, SessionState>> {
        let mut state = self.lock();
        if state.epoch == epoch {
            Some(state)
        } else {
            state.record(SessionEvent::StaleDiscarded { utterance });
            drop(state);
            tracing::debug!(session = self.id, utterance, "discarding stale result");
            None
        }
    }

    async fn listen_cycle(
        self: Arc<Self>,
        handle: CaptureHandle,
        epoch: u64,
        utterance: u64,
    ) -> ListenOutcome {
        let clip = handle.finished().await;

        let clip = {
            let Some(mut state) = self.lock_current(epoch, utterance) else {
                return ListenOutcome::Cancelled;
            };
            let clip = match clip {
                Ok(clip) => clip,
                Err(e) => {
                    drop(state);
                    return self.fail(epoch, utterance, e);
                }
            };
            if clip.is_silent() {
                drop(state);
                tracing::debug!(session = self.id, utterance, "silent clip, skipping transcription");
                return self.fail(epoch, utterance, Error::EmptyResult);
            }
            state.transition(Phase::Processing);
            self.publish(state);
            clip
        };

        tracing::debug!(session = self.id, utterance, clip = %clip.handle(), "transcribing");
        let result = match tokio::time::timeout(self.stt_timeout, self.transcriber.transcribe(clip))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.stt_timeout)),
        };

        match result {
            Ok(text) => {
                let Some(mut state) = self.lock_current(epoch, utterance) else {
                    return ListenOutcome::Cancelled;
                };
                tracing::info!(session = self.id, utterance, text = %text, "utterance recognized");
                state.recognized_text = Some(text);
                state.last_error = None;
                state.record(SessionEvent::Recognized { utterance });
                state.transition(Phase::Idle);
                self.publish(state);
                ListenOutcome::Recognized
            }
            Err(e) => self.fail(epoch, utterance, e),
        }
    }

    fn fail(&self, epoch: u64, utterance: u64, error: Error) -> ListenOutcome {
        let Some(mut state) = self.lock_current(epoch, utterance) else {
            return ListenOutcome::Cancelled;
        };

        let kind = error.kind();
        match kind {
            ErrorKind::PermissionDenied => {
                tracing::warn!(session = self.id, "microphone permission denied, capture disabled");
                state.capture_disabled = true;
            }
            ErrorKind::Internal => {
                tracing::error!(session = self.id, utterance, error = %error, "utterance failed");
            }
            _ => {
                tracing::warn!(session = self.id, utterance, error = %error, "utterance failed");
            }
        }

        state.recognized_text = None;
        state.last_error = Some(error.to_string());
        state.record(SessionEvent::Failed { utterance, kind });
        state.transition(Phase::Idle);
        self.publish(state);
        ListenOutcome::Failed(error)
    }
}

/// Returns the session to idle if a cycle is dropped mid-flight
struct CycleGuard {
    inner: Arc<SessionInner>,
    epoch: u64,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        if state.epoch == self.epoch && matches!(state.phase, Phase::Listening | Phase::Processing)
        {
            state.transition(Phase::Idle);
            self.inner.publish(state);
        }
    }
}

/// Per-mount voice session
///
/// Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct VoiceSession {
    inner: Arc<SessionInner>,
}

impl VoiceSession {
    /// Create a session over the shared capture unit and transcriber
    #[must_use]
    pub fn new(
        capture: Arc<CaptureUnit>,
        transcriber: Arc<dyn Transcriber>,
        stt_timeout: Duration,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session = id, "voice session created");
        Self {
            inner: Arc::new(SessionInner {
                id,
                capture,
                transcriber,
                stt_timeout,
                state: Mutex::new(SessionState::default()),
                snapshot_tx,
            }),
        }
    }

    /// Process-unique session identifier
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Open one capture window and transcribe it
    ///
    /// The phase moves to `Listening` before this returns, so a second call
    /// is refused even if the first has not reached the microphone yet.
    ///
    /// # Errors
    ///
    /// Returns `ReentrancyRejected` unless idle, `PermissionDenied` once
    /// capture has been disabled, or the capture unit's start error
    pub fn start(&self) -> Result<ListenTicket> {
        let mut state = self.inner.lock();

        if state.phase != Phase::Idle {
            let phase = state.phase;
            state.record(SessionEvent::Rejected {
                operation: "start",
                phase,
            });
            drop(state);
            tracing::debug!(session = self.inner.id, %phase, "start rejected");
            return Err(Error::ReentrancyRejected {
                operation: "start",
                phase,
            });
        }
        if state.capture_disabled {
            return Err(Error::PermissionDenied);
        }

        state.utterances += 1;
        let utterance = state.utterances;
        let epoch = state.epoch;

        let handle = match self.inner.capture.start_capture() {
            Ok(handle) => handle,
            Err(e) => {
                if matches!(e, Error::PermissionDenied) {
                    state.capture_disabled = true;
                }
                state.last_error = Some(e.to_string());
                state.record(SessionEvent::Failed {
                    utterance,
                    kind: e.kind(),
                });
                self.inner.publish(state);
                tracing::warn!(session = self.inner.id, error = %e, "capture did not start");
                return Err(e);
            }
        };

        state.transition(Phase::Listening);
        self.inner.publish(state);
        tracing::debug!(
            session = self.inner.id,
            utterance,
            capture = handle.id(),
            "listening"
        );

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _guard = CycleGuard {
                inner: Arc::clone(&inner),
                epoch,
            };
            let outcome = inner.listen_cycle(handle, epoch, utterance).await;
            let _ = tx.send(outcome);
        });

        Ok(ListenTicket { utterance, rx })
    }

    /// Close the capture window early; transcription proceeds as usual
    ///
    /// No-op unless listening.
    pub fn stop(&self) -> bool {
        if self.phase() != Phase::Listening {
            return false;
        }
        self.inner.capture.stop_capture()
    }

    /// Abandon whatever is in flight and return to idle
    ///
    /// Results of the abandoned cycle are dropped when they arrive.
    pub fn cancel(&self) {
        let mut state = self.inner.lock();
        state.epoch += 1;
        let was = state.phase;
        state.speech_outstanding = 0;
        state.recognized_text = None;
        state.transition(Phase::Idle);
        self.inner.publish(state);

        if was == Phase::Listening {
            self.inner.capture.stop_capture();
        }
        tracing::debug!(session = self.inner.id, was = %was, "session cancelled");
    }

    /// Reserve the speaker for one utterance
    ///
    /// # Errors
    ///
    /// Returns `ReentrancyRejected` while listening or processing
    pub fn begin_speech(&self) -> Result<()> {
        self.reserve_speech(false)
    }

    /// Reserve the speaker only if nothing else is queued or playing
    ///
    /// # Errors
    ///
    /// Returns `ReentrancyRejected` unless idle
    pub fn begin_exclusive_speech(&self) -> Result<()> {
        self.reserve_speech(true)
    }

    fn reserve_speech(&self, exclusive: bool) -> Result<()> {
        let mut state = self.inner.lock();
        let phase = state.phase;
        let busy = matches!(phase, Phase::Listening | Phase::Processing)
            || (exclusive && phase == Phase::Speaking);

        if busy {
            state.record(SessionEvent::Rejected {
                operation: "speak",
                phase,
            });
            drop(state);
            tracing::debug!(session = self.inner.id, %phase, "speak rejected");
            return Err(Error::ReentrancyRejected {
                operation: "speak",
                phase,
            });
        }

        state.speech_outstanding += 1;
        state.transition(Phase::Speaking);
        self.inner.publish(state);
        Ok(())
    }

    /// Release one speech reservation; the last one returns the session to idle
    pub fn end_speech(&self) {
        let mut state = self.inner.lock();
        state.speech_outstanding = state.speech_outstanding.saturating_sub(1);
        if state.speech_outstanding == 0 && state.phase == Phase::Speaking {
            state.transition(Phase::Idle);
        }
        self.inner.publish(state);
    }

    /// Number of utterances reserved but not yet finished
    #[must_use]
    pub fn speech_outstanding(&self) -> usize {
        self.inner.lock().speech_outstanding
    }

    /// Take the recognized text, clearing it so it is handled once
    #[must_use]
    pub fn take_recognized_text(&self) -> Option<String> {
        let mut state = self.inner.lock();
        let text = state.recognized_text.take();
        if text.is_some() {
            self.inner.publish(state);
        }
        text
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    /// Current observable state
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.lock().snapshot()
    }

    /// Subscribe to state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Copy of the event log, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<SessionEvent> {
        self.inner.lock().history.iter().cloned().collect()
    }

    /// Whether permission was denied and capture is disabled
    #[must_use]
    pub fn capture_disabled(&self) -> bool {
        self.inner.lock().capture_disabled
    }

    /// True exactly once after permission is denied
    ///
    /// Lets the caller explain the denial a single time instead of on
    /// every attempt.
    #[must_use]
    pub fn take_permission_notice(&self) -> bool {
        let mut state = self.inner.lock();
        if state.capture_disabled && !state.permission_notice_given {
            state.permission_notice_given = true;
            true
        } else {
            false
        }
    }

    /// Ask for microphone access again and re-enable capture if granted
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if access is still refused
    pub fn regrant(&self) -> Result<()> {
        self.inner.capture.request_permission()?;
        let mut state = self.inner.lock();
        state.capture_disabled = false;
        state.permission_notice_given = false;
        state.last_error = None;
        self.inner.publish(state);
        tracing::info!(session = self.inner.id, "microphone access restored");
        Ok(())
    }
}

impl fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceSession")
            .field("id", &self.inner.id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::voice::capture::{AudioSource, SAMPLE_RATE};
    use crate::voice::clip::AudioClip;

    struct ToneSource;

    impl AudioSource for ToneSource {
        fn request_permission(&mut self) -> Result<()> {
            Ok(())
        }
        fn start(&mut self) -> Result<()> {
            Ok(())
        }
        fn stop(&mut self) -> Result<Vec<f32>> {
            Ok(vec![0.3; 800])
        }
    }

    struct Echo(&'static str);

    #[async_trait]
    impl Transcriber for Echo {
        async fn transcribe(&self, _clip: AudioClip) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn session(text: &'static str) -> VoiceSession {
        let capture = CaptureUnit::new(Box::new(ToneSource), Duration::from_millis(10), SAMPLE_RATE);
        VoiceSession::new(capture, Arc::new(Echo(text)), Duration::from_secs(1))
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Speaking.to_string(), "speaking");
        assert_eq!(Phase::Idle.to_string(), "idle");
    }

    #[tokio::test]
    async fn test_happy_path_publishes_text() {
        let session = session("go back");
        let ticket = session.start().unwrap();
        assert_eq!(session.phase(), Phase::Listening);

        assert!(matches!(ticket.outcome().await, ListenOutcome::Recognized));
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.take_recognized_text().as_deref(), Some("go back"));
        assert_eq!(session.take_recognized_text(), None);
    }

    #[tokio::test]
    async fn test_start_while_listening_is_rejected() {
        let session = session("hi");
        let ticket = session.start().unwrap();

        let err = session.start().unwrap_err();
        assert!(matches!(
            err,
            Error::ReentrancyRejected {
                phase: Phase::Listening,
                ..
            }
        ));
        let _ = ticket.outcome().await;
    }

    #[tokio::test]
    async fn test_speech_blocks_listening() {
        let session = session("hi");
        session.begin_speech().unwrap();
        session.begin_speech().unwrap();

        assert!(session.start().is_err());
        session.end_speech();
        assert_eq!(session.phase(), Phase::Speaking);
        session.end_speech();
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.start().is_ok());
        assert!(session.begin_speech().is_err());
    }

    #[tokio::test]
    async fn test_cancel_discards_result() {
        let session = session("hello");
        let ticket = session.start().unwrap();
        session.cancel();

        assert!(matches!(ticket.outcome().await, ListenOutcome::Cancelled));
        assert_eq!(session.take_recognized_text(), None);
        assert!(
            session
                .history()
                .iter()
                .any(|e| matches!(e, SessionEvent::StaleDiscarded { .. }))
        );
    }
}
