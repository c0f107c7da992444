//! Screen orchestration
//!
//! A screen that wants voice control implements [`VoiceScreen`]; the
//! [`ScreenDriver`] runs it for one focus period:
//!
//! 1. refresh the screen's lexicon
//! 2. speak the greeting, once per focus gain
//! 3. listen, interpret, react, and listen again
//!
//! When focus moves elsewhere the driver cancels capture, flushes speech
//! and re-arms the greeting for the next visit.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::command::{Command, Grammar, Lexicon};
use crate::error::ErrorKind;
use crate::voice::{ListenOutcome, Mount, SpeakMode, SpeechOutcome, VoiceEngine};
use crate::{Error, Result};

/// Spoken after an utterance that could not be understood
pub const DEFAULT_APOLOGY: &str = "Sorry, I didn't catch that. Please try again.";

/// Spoken once when the microphone is unavailable
pub const DEFAULT_PERMISSION_NOTICE: &str =
    "I can't use the microphone. Please allow microphone access to use voice commands.";

/// Pause before retrying after a refused start
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Whether the screen has been greeted before
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// First focus since launch
    First,
    /// Focused again after leaving
    Returning,
}

/// Sticky flag making the greeting fire once per focus gain
#[derive(Debug, Default)]
pub struct GreetingGuard {
    sent: bool,
    visits: u32,
}

impl GreetingGuard {
    /// Claim the greeting for this focus period
    ///
    /// Returns `None` if it was already claimed since the last [`reset`].
    ///
    /// [`reset`]: Self::reset
    pub fn arm(&mut self) -> Option<Visit> {
        if self.sent {
            return None;
        }
        self.sent = true;
        self.visits += 1;
        Some(if self.visits == 1 {
            Visit::First
        } else {
            Visit::Returning
        })
    }

    /// Focus lost: let the greeting fire again on the next visit
    pub fn reset(&mut self) {
        self.sent = false;
    }

    /// Number of focus periods greeted so far
    #[must_use]
    pub const fn visits(&self) -> u32 {
        self.visits
    }
}

/// What happens after a reaction has been spoken
pub enum Next {
    /// Open the microphone again
    Listen,
    /// Run a navigation action; this screen's focus period ends
    Navigate(Box<dyn FnOnce() + Send>),
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listen => write!(f, "Listen"),
            Self::Navigate(_) => write!(f, "Navigate(..)"),
        }
    }
}

/// A screen's response to one command
#[derive(Debug)]
pub struct Reaction {
    /// Utterances spoken in order before `then`
    pub speech: Vec<String>,
    /// Follow-up once speech has finished
    pub then: Next,
}

impl Reaction {
    /// Say one thing and keep listening
    #[must_use]
    pub fn say(text: impl Into<String>) -> Self {
        Self {
            speech: vec![text.into()],
            then: Next::Listen,
        }
    }

    /// Say several things in order and keep listening
    #[must_use]
    pub fn say_all<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            speech: texts.into_iter().map(Into::into).collect(),
            then: Next::Listen,
        }
    }

    /// Keep listening without saying anything
    #[must_use]
    pub const fn listen() -> Self {
        Self {
            speech: Vec::new(),
            then: Next::Listen,
        }
    }

    /// Navigate once speech has finished
    #[must_use]
    pub fn then_navigate(mut self, action: impl FnOnce() + Send + 'static) -> Self {
        self.then = Next::Navigate(Box::new(action));
        self
    }
}

/// A screen driven by voice
#[async_trait]
pub trait VoiceScreen: Send {
    /// The screen's intent vocabulary
    type Intent: Copy + Send + Sync + fmt::Debug;
    /// Payload carried by lexicon entries
    type Entity: Clone + Send + Sync;

    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Intents this screen understands
    fn grammar(&self) -> &Grammar<Self::Intent>;

    /// Names this screen offers for fuzzy matching
    fn lexicon(&self) -> &Lexicon<Self::Entity>;

    /// Focus gained: rebuild the lexicon from current data
    ///
    /// # Errors
    ///
    /// Returns error if the backing data cannot be read; the driver logs it
    /// and continues with the previous lexicon
    async fn on_focus(&mut self) -> Result<()> {
        Ok(())
    }

    /// Introduction spoken once per focus gain
    fn greeting(&self, visit: Visit) -> Vec<String>;

    /// React to one interpreted utterance
    async fn handle(&mut self, command: Command<Self::Intent, Self::Entity>) -> Reaction;
}

/// Why a focus period ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusEnd {
    /// The screen navigated away itself
    Navigated,
    /// Focus moved elsewhere or the mount was torn down
    FocusLost,
    /// Microphone access is refused; nothing more to listen for
    PermissionDenied,
    /// The microphone failed in a way listening again will not fix
    Halted,
}

/// Runs voice screens against a [`VoiceEngine`]
pub struct ScreenDriver {
    engine: Arc<VoiceEngine>,
    apology: String,
    permission_notice: String,
}

impl ScreenDriver {
    /// Create a driver with the default spoken messages
    #[must_use]
    pub fn new(engine: Arc<VoiceEngine>) -> Self {
        Self {
            engine,
            apology: DEFAULT_APOLOGY.to_string(),
            permission_notice: DEFAULT_PERMISSION_NOTICE.to_string(),
        }
    }

    /// Engine this driver mounts sessions on
    #[must_use]
    pub const fn engine(&self) -> &Arc<VoiceEngine> {
        &self.engine
    }

    /// Run `screen` until it navigates away or `focus` changes
    pub async fn run<S: VoiceScreen>(
        &self,
        screen: &mut S,
        guard: &mut GreetingGuard,
        focus: &mut watch::Receiver<u64>,
    ) -> FocusEnd {
        focus.mark_unchanged();
        let mount = self.engine.mount();
        let name = screen.name();
        tracing::info!(screen = name, session = mount.session.id(), "screen focused");

        let end = tokio::select! {
            end = self.focus_period(screen, guard, &mount) => end,
            _ = focus.changed() => FocusEnd::FocusLost,
        };

        self.engine.unmount(&mount.session);
        guard.reset();
        tracing::info!(screen = name, end = ?end, "screen unfocused");
        end
    }

    async fn focus_period<S: VoiceScreen>(
        &self,
        screen: &mut S,
        guard: &mut GreetingGuard,
        mount: &Mount,
    ) -> FocusEnd {
        if let Err(e) = screen.on_focus().await {
            tracing::warn!(screen = screen.name(), error = %e, "failed to refresh lexicon");
        }

        if let Some(visit) = guard.arm() {
            let lines = screen.greeting(visit);
            if !self.say(mount, lines).await {
                return FocusEnd::FocusLost;
            }
        }

        let interpreter = self.engine.interpreter();
        let max_apologies = self.engine.max_consecutive_apologies();
        let mut failures = 0u32;

        loop {
            let ticket = match mount.session.start() {
                Ok(ticket) => ticket,
                Err(Error::ReentrancyRejected { .. }) => {
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
                Err(Error::PermissionDenied) => {
                    self.notify_permission(mount).await;
                    return FocusEnd::PermissionDenied;
                }
                Err(e) => {
                    tracing::error!(error = %e, "cannot open the microphone");
                    self.apologize(mount).await;
                    return FocusEnd::Halted;
                }
            };

            match ticket.outcome().await {
                ListenOutcome::Cancelled => return FocusEnd::FocusLost,
                ListenOutcome::Failed(e) => match e.kind() {
                    ErrorKind::PermissionDenied => {
                        self.notify_permission(mount).await;
                        return FocusEnd::PermissionDenied;
                    }
                    _ if matches!(e, Error::EmptyResult) => {
                        tracing::debug!("nothing heard, listening again");
                    }
                    _ => {
                        failures += 1;
                        if failures <= max_apologies {
                            self.apologize(mount).await;
                        } else {
                            tracing::debug!(failures, "apology limit reached, staying quiet");
                        }
                    }
                },
                ListenOutcome::Recognized => {
                    failures = 0;
                    // Cleared before dispatch so the same text is never handled twice
                    let Some(text) = mount.session.take_recognized_text() else {
                        continue;
                    };

                    let command = interpreter.interpret(&text, screen.lexicon(), screen.grammar());
                    tracing::info!(
                        screen = screen.name(),
                        text = %text,
                        intent = ?command.matched_intent,
                        entity = command.matched_entity.as_ref().map(|m| m.name.as_str()),
                        "command interpreted"
                    );

                    let reaction = screen.handle(command).await;
                    if !self.say(mount, reaction.speech).await {
                        return FocusEnd::FocusLost;
                    }
                    if let Next::Navigate(action) = reaction.then {
                        action();
                        return FocusEnd::Navigated;
                    }
                }
            }
        }
    }

    /// Speak lines in order; false if the speech was flushed
    async fn say(&self, mount: &Mount, lines: Vec<String>) -> bool {
        if lines.is_empty() {
            return true;
        }
        match mount.sequencer.speak_all(lines).await {
            Ok(SpeechOutcome::Cancelled) => false,
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "speech refused");
                true
            }
        }
    }

    async fn apologize(&self, mount: &Mount) {
        match mount.sequencer.speak(self.apology.clone(), SpeakMode::Immediate) {
            Ok(ticket) => {
                ticket.done().await;
            }
            Err(e) => tracing::debug!(error = %e, "apology skipped"),
        }
    }

    async fn notify_permission(&self, mount: &Mount) {
        if mount.session.take_permission_notice() {
            self.say(mount, vec![self.permission_notice.clone()]).await;
        }
    }
}
