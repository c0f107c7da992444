//! Stack navigation between screens
//!
//! Every change bumps a generation counter published over a watch channel;
//! the screen driver treats a new generation as focus loss.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use super::backend::ContactId;

/// A screen in the app
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Active chats list
    Chats,
    /// One conversation
    Conversation(ContactId),
    /// Start a chat with someone from the directory
    AddChat,
    /// Profile menu
    Profile,
    /// Help topics read aloud
    HelpCenter,
}

impl Route {
    /// Key identifying this screen for greeting bookkeeping
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Chats => "chats".to_string(),
            Self::Conversation(id) => format!("conversation:{id}"),
            Self::AddChat => "add-chat".to_string(),
            Self::Profile => "profile".to_string(),
            Self::HelpCenter => "help-center".to_string(),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// How the app ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// "exit app"
    Quit,
    /// "log out"
    LoggedOut,
}

struct NavState {
    stack: Vec<Route>,
    exit: Option<Exit>,
}

/// Navigation stack shared by the runner and the screens
#[derive(Clone)]
pub struct Navigator {
    state: Arc<Mutex<NavState>>,
    tx: Arc<watch::Sender<u64>>,
}

impl Navigator {
    /// Start at `root`
    #[must_use]
    pub fn new(root: Route) -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(NavState {
                stack: vec![root],
                exit: None,
            })),
            tx: Arc::new(tx),
        }
    }

    /// Subscribe to focus changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    /// Screen on top of the stack
    #[must_use]
    pub fn current(&self) -> Option<Route> {
        self.lock().stack.last().cloned()
    }

    /// Push `route`
    pub fn navigate(&self, route: Route) {
        tracing::debug!(route = %route, "navigate");
        self.lock().stack.push(route);
        self.notify();
    }

    /// Replace the top of the stack with `route`
    pub fn replace(&self, route: Route) {
        tracing::debug!(route = %route, "replace");
        let mut state = self.lock();
        state.stack.pop();
        state.stack.push(route);
        drop(state);
        self.notify();
    }

    /// Pop the top screen; the root is never popped
    pub fn back(&self) -> bool {
        let mut state = self.lock();
        if state.stack.len() <= 1 {
            return false;
        }
        state.stack.pop();
        drop(state);
        tracing::debug!("back");
        self.notify();
        true
    }

    /// Clear the stack down to `route`
    pub fn reset(&self, route: Route) {
        let mut state = self.lock();
        state.stack.clear();
        state.stack.push(route);
        drop(state);
        self.notify();
    }

    /// End the app
    pub fn finish(&self, exit: Exit) {
        tracing::info!(exit = ?exit, "app finishing");
        self.lock().exit = Some(exit);
        self.notify();
    }

    /// Set once the app has been asked to end
    #[must_use]
    pub fn exit(&self) -> Option<Exit> {
        self.lock().exit
    }

    /// Number of screens on the stack
    #[must_use]
    pub fn depth(&self) -> usize {
        self.lock().stack.len()
    }

    fn notify(&self) {
        self.tx.send_modify(|generation| *generation += 1);
    }

    fn lock(&self) -> MutexGuard<'_, NavState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
