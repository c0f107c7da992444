//! Drives whichever screen is on top of the navigation stack

use std::collections::HashMap;
use std::sync::Arc;

use super::add_chat::AddChatScreen;
use super::backend::MessageStore;
use super::chats::ChatsScreen;
use super::conversation::ConversationScreen;
use super::help::HelpCenterScreen;
use super::navigator::{Exit, Navigator, Route};
use super::profile::ProfileScreen;
use crate::screen::{FocusEnd, GreetingGuard, ScreenDriver};
use crate::voice::VoiceEngine;

/// Why [`App::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppExit {
    /// A screen ended the app
    Finished(Exit),
    /// Microphone access was refused
    PermissionDenied,
    /// The microphone stopped working
    Halted,
}

/// The voice-driven chat app
pub struct App {
    store: Arc<dyn MessageStore>,
    nav: Navigator,
    driver: ScreenDriver,
    guards: HashMap<String, GreetingGuard>,
}

impl App {
    /// App starting on the chats screen
    #[must_use]
    pub fn new(engine: Arc<VoiceEngine>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            store,
            nav: Navigator::new(Route::Chats),
            driver: ScreenDriver::new(engine),
            guards: HashMap::new(),
        }
    }

    /// Navigation handle, for driving the app from outside
    #[must_use]
    pub const fn navigator(&self) -> &Navigator {
        &self.nav
    }

    /// Run screens until one of them ends the app
    pub async fn run(&mut self) -> AppExit {
        loop {
            if let Some(exit) = self.nav.exit() {
                return AppExit::Finished(exit);
            }
            let Some(route) = self.nav.current() else {
                return AppExit::Finished(Exit::Quit);
            };

            let end = self.focus(route).await;
            match end {
                FocusEnd::PermissionDenied => return AppExit::PermissionDenied,
                FocusEnd::Halted => return AppExit::Halted,
                FocusEnd::Navigated | FocusEnd::FocusLost => {}
            }
        }
    }

    async fn focus(&mut self, route: Route) -> FocusEnd {
        let mut focus = self.nav.subscribe();
        let guard = self.guards.entry(route.key()).or_default();
        let store = Arc::clone(&self.store);
        let nav = self.nav.clone();

        match route {
            Route::Chats => {
                let mut screen = ChatsScreen::new(store, nav);
                self.driver.run(&mut screen, guard, &mut focus).await
            }
            Route::Conversation(id) => {
                let mut screen = ConversationScreen::new(id, store, nav);
                self.driver.run(&mut screen, guard, &mut focus).await
            }
            Route::AddChat => {
                let mut screen = AddChatScreen::new(store, nav);
                self.driver.run(&mut screen, guard, &mut focus).await
            }
            Route::Profile => {
                let mut screen = ProfileScreen::new(nav);
                self.driver.run(&mut screen, guard, &mut focus).await
            }
            Route::HelpCenter => {
                let mut screen = HelpCenterScreen::new(nav);
                self.driver.run(&mut screen, guard, &mut focus).await
            }
        }
    }
}
