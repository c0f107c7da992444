//! Profile menu

use async_trait::async_trait;

use super::navigator::{Exit, Navigator, Route};
use crate::command::{Command, Grammar, Lexicon};
use crate::screen::{Reaction, Visit, VoiceScreen};

/// Commands understood on the profile screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileIntent {
    Chats,
    HelpCenter,
    LogOut,
}

pub struct ProfileScreen {
    nav: Navigator,
    grammar: Grammar<ProfileIntent>,
    lexicon: Lexicon<()>,
}

impl ProfileScreen {
    /// Profile screen
    #[must_use]
    pub fn new(nav: Navigator) -> Self {
        let grammar = Grammar::new()
            .intent(ProfileIntent::Chats, &["go to chats", "go to homepage", "go back"])
            .intent(ProfileIntent::HelpCenter, &["go to help center", "help"])
            .intent(ProfileIntent::LogOut, &["log out", "logout"]);

        Self {
            nav,
            grammar,
            lexicon: Lexicon::new(),
        }
    }
}

#[async_trait]
impl VoiceScreen for ProfileScreen {
    type Intent = ProfileIntent;
    type Entity = ();

    fn name(&self) -> &'static str {
        "profile"
    }

    fn grammar(&self) -> &Grammar<ProfileIntent> {
        &self.grammar
    }

    fn lexicon(&self) -> &Lexicon<()> {
        &self.lexicon
    }

    fn greeting(&self, _visit: Visit) -> Vec<String> {
        vec![
            "You are on the profile screen. Say 'go to chats', 'go to help center', or 'log out'."
                .to_string(),
        ]
    }

    async fn handle(&mut self, command: Command<ProfileIntent, ()>) -> Reaction {
        let nav = self.nav.clone();
        match command.matched_intent {
            Some(ProfileIntent::Chats) => Reaction::say("Navigating to chats.")
                .then_navigate(move || nav.reset(Route::Chats)),
            Some(ProfileIntent::HelpCenter) => Reaction::say("Navigating to help center.")
                .then_navigate(move || nav.navigate(Route::HelpCenter)),
            Some(ProfileIntent::LogOut) => Reaction::say("Logging you out. Goodbye!")
                .then_navigate(move || nav.finish(Exit::LoggedOut)),
            None => Reaction::say(
                "Sorry, I didn't understand that command on the profile screen. Please try again.",
            ),
        }
    }
}
