//! Active chats list

use std::sync::Arc;

use async_trait::async_trait;

use super::backend::{ContactId, MessageStore};
use super::navigator::{Exit, Navigator, Route};
use crate::Result;
use crate::command::{Command, Grammar, Lexicon};
use crate::screen::{Reaction, Visit, VoiceScreen};

/// Commands understood on the chats list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatsIntent {
    ExitApp,
    Profile,
    HelpCenter,
    LogOut,
    AddChat,
    ChatWith,
}

/// Lists active chats and opens one by name
pub struct ChatsScreen {
    store: Arc<dyn MessageStore>,
    nav: Navigator,
    grammar: Grammar<ChatsIntent>,
    lexicon: Lexicon<ContactId>,
    load_error: Option<String>,
}

impl ChatsScreen {
    /// Chats screen backed by `store`
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, nav: Navigator) -> Self {
        let grammar = Grammar::new()
            .intent(ChatsIntent::ExitApp, &["exit app"])
            .intent(ChatsIntent::Profile, &["go to profile"])
            .intent(ChatsIntent::HelpCenter, &["go to help center", "help"])
            .intent(ChatsIntent::LogOut, &["log out", "logout"])
            .intent(ChatsIntent::AddChat, &["add new chat", "new chat"])
            .entity(ChatsIntent::ChatWith, &["chat with", "open chat with"], true);

        Self {
            store,
            nav,
            grammar,
            lexicon: Lexicon::new(),
            load_error: None,
        }
    }
}

#[async_trait]
impl VoiceScreen for ChatsScreen {
    type Intent = ChatsIntent;
    type Entity = ContactId;

    fn name(&self) -> &'static str {
        "chats"
    }

    fn grammar(&self) -> &Grammar<ChatsIntent> {
        &self.grammar
    }

    fn lexicon(&self) -> &Lexicon<ContactId> {
        &self.lexicon
    }

    async fn on_focus(&mut self) -> Result<()> {
        match self.store.active_chats().await {
            Ok(chats) => {
                self.lexicon = chats.into_iter().map(|c| (c.name, c.id)).collect();
                self.load_error = None;
                tracing::debug!(chats = self.lexicon.len(), "chat lexicon rebuilt");
                Ok(())
            }
            Err(e) => {
                self.load_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn greeting(&self, visit: Visit) -> Vec<String> {
        if let Some(error) = &self.load_error {
            return vec![format!("There was an error loading your chats: {error}")];
        }
        let line = match visit {
            Visit::First => {
                "Welcome to your active chats. Say 'chat with' and a name, 'add new chat', \
                 'go to profile', or 'log out'."
            }
            Visit::Returning => {
                "You are on the chats screen. To open a chat, say 'chat with' and the person's name."
            }
        };
        vec![line.to_string()]
    }

    async fn handle(&mut self, command: Command<ChatsIntent, ContactId>) -> Reaction {
        let nav = self.nav.clone();
        match command.matched_intent {
            Some(ChatsIntent::ExitApp) => {
                Reaction::say("Goodbye!").then_navigate(move || nav.finish(Exit::Quit))
            }
            Some(ChatsIntent::Profile) => Reaction::say("Navigating to profile.")
                .then_navigate(move || nav.navigate(Route::Profile)),
            Some(ChatsIntent::HelpCenter) => Reaction::say("Navigating to help center.")
                .then_navigate(move || nav.navigate(Route::HelpCenter)),
            Some(ChatsIntent::LogOut) => Reaction::say("Logging you out. Goodbye!")
                .then_navigate(move || nav.finish(Exit::LoggedOut)),
            Some(ChatsIntent::AddChat) => Reaction::say("Opening new chat screen to add a person.")
                .then_navigate(move || nav.navigate(Route::AddChat)),
            Some(ChatsIntent::ChatWith) => match command.require_entity() {
                Ok(entity) => {
                    let id = entity.payload.clone();
                    Reaction::say(format!("Opening chat with {}", entity.name))
                        .then_navigate(move || nav.navigate(Route::Conversation(id)))
                }
                Err(_) => Reaction::say(format!(
                    "Sorry, I could not find an active chat with {}. Try saying 'add new chat' \
                     to start one.",
                    command.query.as_deref().unwrap_or("that name")
                )),
            },
            None => Reaction::say("Sorry, I didn't understand that command."),
        }
    }
}
