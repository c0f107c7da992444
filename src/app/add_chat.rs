//! Start a chat with someone from the directory

use std::sync::Arc;

use async_trait::async_trait;

use super::backend::{ContactId, MessageStore};
use super::navigator::{Navigator, Route};
use crate::Result;
use crate::command::{Command, Grammar, Lexicon};
use crate::screen::{Reaction, Visit, VoiceScreen};

/// Commands understood on the add-chat screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddChatIntent {
    Back,
    Start,
}

/// Offers directory contacts without an open chat
pub struct AddChatScreen {
    store: Arc<dyn MessageStore>,
    nav: Navigator,
    grammar: Grammar<AddChatIntent>,
    lexicon: Lexicon<ContactId>,
}

impl AddChatScreen {
    /// Add-chat screen offering the directory contacts not yet chatted with
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, nav: Navigator) -> Self {
        let grammar = Grammar::new()
            .intent(AddChatIntent::Back, &["go back", "cancel"])
            .entity(AddChatIntent::Start, &["start chat with", "chat with", "add"], false);

        Self {
            store,
            nav,
            grammar,
            lexicon: Lexicon::new(),
        }
    }
}

#[async_trait]
impl VoiceScreen for AddChatScreen {
    type Intent = AddChatIntent;
    type Entity = ContactId;

    fn name(&self) -> &'static str {
        "add-chat"
    }

    fn grammar(&self) -> &Grammar<AddChatIntent> {
        &self.grammar
    }

    fn lexicon(&self) -> &Lexicon<ContactId> {
        &self.lexicon
    }

    async fn on_focus(&mut self) -> Result<()> {
        let active = self.store.active_chats().await?;
        self.lexicon = self
            .store
            .directory()
            .await?
            .into_iter()
            .filter(|c| !active.iter().any(|a| a.id == c.id))
            .map(|c| (c.name, c.id))
            .collect();
        Ok(())
    }

    fn greeting(&self, _visit: Visit) -> Vec<String> {
        if self.lexicon.is_empty() {
            return vec![
                "You already have a chat with everyone in your contacts. Say 'go back'."
                    .to_string(),
            ];
        }
        let names: Vec<&str> = self
            .lexicon
            .entries()
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        vec![format!(
            "Who would you like to chat with? You can add {}. Say a name, or say 'go back'.",
            names.join(", ")
        )]
    }

    async fn handle(&mut self, command: Command<AddChatIntent, ContactId>) -> Reaction {
        let nav = self.nav.clone();
        match command.matched_intent {
            Some(AddChatIntent::Back) => Reaction::say("Going back.").then_navigate(move || {
                nav.back();
            }),
            Some(AddChatIntent::Start) => {
                let Ok(entity) = command.require_entity() else {
                    return Reaction::say(format!(
                        "Sorry, I could not find {} in your contacts.",
                        command.query.as_deref().unwrap_or("that name")
                    ));
                };
                match self.store.start_chat(&entity.payload).await {
                    Ok(contact) => {
                        let id = contact.id.clone();
                        Reaction::say(format!("Chat opened with {}.", contact.name))
                            .then_navigate(move || nav.replace(Route::Conversation(id)))
                    }
                    Err(e) => Reaction::say(format!(
                        "Failed to start chat with {}: {e}.",
                        entity.name
                    )),
                }
            }
            None => Reaction::say("Sorry, I didn't understand. Say a name, or say 'go back'."),
        }
    }
}
