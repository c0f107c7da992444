//! One conversation: reads unread messages, sends what the user says

use std::sync::Arc;

use async_trait::async_trait;

use super::backend::{Author, Contact, ContactId, MessageStore};
use super::navigator::Navigator;
use crate::Result;
use crate::command::{Command, Grammar, Lexicon};
use crate::screen::{Reaction, Visit, VoiceScreen};

/// Commands understood inside a conversation; anything else is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationIntent {
    Exit,
    DeleteLast,
}

/// Chat with one contact
///
/// Anything that is not a command is sent as a message.
pub struct ConversationScreen {
    contact_id: ContactId,
    contact: Option<Contact>,
    store: Arc<dyn MessageStore>,
    nav: Navigator,
    grammar: Grammar<ConversationIntent>,
    lexicon: Lexicon<()>,
    unread: Vec<String>,
}

impl ConversationScreen {
    /// Conversation with `contact_id`, loaded on first greeting
    #[must_use]
    pub fn new(contact_id: ContactId, store: Arc<dyn MessageStore>, nav: Navigator) -> Self {
        let grammar = Grammar::new()
            .intent(ConversationIntent::Exit, &["exit chat", "go back"])
            .intent(ConversationIntent::DeleteLast, &["delete last message"]);

        Self {
            contact_id,
            contact: None,
            store,
            nav,
            grammar,
            lexicon: Lexicon::new(),
            unread: Vec::new(),
        }
    }

    fn contact_name(&self) -> &str {
        self.contact.as_ref().map_or("this contact", |c| c.name.as_str())
    }
}

#[async_trait]
impl VoiceScreen for ConversationScreen {
    type Intent = ConversationIntent;
    type Entity = ();

    fn name(&self) -> &'static str {
        "conversation"
    }

    fn grammar(&self) -> &Grammar<ConversationIntent> {
        &self.grammar
    }

    fn lexicon(&self) -> &Lexicon<()> {
        &self.lexicon
    }

    async fn on_focus(&mut self) -> Result<()> {
        self.contact = Some(self.store.contact(&self.contact_id).await?);

        self.unread = self
            .store
            .messages(&self.contact_id)
            .await?
            .into_iter()
            .filter(|m| !m.read && m.author == Author::Contact)
            .map(|m| m.text)
            .collect();
        self.store.mark_read(&self.contact_id).await?;

        tracing::debug!(contact = %self.contact_id, unread = self.unread.len(), "conversation loaded");
        Ok(())
    }

    fn greeting(&self, _visit: Visit) -> Vec<String> {
        let name = self.contact_name();
        let mut lines = Vec::with_capacity(self.unread.len() + 2);

        if self.unread.is_empty() {
            lines.push(format!("You are now chatting with {name}."));
        } else {
            let plural = if self.unread.len() > 1 { "s" } else { "" };
            lines.push(format!(
                "You have {} unread message{plural} from {name}.",
                self.unread.len()
            ));
            lines.extend(self.unread.iter().cloned());
        }
        lines.push("Say your message or say exit chat.".to_string());
        lines
    }

    async fn handle(&mut self, command: Command<ConversationIntent, ()>) -> Reaction {
        match command.matched_intent {
            Some(ConversationIntent::Exit) => {
                let nav = self.nav.clone();
                Reaction::say("Exiting chat.").then_navigate(move || {
                    nav.back();
                })
            }
            Some(ConversationIntent::DeleteLast) => {
                match self.store.delete_last_sent(&self.contact_id).await {
                    Ok(Some(message)) => {
                        Reaction::say(format!("Deleted your last message: {}", message.text))
                    }
                    Ok(None) => Reaction::say("You have no sent messages to delete."),
                    Err(e) => {
                        tracing::warn!(error = %e, "delete failed");
                        Reaction::say("Sorry, I could not delete the message.")
                    }
                }
            }
            None => match self.store.send(&self.contact_id, &command.raw_text).await {
                Ok(message) => {
                    let mut lines = vec![format!("You said: {}", message.text)];
                    lines.extend(self.reply_line().await);
                    Reaction::say_all(lines)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "send failed");
                    Reaction::say("Sorry, your message could not be sent.")
                }
            },
        }
    }
}

impl ConversationScreen {
    /// Announce the contact's answer; a failed lookup just stays quiet
    async fn reply_line(&self) -> Option<String> {
        match self.store.await_reply(&self.contact_id).await {
            Ok(reply) => reply
                .map(|m| format!("New message from {}: {}", self.contact_name(), m.text)),
            Err(e) => {
                tracing::warn!(error = %e, "reply lookup failed");
                None
            }
        }
    }
}
