//! Chat backend boundary
//!
//! Screens only see [`MessageStore`]; the in-memory store stands in for the
//! REST backend and is seeded with a small demo directory.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Identifier of a contact
pub type ContactId = String;

/// Someone the user can chat with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub name: String,
}

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    /// The app's user
    User,
    /// The other side of the conversation
    Contact,
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub author: Author,
    pub read: bool,
    pub sent_at: DateTime<Utc>,
}

/// Chat data as seen by the voice screens
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Contacts with an open conversation, most recent first
    async fn active_chats(&self) -> Result<Vec<Contact>>;

    /// Everyone the user could start a chat with
    async fn directory(&self) -> Result<Vec<Contact>>;

    /// Look up one contact
    async fn contact(&self, id: &str) -> Result<Contact>;

    /// Open a conversation with a directory contact
    async fn start_chat(&self, id: &str) -> Result<Contact>;

    /// Messages in a conversation, oldest first
    async fn messages(&self, id: &str) -> Result<Vec<Message>>;

    /// Mark every incoming message in a conversation as read
    async fn mark_read(&self, id: &str) -> Result<()>;

    /// Send a message from the user
    async fn send(&self, id: &str, text: &str) -> Result<Message>;

    /// Remove the user's most recent message, if any
    async fn delete_last_sent(&self, id: &str) -> Result<Option<Message>>;

    /// The contact's answer to the user's latest message, if one arrives
    ///
    /// The answer is stored as read, since it is spoken straight away.
    async fn await_reply(&self, id: &str) -> Result<Option<Message>>;
}

/// What every demo contact answers with
pub const SIMULATED_REPLY: &str = "This is a simulated reply.";

#[derive(Default)]
struct StoreState {
    directory: Vec<Contact>,
    /// Contact ids with an open chat, most recent first
    active: Vec<ContactId>,
    conversations: HashMap<ContactId, Vec<Message>>,
}

/// [`MessageStore`] kept in memory
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with demo contacts and unread messages
    #[must_use]
    pub fn demo() -> Self {
        let store = Self::new();
        let seed: &[(&str, &str, &[(&str, bool)])] = &[
            (
                "1",
                "Angel",
                &[
                    ("Hey, I saw the new project docs.", false),
                    ("Please help me find a good monitor for the design team.", false),
                ],
            ),
            ("2", "Rahul", &[("I am doing great, thanks for asking!", false)]),
            (
                "3",
                "Sam",
                &[
                    ("Did everyone submit their report?", false),
                    ("No one can come today?", false),
                ],
            ),
            ("4", "Amal", &[("Sure, I'll let you know!", false)]),
            ("5", "Rohit", &[("Hey Yato, How are you!", true)]),
        ];

        for (id, name, messages) in seed {
            store.add_contact(id, name);
            for (text, read) in *messages {
                store.receive(id, text, *read);
            }
        }
        store.add_contact("6", "Priya");
        store.add_contact("7", "Vikram");
        store
    }

    /// Add a directory contact without opening a chat
    pub fn add_contact(&self, id: &str, name: &str) {
        self.lock().directory.push(Contact {
            id: id.to_string(),
            name: name.to_string(),
        });
    }

    /// Record an incoming message, opening the chat if needed
    pub fn receive(&self, id: &str, text: &str, read: bool) {
        let mut state = self.lock();
        if !state.active.iter().any(|a| a == id) {
            state.active.push(id.to_string());
        }
        state
            .conversations
            .entry(id.to_string())
            .or_default()
            .push(new_message(text, Author::Contact, read));
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn new_message(text: &str, author: Author, read: bool) -> Message {
    Message {
        id: Uuid::new_v4().to_string(),
        text: text.to_string(),
        author,
        read,
        sent_at: Utc::now(),
    }
}

fn unknown(id: &str) -> Error {
    Error::Backend(format!("unknown contact: {id}"))
}

impl StoreState {
    fn find(&self, id: &str) -> Result<Contact> {
        self.directory
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| unknown(id))
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn active_chats(&self) -> Result<Vec<Contact>> {
        let state = self.lock();
        state.active.iter().map(|id| state.find(id)).collect()
    }

    async fn directory(&self) -> Result<Vec<Contact>> {
        Ok(self.lock().directory.clone())
    }

    async fn contact(&self, id: &str) -> Result<Contact> {
        self.lock().find(id)
    }

    async fn start_chat(&self, id: &str) -> Result<Contact> {
        let mut state = self.lock();
        let contact = state.find(id)?;
        state.active.retain(|a| a != id);
        state.active.insert(0, id.to_string());
        state.conversations.entry(id.to_string()).or_default();
        tracing::debug!(contact = %contact.name, "chat started");
        Ok(contact)
    }

    async fn messages(&self, id: &str) -> Result<Vec<Message>> {
        let state = self.lock();
        state.find(id)?;
        Ok(state.conversations.get(id).cloned().unwrap_or_default())
    }

    async fn mark_read(&self, id: &str) -> Result<()> {
        if let Some(messages) = self.lock().conversations.get_mut(id) {
            for message in messages.iter_mut() {
                message.read = true;
            }
        }
        Ok(())
    }

    async fn send(&self, id: &str, text: &str) -> Result<Message> {
        let mut state = self.lock();
        state.find(id)?;
        let message = new_message(text, Author::User, true);
        state
            .conversations
            .entry(id.to_string())
            .or_default()
            .push(message.clone());
        tracing::debug!(contact = id, "message sent");
        Ok(message)
    }

    async fn delete_last_sent(&self, id: &str) -> Result<Option<Message>> {
        let mut state = self.lock();
        let Some(messages) = state.conversations.get_mut(id) else {
            return Ok(None);
        };
        let position = messages.iter().rposition(|m| m.author == Author::User);
        Ok(position.map(|i| messages.remove(i)))
    }

    async fn await_reply(&self, id: &str) -> Result<Option<Message>> {
        let mut state = self.lock();
        state.find(id)?;
        let messages = state.conversations.entry(id.to_string()).or_default();
        if messages.last().is_none_or(|m| m.author != Author::User) {
            return Ok(None);
        }

        let reply = new_message(SIMULATED_REPLY, Author::Contact, true);
        messages.push(reply.clone());
        Ok(Some(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_store() {
        let store = InMemoryStore::demo();
        let active = store.active_chats().await.unwrap();
        assert_eq!(active.len(), 5);
        assert_eq!(active[0].name, "Angel");
        assert_eq!(store.directory().await.unwrap().len(), 7);

        let unread = store
            .messages("1")
            .await
            .unwrap()
            .iter()
            .filter(|m| !m.read)
            .count();
        assert_eq!(unread, 2);
    }

    #[tokio::test]
    async fn test_send_and_delete_last() {
        let store = InMemoryStore::demo();
        store.send("2", "first").await.unwrap();
        store.send("2", "second").await.unwrap();

        let deleted = store.delete_last_sent("2").await.unwrap().unwrap();
        assert_eq!(deleted.text, "second");

        let texts: Vec<_> = store
            .messages("2")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["I am doing great, thanks for asking!", "first"]);
    }

    #[tokio::test]
    async fn test_reply_follows_sent_message_only() {
        let store = InMemoryStore::demo();
        assert_eq!(store.await_reply("3").await.unwrap(), None);

        store.send("3", "See you at five").await.unwrap();
        let reply = store.await_reply("3").await.unwrap().unwrap();
        assert_eq!(reply.author, Author::Contact);
        assert!(reply.read);
        assert_eq!(store.await_reply("3").await.unwrap(), None);
        assert!(store.await_reply("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_start_chat_moves_to_front() {
        let store = InMemoryStore::demo();
        store.start_chat("6").await.unwrap();
        assert_eq!(store.active_chats().await.unwrap()[0].name, "Priya");
        assert!(store.start_chat("missing").await.is_err());
    }
}
