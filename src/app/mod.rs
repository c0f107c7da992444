//! Voice-driven chat app
//!
//! Five screens over a [`MessageStore`], switched by a stack [`Navigator`]
//! and run one at a time by [`App`].

mod add_chat;
mod backend;
mod chats;
mod conversation;
mod help;
mod navigator;
mod profile;
mod runner;

pub use add_chat::{AddChatIntent, AddChatScreen};
pub use backend::{
    Author, Contact, ContactId, InMemoryStore, Message, MessageStore, SIMULATED_REPLY,
};
pub use chats::{ChatsIntent, ChatsScreen};
pub use conversation::{ConversationIntent, ConversationScreen};
pub use help::{HELP_TOPICS, HelpCenterScreen, HelpIntent};
pub use navigator::{Exit, Navigator, Route};
pub use profile::{ProfileIntent, ProfileScreen};
pub use runner::{App, AppExit};
