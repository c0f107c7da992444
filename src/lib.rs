//! Echo Bridge - hands-free voice control for a messaging client
//!
//! Each screen listens for a short window, sends the clip to a cloud
//! speech-to-text service, turns the text into a command and speaks its
//! response. The pieces:
//!
//! - Voice session: the listen/process/speak state machine that keeps the
//!   microphone and the speaker from overlapping
//! - Command interpreter: keyword intents plus fuzzy name matching
//! - Screen driver: greeting, listen loop and teardown per focus period
//! - App: the chat screens wired to a message store
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                        App                           │
//! │   Chats  │  Conversation  │  Add chat  │  Profile  │ │
//! └────────────────────┬────────────────────────────────┘
//!                      │ VoiceScreen
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Screen driver                       │
//! │   Greeting  │  Listen loop  │  Interpreter          │
//! └────────────────────┬────────────────────────────────┘
//!                      │ Mount
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Voice engine                        │
//! │   Capture  │  STT  │  Session  │  Speech queue      │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod app;
pub mod command;
pub mod config;
pub mod error;
pub mod screen;
pub mod voice;

pub use command::{Command, Grammar, Interpreter, Lexicon};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use screen::{Reaction, ScreenDriver, VoiceScreen};
pub use voice::{VoiceEngine, VoiceSession};
