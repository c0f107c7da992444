//! Help center, read aloud topic by topic

use async_trait::async_trait;

use super::navigator::Navigator;
use crate::command::{Command, Grammar, Lexicon};
use crate::screen::{Reaction, Visit, VoiceScreen};

/// Help topics as (title, body)
pub const HELP_TOPICS: [(&str, &str); 4] = [
    (
        "Getting Started",
        "Welcome to Echo Bridge. To start a new chat, say 'Add new chat' on the main chat list \
         screen. To navigate, use commands like 'Go back' or 'Go to profile'.",
    ),
    (
        "Sending Messages",
        "In any chat, you can simply speak your message. The app will automatically transcribe \
         and send it. If you make a mistake, say 'Delete last message' to remove your last sent \
         message.",
    ),
    (
        "Navigating Chats",
        "On the main chat screen, say 'chat with' and a contact's name to open their chat. To \
         return to the main list from a chat, say 'Exit chat' or 'Go back'.",
    ),
    (
        "Accessibility Mode",
        "Accessibility mode provides voice guidance and hands-free interaction. Toggle it on or \
         off in the app settings, which can be found via the profile screen.",
    ),
];

/// Commands understood in the help center
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelpIntent {
    Back,
    Repeat,
}

pub struct HelpCenterScreen {
    nav: Navigator,
    grammar: Grammar<HelpIntent>,
    lexicon: Lexicon<()>,
}

impl HelpCenterScreen {
    /// Help center screen
    #[must_use]
    pub fn new(nav: Navigator) -> Self {
        let grammar = Grammar::new()
            .intent(HelpIntent::Back, &["go back", "exit"])
            .intent(HelpIntent::Repeat, &["repeat", "again"]);

        Self {
            nav,
            grammar,
            lexicon: Lexicon::new(),
        }
    }

    fn topics() -> impl Iterator<Item = String> {
        HELP_TOPICS
            .iter()
            .map(|(title, body)| format!("Topic: {title}. {body}"))
    }
}

#[async_trait]
impl VoiceScreen for HelpCenterScreen {
    type Intent = HelpIntent;
    type Entity = ();

    fn name(&self) -> &'static str {
        "help-center"
    }

    fn grammar(&self) -> &Grammar<HelpIntent> {
        &self.grammar
    }

    fn lexicon(&self) -> &Lexicon<()> {
        &self.lexicon
    }

    fn greeting(&self, _visit: Visit) -> Vec<String> {
        std::iter::once(
            "You are on the Help Center. I will now read the help topics. You can say 'go back' \
             or 'repeat'."
                .to_string(),
        )
        .chain(Self::topics())
        .collect()
    }

    async fn handle(&mut self, command: Command<HelpIntent, ()>) -> Reaction {
        match command.matched_intent {
            Some(HelpIntent::Back) => {
                let nav = self.nav.clone();
                Reaction::say("Going back.").then_navigate(move || {
                    nav.back();
                })
            }
            Some(HelpIntent::Repeat) => Reaction::say_all(
                std::iter::once("Repeating the help topics.".to_string()).chain(Self::topics()),
            ),
            None => Reaction::say("Sorry, I didn't understand. You can say 'go back' or 'repeat'."),
        }
    }
}
