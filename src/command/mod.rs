//! Command interpretation
//!
//! Turns recognized text into a [`Command`]: first by keyword intents in
//! priority order, then by fuzzy-matching a spoken name against the active
//! screen's [`Lexicon`].

pub mod fuzzy;

use std::sync::LazyLock;

use regex::Regex;

pub use fuzzy::{EditDistance, Phonetic, Scorer};

use crate::config::MatchingConfig;
use crate::{Error, Result};

/// Anything that is not a letter, digit or whitespace
static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}\s]+").expect("valid regex"));

/// Runs of whitespace
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Lower-case, strip punctuation, collapse whitespace
///
/// Apostrophes are removed outright so "what's" becomes "whats"; every other
/// punctuation mark separates words.
#[must_use]
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase().replace(['\'', '’'], "");
    let spaced = PUNCTUATION.replace_all(&lowered, " ");
    WHITESPACE.replace_all(spaced.trim(), " ").into_owned()
}

/// Whether `phrase` occurs in `text` on word boundaries
///
/// Both must already be normalized.
fn contains_phrase(text: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    format!(" {text} ").contains(&format!(" {phrase} "))
}

struct IntentRule<K> {
    intent: K,
    phrases: Vec<String>,
}

struct EntityRule<K> {
    intent: K,
    prefixes: Vec<String>,
    prefix_required: bool,
}

/// The intents one screen understands
///
/// Keyword intents are tried in the order they were added and always outrank
/// the entity rule, so a navigation phrase is never shadowed by a name.
pub struct Grammar<K> {
    intents: Vec<IntentRule<K>>,
    entity: Option<EntityRule<K>>,
}

impl<K: Copy> Grammar<K> {
    /// Empty grammar
    #[must_use]
    pub const fn new() -> Self {
        Self {
            intents: Vec::new(),
            entity: None,
        }
    }

    /// Add a keyword intent matched when any phrase occurs in the text
    #[must_use]
    pub fn intent(mut self, intent: K, phrases: &[&str]) -> Self {
        self.intents.push(IntentRule {
            intent,
            phrases: phrases.iter().map(|p| normalize(p)).collect(),
        });
        self
    }

    /// Resolve names after one of `prefixes` ("chat with") against the lexicon
    ///
    /// Without a prefix the whole utterance is the query unless
    /// `prefix_required` is set.
    #[must_use]
    pub fn entity(mut self, intent: K, prefixes: &[&str], prefix_required: bool) -> Self {
        self.entity = Some(EntityRule {
            intent,
            prefixes: prefixes.iter().map(|p| normalize(p)).collect(),
            prefix_required,
        });
        self
    }
}

impl<K: Copy> Default for Grammar<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// One fuzzy-matchable name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexiconEntry<P> {
    /// Name as displayed and spoken back
    pub name: String,
    /// Whatever the screen needs to act on a match
    pub payload: P,
}

/// Ordered names a screen offers for matching
///
/// Names are normalized once when the lexicon is built; rebuild it when the
/// underlying collection changes.
#[derive(Debug, Clone)]
pub struct Lexicon<P> {
    entries: Vec<LexiconEntry<P>>,
    keys: Vec<String>,
}

impl<P> Lexicon<P> {
    /// Empty lexicon
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            keys: Vec::new(),
        }
    }

    /// Append an entry, keeping insertion order
    pub fn push(&mut self, name: impl Into<String>, payload: P) {
        let name = name.into();
        self.keys.push(normalize(&name));
        self.entries.push(LexiconEntry { name, payload });
    }

    /// Entries in insertion order
    #[must_use]
    pub fn entries(&self) -> &[LexiconEntry<P>] {
        &self.entries
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<P> Default for Lexicon<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Into<String>, P> FromIterator<(N, P)> for Lexicon<P> {
    fn from_iter<I: IntoIterator<Item = (N, P)>>(iter: I) -> Self {
        let mut lexicon = Self::new();
        for (name, payload) in iter {
            lexicon.push(name, payload);
        }
        lexicon
    }
}

/// A lexicon entry chosen for a query
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMatch<P> {
    /// Position in the lexicon
    pub index: usize,
    /// Entry name
    pub name: String,
    /// Entry payload
    pub payload: P,
    /// Similarity in `[threshold, 1]`
    pub score: f64,
}

/// One interpreted utterance
#[derive(Debug, Clone, PartialEq)]
pub struct Command<K, P> {
    /// Text as recognized
    pub raw_text: String,
    /// Lower-cased, punctuation stripped
    pub normalized_text: String,
    /// Intent, if any rule applied
    pub matched_intent: Option<K>,
    /// Name searched for, when the entity rule applied
    pub query: Option<String>,
    /// Best lexicon entry at or above threshold
    pub matched_entity: Option<EntityMatch<P>>,
    /// `1.0` for keyword intents, the match score for entities, else `0.0`
    pub confidence: f64,
}

impl<K, P> Command<K, P> {
    /// The matched entity, or `NoMatch` naming what was asked for
    ///
    /// # Errors
    ///
    /// Returns `NoMatch` when no entry reached the threshold
    pub fn require_entity(&self) -> Result<&EntityMatch<P>> {
        self.matched_entity.as_ref().ok_or_else(|| {
            Error::NoMatch(
                self.query
                    .clone()
                    .unwrap_or_else(|| self.normalized_text.clone()),
            )
        })
    }
}

/// Resolves text to commands
pub struct Interpreter {
    scorer: Box<dyn Scorer>,
    threshold: f64,
    min_query_len: usize,
}

impl Interpreter {
    /// Create an interpreter with an explicit scoring strategy
    #[must_use]
    pub fn new(scorer: Box<dyn Scorer>, threshold: f64, min_query_len: usize) -> Self {
        Self {
            scorer,
            threshold: threshold.clamp(0.0, 1.0),
            min_query_len,
        }
    }

    /// Create an interpreter from matching settings
    #[must_use]
    pub fn from_config(config: &MatchingConfig) -> Self {
        let scorer: Box<dyn Scorer> = if config.phonetic {
            Box::new(Phonetic(EditDistance))
        } else {
            Box::new(EditDistance)
        };
        Self::new(scorer, config.threshold, config.min_query_len)
    }

    /// Minimum similarity for an entity match
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Interpret `text` using a screen's grammar and lexicon
    #[must_use]
    pub fn interpret<K: Copy, P: Clone>(
        &self,
        text: &str,
        lexicon: &Lexicon<P>,
        grammar: &Grammar<K>,
    ) -> Command<K, P> {
        let normalized = normalize(text);
        let mut command = Command {
            raw_text: text.to_string(),
            normalized_text: normalized.clone(),
            matched_intent: None,
            query: None,
            matched_entity: None,
            confidence: 0.0,
        };

        if let Some(rule) = grammar
            .intents
            .iter()
            .find(|rule| rule.phrases.iter().any(|p| contains_phrase(&normalized, p)))
        {
            command.matched_intent = Some(rule.intent);
            command.confidence = 1.0;
            return command;
        }

        let Some(rule) = &grammar.entity else {
            return command;
        };

        let query = match entity_query(&normalized, &rule.prefixes) {
            // A prefix with nothing after it names no one
            Some(query) if query.is_empty() => {
                tracing::debug!(text = %normalized, "entity prefix without a name");
                return command;
            }
            Some(query) => query,
            None if rule.prefix_required => return command,
            None => normalized.clone(),
        };

        command.matched_intent = Some(rule.intent);
        if query.chars().filter(|c| !c.is_whitespace()).count() < self.min_query_len {
            tracing::debug!(query = %query, "query too short to match");
            command.query = Some(query);
            return command;
        }

        command.matched_entity = self.best_match(&query, lexicon);
        command.confidence = command.matched_entity.as_ref().map_or(0.0, |m| m.score);
        command.query = Some(query);
        command
    }

    /// Highest-scoring entry at or above the threshold
    ///
    /// On equal scores the entry inserted first wins.
    #[must_use]
    pub fn best_match<P: Clone>(&self, query: &str, lexicon: &Lexicon<P>) -> Option<EntityMatch<P>> {
        let query = normalize(query);
        let mut best: Option<(usize, f64)> = None;

        for (index, key) in lexicon.keys.iter().enumerate() {
            let score = self.scorer.score(&query, key);
            if score < self.threshold {
                continue;
            }
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((index, score));
            }
        }

        best.map(|(index, score)| {
            let entry = &lexicon.entries[index];
            tracing::debug!(query = %query, name = %entry.name, score, "entity matched");
            EntityMatch {
                index,
                name: entry.name.clone(),
                payload: entry.payload.clone(),
                score,
            }
        })
    }

    /// Every entry with its score, in lexicon order
    #[must_use]
    pub fn scores<P>(&self, query: &str, lexicon: &Lexicon<P>) -> Vec<(String, f64)> {
        let query = normalize(query);
        lexicon
            .entries
            .iter()
            .zip(&lexicon.keys)
            .map(|(entry, key)| (entry.name.clone(), self.scorer.score(&query, key)))
            .collect()
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::from_config(&MatchingConfig::default())
    }
}

/// Text after the earliest prefix occurrence, if any prefix occurs
fn entity_query(normalized: &str, prefixes: &[String]) -> Option<String> {
    let padded = format!(" {normalized} ");
    prefixes
        .iter()
        .filter_map(|prefix| {
            padded
                .find(&format!(" {prefix} "))
                .map(|at| (at, at + prefix.len() + 2))
        })
        .min_by_key(|(at, _)| *at)
        .map(|(_, end)| padded[end.min(padded.len())..].trim().to_string())
}
