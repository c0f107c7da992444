//! Command interpreter integration tests

use echo_bridge::command::{EditDistance, Phonetic};
use echo_bridge::config::MatchingConfig;
use echo_bridge::{Grammar, Interpreter, Lexicon};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Back,
    AddChat,
    ChatWith,
}

fn grammar() -> Grammar<Intent> {
    Grammar::new()
        .intent(Intent::Back, &["go back"])
        .intent(Intent::AddChat, &["add new chat"])
        .entity(Intent::ChatWith, &["chat with"], false)
}

fn contacts() -> Lexicon<u32> {
    [("Samantha", 1), ("Rahul", 2), ("Go Backer", 3), ("Angel", 4)]
        .into_iter()
        .collect()
}

#[test]
fn test_partial_name_matches_full_contact() {
    let interp = Interpreter::default();
    let cmd = interp.interpret("chat with Sam", &contacts(), &grammar());

    assert_eq!(cmd.matched_intent, Some(Intent::ChatWith));
    let entity = cmd.require_entity().unwrap();
    assert_eq!(entity.name, "Samantha");
    assert_eq!(entity.payload, 1);
    assert!(cmd.confidence >= interp.threshold());
}

#[test]
fn test_keyword_intent_beats_similar_name() {
    let interp = Interpreter::default();
    let cmd = interp.interpret("Go back", &contacts(), &grammar());

    assert_eq!(cmd.matched_intent, Some(Intent::Back));
    assert!(cmd.matched_entity.is_none());
    assert!((cmd.confidence - 1.0).abs() < f64::EPSILON);
}

#[test]
fn test_interpretation_is_deterministic() {
    let interp = Interpreter::default();
    let lexicon = contacts();
    let first = interp.interpret("chat with rahool", &lexicon, &grammar());

    for _ in 0..20 {
        assert_eq!(interp.interpret("chat with rahool", &lexicon, &grammar()), first);
    }
    assert_eq!(first.require_entity().unwrap().name, "Rahul");
}

#[test]
fn test_nothing_above_threshold() {
    let interp = Interpreter::default();
    let cmd = interp.interpret("chat with zebediah", &contacts(), &grammar());

    assert_eq!(cmd.matched_intent, Some(Intent::ChatWith));
    assert_eq!(cmd.query.as_deref(), Some("zebediah"));
    assert!(cmd.matched_entity.is_none());
    assert!(cmd.require_entity().is_err());
}

#[test]
fn test_tie_goes_to_first_entry() {
    let interp = Interpreter::default();
    let lexicon: Lexicon<&str> = [("Sam", "first"), ("Sam", "second")].into_iter().collect();

    let best = interp.best_match("sam", &lexicon).unwrap();
    assert_eq!(best.payload, "first");
    assert_eq!(best.index, 0);
}

#[test]
fn test_empty_lexicon_never_matches() {
    let interp = Interpreter::default();
    let empty: Lexicon<u32> = Lexicon::new();
    let cmd = interp.interpret("chat with sam", &empty, &grammar());
    assert!(cmd.matched_entity.is_none());
}

#[test]
fn test_whole_utterance_is_query_without_prefix() {
    let interp = Interpreter::default();
    let cmd = interp.interpret("Angel", &contacts(), &grammar());

    assert_eq!(cmd.query.as_deref(), Some("angel"));
    assert_eq!(cmd.require_entity().unwrap().payload, 4);
}

#[test]
fn test_threshold_is_respected() {
    let strict = Interpreter::new(Box::new(EditDistance), 0.99, 2);
    assert!(strict.best_match("sam", &contacts()).is_none());
    assert!(strict.best_match("samantha", &contacts()).is_some());
}

#[test]
fn test_phonetic_scorer_helps_spelling_variants() {
    let plain = Interpreter::new(Box::new(EditDistance), 0.0, 1);
    let phonetic = Interpreter::new(Box::new(Phonetic(EditDistance)), 0.0, 1);
    let lexicon: Lexicon<()> = [("Philip", ())].into_iter().collect();

    let plain_score = plain.scores("filip", &lexicon)[0].1;
    let phonetic_score = phonetic.scores("filip", &lexicon)[0].1;
    assert!(phonetic_score > plain_score);
    assert!((phonetic_score - 1.0).abs() < f64::EPSILON);
}

#[test]
fn test_from_config() {
    let config = MatchingConfig {
        threshold: 0.8,
        ..MatchingConfig::default()
    };
    let interp = Interpreter::from_config(&config);
    assert!((interp.threshold() - 0.8).abs() < f64::EPSILON);
}
