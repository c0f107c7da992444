//! Pluggable similarity scoring for lexicon lookups

/// Similarity between a spoken query and a lexicon name
///
/// Both arguments arrive normalized. Scores are in `[0, 1]`, where `1` is a
/// perfect match, and must be deterministic.
pub trait Scorer: Send + Sync {
    /// Score `query` against `candidate`
    fn score(&self, query: &str, candidate: &str) -> f64;
}

/// Weight of the best approximate-substring alignment in the blended score
const SUBSTRING_WEIGHT: f64 = 0.85;

/// Edit-distance scorer tolerant of partial names
///
/// A query that appears inside the candidate with few edits scores high even
/// when the candidate is much longer ("sam" against "samantha"). The rest of
/// the score rewards candidates whose overall length is close to the query,
/// so exact names beat longer names sharing a prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct EditDistance;

impl Scorer for EditDistance {
    #[allow(clippy::cast_precision_loss)]
    fn score(&self, query: &str, candidate: &str) -> f64 {
        let q: Vec<char> = query.chars().collect();
        let c: Vec<char> = candidate.chars().collect();

        if q.is_empty() || c.is_empty() {
            return 0.0;
        }
        if q == c {
            return 1.0;
        }

        let inner = 1.0 - substring_distance(&q, &c) as f64 / q.len() as f64;
        let whole = 1.0 - levenshtein(&q, &c) as f64 / q.len().max(c.len()) as f64;

        SUBSTRING_WEIGHT
            .mul_add(inner.max(0.0), (1.0 - SUBSTRING_WEIGHT) * whole.max(0.0))
            .clamp(0.0, 1.0)
    }
}

/// Folds spellings that sound alike before delegating
///
/// Takes the better of the plain and folded scores, so folding can only help.
#[derive(Debug, Clone, Copy, Default)]
pub struct Phonetic<S>(pub S);

impl<S: Scorer> Scorer for Phonetic<S> {
    fn score(&self, query: &str, candidate: &str) -> f64 {
        let plain = self.0.score(query, candidate);
        if plain >= 1.0 {
            return plain;
        }
        let folded = self.0.score(&fold(query), &fold(candidate));
        plain.max(folded)
    }
}

/// Reduce a word to a rough sound-alike key
///
/// Merges spellings that transcription commonly swaps for names spoken with
/// an Indian English accent: aspirated consonants, `v`/`w`, doubled letters
/// and long vowels.
#[must_use]
pub fn fold(text: &str) -> String {
    let lowered = text
        .to_lowercase()
        .replace("ph", "f")
        .replace("ck", "k")
        .replace("ee", "i")
        .replace("oo", "u")
        .replace('q', "k")
        .replace('z', "s")
        .replace('w', "v");

    let mut out = String::with_capacity(lowered.len());
    let mut prev: Option<char> = None;
    for ch in lowered.chars() {
        // Drop aspiration: "bh" -> "b", "th" -> "t", "sh" -> "s"
        if ch == 'h' && prev.is_some_and(|p| p.is_alphabetic() && !is_vowel(p)) {
            continue;
        }
        if prev == Some(ch) {
            continue;
        }
        out.push(ch);
        prev = Some(ch);
    }
    out
}

const fn is_vowel(ch: char) -> bool {
    matches!(ch, 'a' | 'e' | 'i' | 'o' | 'u')
}

/// Classic edit distance between two strings
fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, a_ch) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, b_ch) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(a_ch != b_ch);
            let insertion = curr[j] + 1;
            let deletion = prev[j + 1] + 1;
            curr[j + 1] = substitution.min(insertion).min(deletion);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Fewest edits turning `query` into any substring of `text`
///
/// Same recurrence as [`levenshtein`], but skipping leading and trailing
/// characters of `text` is free.
fn substring_distance(query: &[char], text: &[char]) -> usize {
    let mut prev = vec![0usize; text.len() + 1];
    let mut curr = vec![0usize; text.len() + 1];
    for (i, q_ch) in query.iter().enumerate() {
        curr[0] = i + 1;
        for (j, t_ch) in text.iter().enumerate() {
            let substitution = prev[j] + usize::from(q_ch != t_ch);
            let insertion = curr[j] + 1;
            let deletion = prev[j + 1] + 1;
            curr[j + 1] = substitution.min(insertion).min(deletion);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev.into_iter().min().unwrap_or(query.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein(&chars("kitten"), &chars("sitting")), 3);
        assert_eq!(levenshtein(&chars(""), &chars("abc")), 3);
        assert_eq!(levenshtein(&chars("same"), &chars("same")), 0);
    }

    #[test]
    fn test_substring_distance_ignores_surroundings() {
        assert_eq!(substring_distance(&chars("sam"), &chars("samantha")), 0);
        assert_eq!(substring_distance(&chars("ant"), &chars("samantha")), 0);
        assert_eq!(substring_distance(&chars("sem"), &chars("samantha")), 1);
    }

    #[test]
    fn test_prefix_scores_above_default_threshold() {
        let score = EditDistance.score("sam", "samantha");
        assert!(score > 0.85, "got {score}");
        assert!(EditDistance.score("sam", "angel") < 0.5);
    }

    #[test]
    fn test_exact_beats_longer_name() {
        assert!(EditDistance.score("sam", "sam") > EditDistance.score("sam", "samantha"));
    }

    #[test]
    fn test_scores_are_bounded() {
        for (q, c) in [("a", "zzzzzz"), ("rahul", "rohit"), ("xyz", "abc"), ("", "abc")] {
            let s = EditDistance.score(q, c);
            assert!((0.0..=1.0).contains(&s), "{q} vs {c}: {s}");
        }
    }

    #[test]
    fn test_fold() {
        assert_eq!(fold("Bhavesh"), "baves");
        assert_eq!(fold("Wikram"), "vikram");
        assert_eq!(fold("Anna"), "ana");
        assert_eq!(fold("Deepak"), "dipak");
    }

    #[test]
    fn test_phonetic_never_lowers_score() {
        let plain = EditDistance.score("vikram", "wikram");
        let folded = Phonetic(EditDistance).score("vikram", "wikram");
        assert!(folded >= plain);
        assert!((folded - 1.0).abs() < f64::EPSILON);
    }
}
