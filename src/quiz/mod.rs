pub mod parser;
pub mod retry;
pub mod session;
pub mod store;

use std::collections::BTreeMap;

use rand::seq::IteratorRandom;
use rand::Rng;

/// Question text mapped to its answer, as read from the corpus.
///
/// Ordered so that picks made with a seeded RNG are reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionBank {
    entries: BTreeMap<String, String>,
}

impl QuestionBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later inserts of the same question overwrite the earlier answer.
    pub fn insert(&mut self, question: String, answer: String) {
        self.entries.insert(question, answer);
    }

    pub fn answer(&self, question: &str) -> Option<&str> {
        self.entries.get(question).map(String::as_str)
    }

    pub fn remove(&mut self, question: &str) -> Option<String> {
        self.entries.remove(question)
    }

    pub fn random_question<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<String> {
        self.entries.keys().choose(rng).cloned()
    }

    pub fn extend(&mut self, other: QuestionBank) {
        self.entries.extend(other.entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<Q: Into<String>, A: Into<String>> FromIterator<(Q, A)> for QuestionBank {
    fn from_iter<I: IntoIterator<Item = (Q, A)>>(iter: I) -> Self {
        let mut bank = QuestionBank::new();
        for (question, answer) in iter {
            bank.insert(question.into(), answer.into());
        }
        bank
    }
}

/// Lenient check: the submission only has to appear somewhere inside the
/// stored answer, ignoring case. So "париж" matches "Париж." and so does
/// "пар", but "город париж" does not.
pub fn is_correct_answer(submitted: &str, answer: &str) -> bool {
    let submitted = submitted.trim().to_lowercase();
    // An empty string is contained in every answer
    if submitted.is_empty() {
        return false;
    }
    answer.to_lowercase().contains(&submitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn matching_is_case_insensitive() {
        assert!(is_correct_answer("paris", "Paris"));
        assert!(is_correct_answer("PARIS", "Paris"));
        assert!(is_correct_answer("  Paris ", "Paris."));
        assert!(is_correct_answer("ПАРИЖ", "Париж"));
    }

    #[test]
    fn submission_must_be_contained_in_answer() {
        // A fragment of the answer is accepted
        assert!(is_correct_answer("par", "Paris"));
        // The answer inside a longer submission is not
        assert!(!is_correct_answer("the city of paris", "Paris"));
        assert!(!is_correct_answer("london", "Paris"));
    }

    #[test]
    fn blank_submission_is_never_correct() {
        assert!(!is_correct_answer("", "Paris"));
        assert!(!is_correct_answer("   ", "Paris"));
    }

    #[test]
    fn insert_overwrites_and_remove_returns_answer() {
        let mut bank: QuestionBank = [("q", "first")].into_iter().collect();
        bank.insert("q".to_string(), "second".to_string());
        assert_eq!(bank.len(), 1);
        assert_eq!(bank.answer("q"), Some("second"));
        assert_eq!(bank.remove("q").as_deref(), Some("second"));
        assert!(bank.is_empty());
        assert_eq!(bank.remove("q"), None);
    }

    #[test]
    fn random_question_is_reproducible_with_seed() {
        let bank: QuestionBank = (0..20).map(|i| (format!("q{i}"), format!("a{i}"))).collect();
        let first = bank.random_question(&mut StdRng::seed_from_u64(7));
        let second = bank.random_question(&mut StdRng::seed_from_u64(7));
        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(QuestionBank::new().random_question(&mut StdRng::seed_from_u64(7)), None);
    }
}
