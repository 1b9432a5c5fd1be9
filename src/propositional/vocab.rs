//! Shared vocabulary container for text columns (spec §4.7/§4.8): maps
//! whitespace-split tokens to interned ids, pruned by `min_df`/`vocab_size`.
//!
//! Both the propositionalization engine and the mapping preprocessor share
//! one `Vocabulary` per text column so token ids stay consistent between
//! fit and transform.

use std::collections::HashMap;

/// A fitted token vocabulary: `token -> id`, ids dense in `[0, len())`,
/// ordered by descending document frequency (ties broken lexically for a
/// deterministic fit, spec §5).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Vocabulary {
    token_to_id: HashMap<String, i64>,
    tokens: Vec<String>,
}

fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split_whitespace()
}

impl Vocabulary {
    /// Builds a vocabulary from raw documents: counts document frequency
    /// per distinct token, drops tokens below `min_df`, keeps the
    /// `vocab_size` most frequent survivors.
    pub fn fit<'a>(documents: impl Iterator<Item = &'a str>, min_df: usize, vocab_size: usize) -> Self {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for doc in documents {
            let mut seen = std::collections::HashSet::new();
            for token in tokenize(doc) {
                if seen.insert(token) {
                    *doc_freq.entry(token.to_string()).or_insert(0) += 1;
                }
            }
        }

        let mut survivors: Vec<(String, usize)> = doc_freq.into_iter().filter(|&(_, df)| df >= min_df.max(1)).collect();
        survivors.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        survivors.truncate(vocab_size);

        let mut token_to_id = HashMap::with_capacity(survivors.len());
        let mut tokens = Vec::with_capacity(survivors.len());
        for (id, (token, _)) in survivors.into_iter().enumerate() {
            token_to_id.insert(token.clone(), id as i64);
            tokens.push(token);
        }
        Vocabulary { token_to_id, tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Interns one document into token ids, dropping out-of-vocabulary
    /// tokens (an empty result is a legitimate, not an error, outcome).
    pub fn encode(&self, document: &str) -> Vec<i64> {
        tokenize(document).filter_map(|t| self.token_to_id.get(t).copied()).collect()
    }

    pub fn token(&self, id: i64) -> Option<&str> {
        self.tokens.get(id as usize).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_tokens_below_min_df() {
        let docs = vec!["the cat sat", "the dog ran", "a bird flew"];
        let vocab = Vocabulary::fit(docs.iter().copied(), 2, 100);
        assert!(vocab.token_to_id.contains_key("the"));
        assert!(!vocab.token_to_id.contains_key("cat"));
    }

    #[test]
    fn truncates_to_vocab_size() {
        let docs = vec!["a b c d e"];
        let vocab = Vocabulary::fit(docs.iter().copied(), 1, 3);
        assert_eq!(vocab.len(), 3);
    }

    #[test]
    fn encode_skips_out_of_vocabulary_tokens() {
        let docs = vec!["alpha beta", "alpha beta"];
        let vocab = Vocabulary::fit(docs.iter().copied(), 1, 100);
        let encoded = vocab.encode("alpha gamma beta");
        assert_eq!(encoded.len(), 2);
    }
}
