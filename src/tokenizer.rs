use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::warn;

pub const PAD_ID: u32 = 0;
pub const BOS_ID: u32 = 1;
pub const EOS_ID: u32 = 2;
pub const UNK_ID: u32 = 3;

/// Word-level tokenizer over an external vocabulary table.
///
/// The vocabulary is a JSON object mapping token strings to ids. Symbols the
/// table does not cover encode to [`UNK_ID`] instead of failing, and decode
/// silently drops ids the table cannot map back. With an empty (degenerate)
/// vocabulary every encode is all-unknown and every decode is empty text;
/// construction never fails so the rest of the system keeps running.
#[derive(Debug, Default)]
pub struct Tokenizer {
    token_to_id: HashMap<String, u32>,
    id_to_token: HashMap<u32, String>,
}

impl Tokenizer {
    pub fn from_vocab(vocab: HashMap<String, u32>) -> Self {
        let id_to_token = vocab
            .iter()
            .map(|(token, &id)| (id, token.clone()))
            .collect();
        Self {
            token_to_id: vocab,
            id_to_token,
        }
    }

    /// Loads the vocabulary table, degrading to the four special ids when
    /// the file is missing or unparseable.
    pub fn from_vocab_file(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "vocabulary file unreadable, using degenerate vocabulary");
                return Self::default();
            }
        };

        match serde_json::from_str::<HashMap<String, u32>>(&raw) {
            Ok(vocab) => Self::from_vocab(vocab),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "vocabulary file malformed, using degenerate vocabulary");
                Self::default()
            }
        }
    }

    pub fn vocab_len(&self) -> usize {
        self.token_to_id.len()
    }

    pub fn eos_id(&self) -> u32 {
        EOS_ID
    }

    /// Encodes text into ids plus an attention mask. The begin-of-sequence
    /// id always comes first and every position is marked attended.
    pub fn encode(&self, text: &str) -> (Vec<u32>, Vec<u32>) {
        let mut ids = vec![BOS_ID];
        for word in text.split_whitespace() {
            ids.push(self.token_to_id.get(word).copied().unwrap_or(UNK_ID));
        }
        let mask = vec![1u32; ids.len()];
        (ids, mask)
    }

    /// Decodes ids back to text. Begin/end/pad ids are skipped, unmapped ids
    /// contribute nothing, vocabulary words are joined by single spaces.
    pub fn decode(&self, ids: &[u32]) -> String {
        let pieces: Vec<&str> = ids
            .iter()
            .filter(|&&id| id != BOS_ID && id != EOS_ID && id != PAD_ID)
            .filter_map(|id| self.id_to_token.get(id).map(String::as_str))
            .collect();
        pieces.join(" ")
    }
}
