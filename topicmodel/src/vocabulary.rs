//Copyright 2024 Felix Engl
//
//Licensed under the Apache License, Version 2.0 (the "License");
//you may not use this file except in compliance with the License.
//You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
//Unless required by applicable law or agreed to in writing, software
//distributed under the License is distributed on an "AS IS" BASIS,
//WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//See the License for the specific language governing permissions and
//limitations under the License.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::corpus::Corpus;

/// An id to word mapping.
///
/// The id space may contain holes; the number of terms is always
/// `max(id) + 1` so that every matrix indexed by word id stays rectangular.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    words: Vec<Option<String>>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `word` at the next free id and returns that id.
    pub fn add(&mut self, word: impl Into<String>) -> usize {
        self.words.push(Some(word.into()));
        self.words.len() - 1
    }

    pub fn from_words(words: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            words: words.into_iter().map(|word| Some(word.into())).collect(),
        }
    }

    /// Builds a vocabulary from explicit `(id, word)` entries; ids that never
    /// occur stay as holes.
    pub fn from_entries(entries: impl IntoIterator<Item = (u32, String)>) -> Self {
        let mut words: Vec<Option<String>> = Vec::new();
        for (id, word) in entries {
            let id = id as usize;
            if words.len() <= id {
                words.resize(id + 1, None);
            }
            words[id] = Some(word);
        }
        Self { words }
    }

    /// An identity mapping over `num_terms` ids, for corpora without a
    /// user-supplied dictionary.
    pub fn anonymous(num_terms: usize) -> Self {
        Self {
            words: (0..num_terms).map(|id| Some(id.to_string())).collect(),
        }
    }

    /// Derives an identity vocabulary from the largest term id in `corpus`.
    pub fn from_corpus(corpus: &dyn Corpus) -> Self {
        log::warn!("no word id mapping provided; initializing from corpus, assuming identity");
        let num_terms = corpus
            .iter_docs()
            .filter_map(|doc| doc.max_id())
            .max()
            .map(|id| id as usize + 1)
            .unwrap_or(0);
        Self::anonymous(num_terms)
    }

    pub fn num_terms(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn get_word(&self, id: usize) -> Option<&str> {
        self.words.get(id)?.as_deref()
    }

    pub fn get_id(&self, word: &str) -> Option<usize> {
        self.words
            .iter()
            .position(|entry| entry.as_deref() == Some(word))
    }
}

impl Display for Vocabulary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Vocabulary(num_terms={})", self.num_terms())
    }
}

#[cfg(test)]
mod test {
    use crate::corpus::Document;

    use super::*;

    #[test]
    fn add_and_lookup() {
        let mut voc = Vocabulary::new();
        let a = voc.add("alpha");
        let b = voc.add("beta");
        assert_eq!(voc.get_word(a), Some("alpha"));
        assert_eq!(voc.get_id("beta"), Some(b));
        assert_eq!(voc.num_terms(), 2);
    }

    #[test]
    fn entries_with_holes_extend_the_id_space() {
        let voc = Vocabulary::from_entries(vec![(0, "a".to_string()), (3, "d".to_string())]);
        assert_eq!(voc.num_terms(), 4);
        assert_eq!(voc.get_word(0), Some("a"));
        assert_eq!(voc.get_word(1), None);
        assert_eq!(voc.get_word(3), Some("d"));
        assert_eq!(voc.get_word(9), None);
    }

    #[test]
    fn identity_vocabulary_from_corpus() {
        let docs = vec![
            Document::from_pairs(vec![(0, 1.0), (6, 1.0)]),
            Document::from_pairs(vec![(2, 3.0)]),
        ];
        let voc = Vocabulary::from_corpus(&docs);
        assert_eq!(voc.num_terms(), 7);
        assert_eq!(voc.get_word(6), Some("6"));
    }
}
