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

use serde::{Deserialize, Serialize};

/// A sparse bag-of-words document.
///
/// Stored as a struct of arrays so the inference inner loop can fetch the
/// columns for `ids` without chasing per-pair allocations. Term ids must be
/// distinct and below the vocabulary size; counts must be positive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    ids: Vec<u32>,
    counts: Vec<f32>,
}

impl Document {
    pub fn new(ids: Vec<u32>, counts: Vec<f32>) -> Self {
        debug_assert_eq!(ids.len(), counts.len());
        Self { ids, counts }
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (u32, f32)>) -> Self {
        let (ids, counts) = pairs.into_iter().unzip();
        Self { ids, counts }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn counts(&self) -> &[f32] {
        &self.counts
    }

    /// The number of distinct terms in this document.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The total token count of this document.
    pub fn word_count(&self) -> f64 {
        self.counts.iter().map(|count| f64::from(*count)).sum()
    }

    pub fn max_id(&self) -> Option<u32> {
        self.ids.iter().copied().max()
    }
}

/// A repeatable stream of documents.
///
/// Implementations must yield the same documents on every call of
/// [Corpus::iter_docs] as long as training runs; one-shot generators are
/// caught by the trainer through its corpus-size check.
pub trait Corpus {
    /// The number of documents, if it is cheaply known.
    ///
    /// Returning `None` makes the trainer count the documents by draining the
    /// stream once, which may be expensive.
    fn doc_count(&self) -> Option<usize>;

    fn iter_docs(&self) -> Box<dyn Iterator<Item = Document> + '_>;
}

impl Corpus for [Document] {
    fn doc_count(&self) -> Option<usize> {
        Some(self.len())
    }

    fn iter_docs(&self) -> Box<dyn Iterator<Item = Document> + '_> {
        Box::new(self.iter().cloned())
    }
}

impl Corpus for Vec<Document> {
    fn doc_count(&self) -> Option<usize> {
        Some(self.len())
    }

    fn iter_docs(&self) -> Box<dyn Iterator<Item = Document> + '_> {
        Box::new(self.iter().cloned())
    }
}

/// The number of documents an E-step batch may hold.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChunkSize {
    /// One chunk spanning the whole corpus (the batch algorithm).
    All,
    Docs(usize),
}

impl ChunkSize {
    /// The concrete chunk length for a corpus of `corpus_len` documents.
    pub fn resolve(&self, corpus_len: usize) -> usize {
        let docs = match self {
            ChunkSize::All => corpus_len,
            ChunkSize::Docs(docs) => (*docs).min(corpus_len),
        };
        docs.max(1)
    }
}

impl Default for ChunkSize {
    fn default() -> Self {
        ChunkSize::Docs(2000)
    }
}
