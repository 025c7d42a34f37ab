//! Sparse lexical encoder.
//!
//! Text runs through the same English analysis chain as a full-text index
//! (simple tokenizer, long-token removal, lowercasing, stop words, Snowball
//! stemming). Each surviving term is hashed into a 32-bit vocabulary and
//! weighted `1 + ln(tf)`; the vector is then L2-normalized, so the dot
//! product between two encodings lies in [0, 1].

use std::{collections::HashMap, future::Future};

use rayon::prelude::*;
use tantivy::tokenizer::{
    Language,
    LowerCaser,
    RemoveLongFilter,
    SimpleTokenizer,
    Stemmer,
    StopWordFilter,
    TextAnalyzer,
    TokenStream,
};

use crate::{
    embedding::{SparseEncoder, SparseVector},
    error::{Error, Result},
};

pub const LEXICAL_MODEL_ID: &str = "lexical-en-stem";

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "do", "does",
    "for", "from", "has", "have", "how", "i", "if", "in", "into", "is", "it",
    "its", "of", "on", "or", "our", "such", "that", "the", "their", "then",
    "there", "these", "they", "this", "to", "was", "we", "what", "when",
    "where", "which", "will", "with", "you", "your",
];

fn build_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(StopWordFilter::remove(
            STOP_WORDS.iter().map(|w| w.to_string()),
        ))
        .filter(Stemmer::new(Language::English))
        .build()
}

/// Map an analyzed term to its vocabulary slot.
pub fn term_index(term: &str) -> u32 {
    let hash = blake3::hash(term.as_bytes());
    let b = hash.as_bytes();
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

#[derive(Clone)]
pub struct LexicalEncoder {
    analyzer: TextAnalyzer,
}

impl Default for LexicalEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LexicalEncoder {
    pub fn new() -> Self {
        Self {
            analyzer: build_analyzer(),
        }
    }

    /// Analyze `text` into its stemmed terms, in order.
    pub fn terms(&self, text: &str) -> Vec<String> {
        let mut analyzer = self.analyzer.clone();
        let mut stream = analyzer.token_stream(text);
        let mut terms = Vec::new();
        while stream.advance() {
            terms.push(stream.token().text.clone());
        }
        terms
    }

    pub fn encode_text(&self, text: &str) -> SparseVector {
        let mut counts: HashMap<u32, u32> = HashMap::new();
        for term in self.terms(text) {
            *counts.entry(term_index(&term)).or_default() += 1;
        }
        SparseVector::from_weights(
            counts
                .into_iter()
                .map(|(index, tf)| (index, 1.0 + (tf as f32).ln())),
        )
    }
}

impl std::fmt::Debug for LexicalEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalEncoder").finish_non_exhaustive()
    }
}

impl SparseEncoder for LexicalEncoder {
    fn model_id(&self) -> &str {
        LEXICAL_MODEL_ID
    }

    fn encode_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<SparseVector>>> + Send {
        let encoder = self.clone();
        let texts = texts.to_vec();
        async move {
            tokio::task::spawn_blocking(move || {
                texts
                    .par_iter()
                    .map(|t| encoder.encode_text(t))
                    .collect::<Vec<_>>()
            })
            .await
            .map_err(|e| Error::encoding("sparse", e))
        }
    }
}
