//! Text analysis shared by indexing, query planning and highlighting
//!
//! Pipeline: split on non-alphanumeric characters, drop overlong tokens,
//! lowercase, drop English stop words, Snowball English stemming.
//! All three consumers must go through the same [`Analyzer`] or recall
//! silently degrades.

use tantivy::tokenizer::{
    Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, StopWordFilter,
    TextAnalyzer, TokenStream,
};

/// Used when the analyzer build carries no bundled stop word list
const FALLBACK_STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

/// A single analysed token with its byte span in the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzedToken {
    pub term: String,
    pub offset_from: usize,
    pub offset_to: usize,
}

/// Deterministic text analyzer
#[derive(Clone)]
pub struct Analyzer {
    inner: TextAnalyzer,
}

impl Analyzer {
    pub fn new(max_token_len: usize) -> Self {
        let stop_words = StopWordFilter::new(Language::English).unwrap_or_else(|| {
            StopWordFilter::remove(FALLBACK_STOP_WORDS.iter().map(|w| w.to_string()))
        });

        let inner = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(max_token_len))
            .filter(LowerCaser)
            .filter(stop_words)
            .filter(Stemmer::new(Language::English))
            .build();

        Self { inner }
    }

    /// Analysed terms in text order, duplicates kept
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        self.analyze(text).into_iter().map(|t| t.term).collect()
    }

    /// Analysed tokens with byte offsets into `text`
    pub fn analyze(&self, text: &str) -> Vec<AnalyzedToken> {
        // token_stream needs exclusive access; clones share the boxed pipeline definition
        let mut analyzer = self.inner.clone();
        let mut stream = analyzer.token_stream(text);

        let mut tokens = Vec::new();
        while stream.advance() {
            let token = stream.token();
            tokens.push(AnalyzedToken {
                term: token.text.clone(),
                offset_from: token.offset_from,
                offset_to: token.offset_to,
            });
        }
        tokens
    }

    /// Unique terms in order of first occurrence
    pub fn unique_terms(&self, text: &str) -> Vec<String> {
        let mut seen = ahash::AHashSet::new();
        self.tokenize(text)
            .into_iter()
            .filter(|term| seen.insert(term.clone()))
            .collect()
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(40)
    }
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer").finish_non_exhaustive()
    }
}
