//! Inverted index with field-weighted BM25 scoring

use ahash::AHashMap;
use std::collections::BTreeMap;

/// Indexed text fields, in scoring order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextField {
    Title,
    Body,
    Description,
}

pub const FIELD_COUNT: usize = 3;

impl TextField {
    pub const ALL: [TextField; FIELD_COUNT] =
        [TextField::Title, TextField::Body, TextField::Description];

    pub fn index(&self) -> usize {
        match self {
            Self::Title => 0,
            Self::Body => 1,
            Self::Description => 2,
        }
    }
}

/// BM25 constants and per-field boosts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
    pub boosts: [f32; FIELD_COUNT],
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            boosts: [2.0, 1.0, 1.0],
        }
    }
}

impl From<&crate::config::IndexingConfig> for Bm25Params {
    fn from(config: &crate::config::IndexingConfig) -> Self {
        Self {
            k1: config.k1,
            b: config.b,
            boosts: [config.title_boost, config.body_boost, config.description_boost],
        }
    }
}

/// Analysed tokens of one document, per field
pub type FieldTokens = [Vec<String>; FIELD_COUNT];

/// Per-document entry of a posting list: term frequency in each field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Posting {
    pub term_frequency: [u32; FIELD_COUNT],
}

/// Postings for one term, ordered by document id
pub type PostingList = BTreeMap<String, Posting>;

#[derive(Debug, Clone)]
struct DocEntry {
    lengths: [u32; FIELD_COUNT],
    terms: Vec<String>,
}

/// In-memory inverted index
///
/// Not synchronised; the index engine owns it behind its state lock.
#[derive(Debug, Default, Clone)]
pub struct LexicalIndex {
    postings: AHashMap<String, PostingList>,
    docs: AHashMap<String, DocEntry>,
    total_lengths: [u64; FIELD_COUNT],
}

impl LexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the postings of `id` with `fields`
    pub fn insert(&mut self, id: &str, fields: &FieldTokens) {
        self.remove(id);

        let mut frequencies: BTreeMap<&str, Posting> = BTreeMap::new();
        let mut lengths = [0u32; FIELD_COUNT];
        for (field, tokens) in fields.iter().enumerate() {
            lengths[field] = tokens.len() as u32;
            for token in tokens {
                frequencies.entry(token.as_str()).or_default().term_frequency[field] += 1;
            }
        }

        let mut terms = Vec::with_capacity(frequencies.len());
        for (term, posting) in frequencies {
            self.postings
                .entry(term.to_string())
                .or_default()
                .insert(id.to_string(), posting);
            terms.push(term.to_string());
        }

        for (total, length) in self.total_lengths.iter_mut().zip(lengths) {
            *total += length as u64;
        }
        self.docs.insert(id.to_string(), DocEntry { lengths, terms });
    }

    /// Drop every posting of `id`; returns whether it was present
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(entry) = self.docs.remove(id) else {
            return false;
        };

        for term in &entry.terms {
            if let Some(list) = self.postings.get_mut(term) {
                list.remove(id);
                if list.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
        for (total, length) in self.total_lengths.iter_mut().zip(entry.lengths) {
            *total -= length as u64;
        }
        true
    }

    pub fn clear(&mut self) {
        self.postings.clear();
        self.docs.clear();
        self.total_lengths = [0; FIELD_COUNT];
    }

    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn posting_count(&self) -> usize {
        self.postings.values().map(BTreeMap::len).sum()
    }

    pub fn postings(&self, term: &str) -> Option<&PostingList> {
        self.postings.get(term)
    }

    /// Inverse document frequency, `ln(1 + (N - df + 0.5) / (df + 0.5))`
    pub fn idf(&self, term: &str) -> f32 {
        let n = self.docs.len() as f32;
        let df = self.postings.get(term).map_or(0, BTreeMap::len) as f32;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// BM25 score of every document matching at least one of `terms`
    ///
    /// `terms` must already be unique. Field contributions are kept apart and
    /// summed in a fixed order so equal inputs give bit-identical scores.
    pub fn score(
        &self,
        terms: &[String],
        params: &Bm25Params,
        mut accept: impl FnMut(&str) -> bool,
    ) -> Vec<(String, f32)> {
        let n = self.docs.len();
        if n == 0 {
            return Vec::new();
        }

        let mut avg_lengths = [0f32; FIELD_COUNT];
        for (avg, total) in avg_lengths.iter_mut().zip(self.total_lengths) {
            *avg = total as f32 / n as f32;
        }

        let mut accumulated: AHashMap<&str, [f32; FIELD_COUNT]> = AHashMap::new();
        let mut rejected: ahash::AHashSet<&str> = ahash::AHashSet::new();

        for term in terms {
            let Some(list) = self.postings.get(term) else {
                continue;
            };
            let idf = self.idf(term);

            for (id, posting) in list {
                if rejected.contains(id.as_str()) {
                    continue;
                }
                if !accumulated.contains_key(id.as_str()) && !accept(id.as_str()) {
                    rejected.insert(id.as_str());
                    continue;
                }
                let Some(entry) = self.docs.get(id) else {
                    continue;
                };

                let contributions = accumulated.entry(id.as_str()).or_insert([0.0; FIELD_COUNT]);
                for field in TextField::ALL {
                    let i = field.index();
                    let tf = posting.term_frequency[i] as f32;
                    if tf == 0.0 || avg_lengths[i] == 0.0 {
                        continue;
                    }
                    let length_ratio = entry.lengths[i] as f32 / avg_lengths[i];
                    let norm = params.k1 * (1.0 - params.b + params.b * length_ratio);
                    contributions[i] +=
                        params.boosts[i] * idf * (tf * (params.k1 + 1.0)) / (tf + norm);
                }
            }
        }

        accumulated
            .into_iter()
            .map(|(id, contributions)| {
                let score = contributions.iter().fold(0.0f32, |sum, c| sum + c);
                (id.to_string(), score)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(title: &str, body: &str) -> FieldTokens {
        let split = |s: &str| -> Vec<String> { s.split_whitespace().map(str::to_string).collect() };
        [split(title), split(body), Vec::new()]
    }

    fn score_of(index: &LexicalIndex, terms: &[&str], id: &str) -> f32 {
        let terms: Vec<String> = terms.iter().map(|t| t.to_string()).collect();
        index
            .score(&terms, &Bm25Params::default(), |_| true)
            .into_iter()
            .find(|(doc, _)| doc == id)
            .map(|(_, score)| score)
            .unwrap_or(0.0)
    }

    #[test]
    fn test_insert_and_remove() {
        let mut index = LexicalIndex::new();
        index.insert("d1", &tokens("machin learn", "neural network"));
        index.insert("d2", &tokens("cook pasta", "boil water"));

        assert_eq!(index.doc_count(), 2);
        assert_eq!(index.postings("machin").unwrap().len(), 1);

        assert!(index.remove("d1"));
        assert!(!index.remove("d1"));
        assert!(index.postings("machin").is_none());
        assert_eq!(index.doc_count(), 1);
    }

    #[test]
    fn test_reinsert_replaces_postings() {
        let mut index = LexicalIndex::new();
        index.insert("d1", &tokens("old", "content"));
        index.insert("d1", &tokens("new", "content"));

        assert!(index.postings("old").is_none());
        assert_eq!(index.postings("content").unwrap().len(), 1);
        assert_eq!(index.posting_count(), 2);
    }

    #[test]
    fn test_title_boost_outweighs_body() {
        let mut index = LexicalIndex::new();
        index.insert("title", &tokens("rust", "systems program"));
        index.insert("body", &tokens("systems program", "rust"));
        index.insert("other", &tokens("cook", "pasta"));

        assert!(score_of(&index, &["rust"], "title") > score_of(&index, &["rust"], "body"));
    }

    #[test]
    fn test_idf_rewards_rare_terms() {
        let mut index = LexicalIndex::new();
        index.insert("d1", &tokens("common rare", ""));
        index.insert("d2", &tokens("common", ""));
        index.insert("d3", &tokens("common", ""));

        assert!(index.idf("rare") > index.idf("common"));
        assert!(index.idf("common") > 0.0);
    }

    #[test]
    fn test_term_frequency_monotonic() {
        let mut previous = 0.0;
        for repeats in 1..8 {
            let mut index = LexicalIndex::new();
            let body = vec!["match"; repeats].join(" ") + " filler text here";
            index.insert("d1", &tokens("doc", &body));
            index.insert("d2", &tokens("other", "filler text here words"));
            index.insert("d3", &tokens("third", "match something else entirely"));

            let score = score_of(&index, &["match"], "d1");
            assert!(score >= previous, "tf {} decreased score", repeats);
            previous = score;
        }
    }

    #[test]
    fn test_filter_excludes_documents() {
        let mut index = LexicalIndex::new();
        index.insert("d1", &tokens("rust", ""));
        index.insert("d2", &tokens("rust", ""));

        let hits = index.score(&["rust".to_string()], &Bm25Params::default(), |id| id == "d2");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "d2");
    }
}
