//! Run-scoped terminology glossary.
//!
//! Terms are extracted per sampled chunk, merged into one list, and shared
//! with every chunk through a single-assignment future so translations stay
//! consistent across the whole recording.

mod extract;

pub(crate) use extract::extract_glossary;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A term requiring a consistent translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlossaryTerm {
    pub term: String,
    pub translation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl GlossaryTerm {
    pub fn new(term: impl Into<String>, translation: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            translation: translation.into(),
            notes: None,
        }
    }
}

/// Confidence tier of one chunk's extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    /// Extraction exhausted its retries; terms are empty
    Low,
}

/// One chunk's extraction attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkGlossary {
    pub chunk_index: usize,
    pub terms: Vec<GlossaryTerm>,
    pub confidence: Confidence,
}

impl ChunkGlossary {
    /// Placeholder for a chunk whose extraction failed both passes.
    pub fn exhausted(chunk_index: usize) -> Self {
        Self {
            chunk_index,
            terms: Vec::new(),
            confidence: Confidence::Low,
        }
    }
}

/// The aggregated, run-scoped glossary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Glossary {
    /// Merged terms, deduplicated by exact term string
    pub terms: Vec<GlossaryTerm>,
    /// Per-chunk extraction outcomes, in chunk-index order
    pub chunks: Vec<ChunkGlossary>,
}

impl Glossary {
    /// Merge per-chunk results, which must already be in chunk-index order.
    ///
    /// For an identical term string a later chunk overwrites an earlier one;
    /// the term keeps its first-seen position.
    pub fn from_chunks(chunks: Vec<ChunkGlossary>) -> Self {
        let mut terms: Vec<GlossaryTerm> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for chunk in &chunks {
            for term in &chunk.terms {
                match positions.get(&term.term) {
                    Some(&at) => terms[at] = term.clone(),
                    None => {
                        positions.insert(term.term.clone(), terms.len());
                        terms.push(term.clone());
                    }
                }
            }
        }

        Self { terms, chunks }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }
}
