//! Code catalog reference data and its search index interface.
//!
//! The diagnosis (ICD-10) and procedure (CPT) catalogs are immutable
//! reference data owned by an external population process; this pipeline
//! only queries them. The query primitives live behind [`CatalogIndex`] so
//! the production search service can be swapped in; the in-memory index
//! implements the same contract over loaded entry lists and is what the
//! tests run against.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Which catalog an entry or query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    Diagnosis,
    Procedure,
}

impl CatalogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogKind::Diagnosis => "diagnosis",
            CatalogKind::Procedure => "procedure",
        }
    }
}

/// One diagnosis or procedure code with its descriptive metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeCatalogEntry {
    pub code: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinical_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_part: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modality: Option<String>,
}

impl CodeCatalogEntry {
    pub fn new(code: &str, description: &str) -> Self {
        Self {
            code: code.to_string(),
            description: description.to_string(),
            clinical_notes: None,
            body_part: None,
            modality: None,
        }
    }
}

/// Errors from the backing search service.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Catalog query failed: {0}")]
    QueryFailed(String),

    #[error("Unknown catalog: {0}")]
    UnknownCatalog(String),
}

/// An entry paired with the backend's lexical rank for the query.
#[derive(Debug, Clone)]
pub struct RankedEntry {
    pub entry: CodeCatalogEntry,
    /// Lexical relevance in [0, 3]; higher is better.
    pub lexical_rank: f32,
}

/// Query primitives the cache/search service exposes over the catalogs.
#[async_trait]
pub trait CatalogIndex: Send + Sync {
    /// Lexical query: candidates ranked by term relevance, best first.
    async fn lexical_search(
        &self,
        kind: CatalogKind,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<RankedEntry>, SearchError>;

    /// Plain substring query used as the degraded fallback path. Results
    /// come back in catalog insertion order with no ranking.
    async fn substring_search(
        &self,
        kind: CatalogKind,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<CodeCatalogEntry>, SearchError>;
}

/// In-memory catalog index over loaded entry lists.
///
/// Lexical rank is the matched-term fraction scaled to [0, 3], with clinical
/// notes and body-part metadata counting at half weight.
pub struct InMemoryCatalog {
    entries: HashMap<CatalogKind, Vec<CodeCatalogEntry>>,
}

impl InMemoryCatalog {
    pub fn new(
        diagnosis: Vec<CodeCatalogEntry>,
        procedure: Vec<CodeCatalogEntry>,
    ) -> Self {
        let mut entries = HashMap::new();
        entries.insert(CatalogKind::Diagnosis, diagnosis);
        entries.insert(CatalogKind::Procedure, procedure);
        Self { entries }
    }

    pub fn entry_count(&self, kind: CatalogKind) -> usize {
        self.entries.get(&kind).map(|e| e.len()).unwrap_or(0)
    }

    fn rank_entry(entry: &CodeCatalogEntry, terms: &[String]) -> f32 {
        if terms.is_empty() {
            return 0.0;
        }
        let description = entry.description.to_lowercase();
        let notes = entry
            .clinical_notes
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_default();
        let body_part = entry
            .body_part
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_default();

        let mut matched = 0.0f32;
        for term in terms {
            if description.contains(term.as_str()) {
                matched += 1.0;
            } else if notes.contains(term.as_str()) || body_part.contains(term.as_str()) {
                matched += 0.5;
            }
        }
        (matched / terms.len() as f32) * 3.0
    }
}

#[async_trait]
impl CatalogIndex for InMemoryCatalog {
    async fn lexical_search(
        &self,
        kind: CatalogKind,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<RankedEntry>, SearchError> {
        let entries = self
            .entries
            .get(&kind)
            .ok_or_else(|| SearchError::UnknownCatalog(kind.as_str().to_string()))?;

        let mut ranked: Vec<RankedEntry> = entries
            .iter()
            .map(|entry| RankedEntry {
                entry: entry.clone(),
                lexical_rank: Self::rank_entry(entry, terms),
            })
            .filter(|r| r.lexical_rank > 0.0)
            .collect();

        ranked.sort_by(|a, b| {
            b.lexical_rank
                .partial_cmp(&a.lexical_rank)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(limit);
        Ok(ranked)
    }

    async fn substring_search(
        &self,
        kind: CatalogKind,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<CodeCatalogEntry>, SearchError> {
        let entries = self
            .entries
            .get(&kind)
            .ok_or_else(|| SearchError::UnknownCatalog(kind.as_str().to_string()))?;

        let matches: Vec<CodeCatalogEntry> = entries
            .iter()
            .filter(|entry| {
                let haystack = format!(
                    "{} {}",
                    entry.code.to_lowercase(),
                    entry.description.to_lowercase()
                );
                terms.iter().any(|t| haystack.contains(t.as_str()))
            })
            .take(limit)
            .cloned()
            .collect();
        Ok(matches)
    }
}
