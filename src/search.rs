//! Context retrieval: weighted hybrid search over the code catalogs.
//!
//! Given the extracted keywords, each catalog is queried with a lexical pass
//! plus a fuzzy similarity blend, exact and partial code matches are
//! boosted, and the sorted, truncated result set is cached behind a key
//! derived from the full query tuple. If the hybrid path fails for any
//! reason the retriever degrades to a flat substring query — context
//! retrieval never aborts the validation pipeline.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use strsim::jaro_winkler;
use tracing::{debug, warn};

use crate::cache::ResultCache;
use crate::catalog::{CatalogIndex, CatalogKind, CodeCatalogEntry, RankedEntry};
use crate::keywords::Keyword;

/// Added when a candidate's code equals a query term exactly.
const EXACT_CODE_BOOST: f32 = 50.0;
/// Added for partial/substring code matches.
const PARTIAL_CODE_BOOST: f32 = 10.0;
/// Fuzzy blend weights: code similarity matters less than description
/// similarity.
const CODE_SIM_WEIGHT: f32 = 0.35;
const DESC_SIM_WEIGHT: f32 = 0.65;
/// How many lexical candidates to pull per requested result.
const CANDIDATE_FACTOR: usize = 4;
/// Minimum term length considered for partial code matching.
const MIN_PARTIAL_LEN: usize = 3;

/// A catalog entry with its final hybrid relevance score.
///
/// Result sets are always sorted by descending score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub entry: CodeCatalogEntry,
    pub score: f32,
}

/// Context retrieved for one validation call, one list per catalog.
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub diagnosis: Vec<SearchResult>,
    pub procedure: Vec<SearchResult>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.diagnosis.is_empty() && self.procedure.is_empty()
    }
}

/// Full parameter tuple of one catalog query; the cache key covers all of it.
#[derive(Debug, Clone)]
pub struct ContextQuery {
    pub kind: CatalogKind,
    pub terms: Vec<String>,
    pub limit: usize,
    pub offset: usize,
}

impl ContextQuery {
    pub fn new(kind: CatalogKind, terms: Vec<String>, limit: usize) -> Self {
        Self {
            kind,
            terms,
            limit,
            offset: 0,
        }
    }

    fn cache_key(&self) -> String {
        format!(
            "ctx:{}:{}:{}:{}",
            self.kind.as_str(),
            self.limit,
            self.offset,
            self.terms.join(",")
        )
    }
}

/// Hybrid retriever over the two catalogs with a shared TTL result cache.
pub struct ContextRetriever {
    index: Arc<dyn CatalogIndex>,
    cache: ResultCache,
}

impl ContextRetriever {
    pub fn new(index: Arc<dyn CatalogIndex>, cache_ttl: Duration) -> Self {
        Self {
            index,
            cache: ResultCache::new(cache_ttl),
        }
    }

    /// Retrieve context from both catalogs for the given keywords.
    ///
    /// The two catalog queries are independent reads and run concurrently.
    pub async fn retrieve_context(&self, keywords: &[Keyword], limit: usize) -> RetrievedContext {
        let terms: Vec<String> = keywords.iter().map(|k| k.text.clone()).collect();
        if terms.is_empty() {
            return RetrievedContext::default();
        }

        let diagnosis_query = ContextQuery::new(CatalogKind::Diagnosis, terms.clone(), limit);
        let procedure_query = ContextQuery::new(CatalogKind::Procedure, terms, limit);

        let (diagnosis, procedure) = tokio::join!(
            self.retrieve(&diagnosis_query),
            self.retrieve(&procedure_query)
        );

        RetrievedContext {
            diagnosis,
            procedure,
        }
    }

    /// Run one catalog query: cache, hybrid search, substring fallback.
    pub async fn retrieve(&self, query: &ContextQuery) -> Vec<SearchResult> {
        let key = query.cache_key();
        if let Some(cached) = self.cache.get(&key).await {
            return cached;
        }

        let results = match self.hybrid_search(query).await {
            Ok(results) => results,
            Err(e) => {
                warn!(
                    "Hybrid search failed for {} catalog ({}), falling back to substring query",
                    query.kind.as_str(),
                    e
                );
                self.fallback_search(query).await
            }
        };

        self.cache.set(&key, results.clone()).await;
        results
    }

    async fn hybrid_search(
        &self,
        query: &ContextQuery,
    ) -> Result<Vec<SearchResult>, crate::catalog::SearchError> {
        let candidate_limit = (query.limit + query.offset) * CANDIDATE_FACTOR;
        let candidates = self
            .index
            .lexical_search(query.kind, &query.terms, candidate_limit.max(16))
            .await?;

        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .map(|candidate| score_candidate(candidate, &query.terms))
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry.code.cmp(&b.entry.code))
        });

        let results: Vec<SearchResult> = results
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();

        debug!(
            "Hybrid search over {} catalog returned {} results",
            query.kind.as_str(),
            results.len()
        );
        Ok(results)
    }

    /// Degraded path: substring matches in catalog insertion order, flat
    /// scores.
    async fn fallback_search(&self, query: &ContextQuery) -> Vec<SearchResult> {
        match self
            .index
            .substring_search(query.kind, &query.terms, query.limit + query.offset)
            .await
        {
            Ok(entries) => entries
                .into_iter()
                .skip(query.offset)
                .map(|entry| SearchResult { entry, score: 0.0 })
                .collect(),
            Err(e) => {
                warn!(
                    "Substring fallback also failed for {} catalog: {}",
                    query.kind.as_str(),
                    e
                );
                Vec::new()
            }
        }
    }
}

/// Final score: lexical rank + weighted fuzzy blend + code-match boost.
fn score_candidate(candidate: RankedEntry, terms: &[String]) -> SearchResult {
    let fuzzy = fuzzy_similarity(&candidate.entry, terms);
    let boost = code_match_boost(&candidate.entry, terms);
    SearchResult {
        score: candidate.lexical_rank + fuzzy + boost,
        entry: candidate.entry,
    }
}

/// Weighted blend of code similarity (lower weight) and description
/// similarity (higher weight), each the best Jaro-Winkler match across the
/// query terms.
fn fuzzy_similarity(entry: &CodeCatalogEntry, terms: &[String]) -> f32 {
    let code = entry.code.to_lowercase();
    let description = entry.description.to_lowercase();

    let mut best_code = 0.0f32;
    let mut best_desc = 0.0f32;
    for term in terms {
        best_code = best_code.max(jaro_winkler(&code, term) as f32);
        for word in description.split_whitespace() {
            best_desc = best_desc.max(jaro_winkler(word, term) as f32);
        }
    }

    CODE_SIM_WEIGHT * best_code + DESC_SIM_WEIGHT * best_desc
}

/// Exact code match gets the large boost; substring overlap in either
/// direction gets the smaller one.
fn code_match_boost(entry: &CodeCatalogEntry, terms: &[String]) -> f32 {
    let code = entry.code.to_lowercase();
    if terms.iter().any(|t| t == &code) {
        return EXACT_CODE_BOOST;
    }
    let partial = terms.iter().any(|t| {
        t.len() >= MIN_PARTIAL_LEN && (code.contains(t.as_str()) || t.contains(code.as_str()))
    });
    if partial {
        PARTIAL_CODE_BOOST
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogIndex, InMemoryCatalog, SearchError};
    use crate::keywords::{Keyword, KeywordCategory};
    use async_trait::async_trait;

    fn keyword(text: &str, category: KeywordCategory) -> Keyword {
        Keyword {
            text: text.to_string(),
            category,
        }
    }

    fn sample_index() -> Arc<InMemoryCatalog> {
        Arc::new(InMemoryCatalog::new(
            vec![
                CodeCatalogEntry::new("K35.80", "Acute appendicitis, unspecified"),
                CodeCatalogEntry::new("R10.31", "Right lower quadrant pain"),
            ],
            vec![
                CodeCatalogEntry::new("74177", "CT abdomen and pelvis with contrast"),
                CodeCatalogEntry::new("74176", "CT abdomen and pelvis without contrast"),
                CodeCatalogEntry::new("71045", "Chest x-ray, single view"),
            ],
        ))
    }

    fn retriever() -> ContextRetriever {
        ContextRetriever::new(sample_index(), Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_exact_code_beats_partial_beats_description() {
        let index = Arc::new(InMemoryCatalog::new(
            vec![],
            vec![
                CodeCatalogEntry::new("74177", "CT abdomen and pelvis with contrast"),
                CodeCatalogEntry::new("7417", "Partial family of abdomen studies"),
                CodeCatalogEntry::new("99999", "Abdomen survey study"),
            ],
        ));
        let retriever = ContextRetriever::new(index, Duration::from_secs(300));
        let query = ContextQuery::new(
            CatalogKind::Procedure,
            vec!["74177".to_string(), "abdomen".to_string()],
            10,
        );
        let results = retriever.retrieve(&query).await;
        assert_eq!(results[0].entry.code, "74177");
        assert_eq!(results[1].entry.code, "7417");
        assert_eq!(results[2].entry.code, "99999");
        assert!(results[0].score > results[1].score);
        assert!(results[1].score > results[2].score);
    }

    #[tokio::test]
    async fn test_results_sorted_descending_and_truncated() {
        let retriever = retriever();
        let keywords = vec![
            keyword("ct", KeywordCategory::Modality),
            keyword("abdomen", KeywordCategory::Anatomy),
            keyword("pelvis", KeywordCategory::Anatomy),
            keyword("contrast", KeywordCategory::Modality),
        ];
        let context = retriever.retrieve_context(&keywords, 2).await;
        assert_eq!(context.procedure.len(), 2);
        assert!(context.procedure[0].score >= context.procedure[1].score);
        assert!(context.procedure[0]
            .entry
            .description
            .contains("CT abdomen"));
    }

    #[tokio::test]
    async fn test_empty_keywords_yield_empty_context() {
        let retriever = retriever();
        let context = retriever.retrieve_context(&[], 5).await;
        assert!(context.is_empty());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_search() {
        let retriever = retriever();
        let query = ContextQuery::new(CatalogKind::Procedure, vec!["abdomen".to_string()], 5);
        let first = retriever.retrieve(&query).await;
        let second = retriever.retrieve(&query).await;
        assert_eq!(first.len(), second.len());
        assert_eq!(retriever.cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_cache_key_covers_parameter_tuple() {
        let a = ContextQuery::new(CatalogKind::Procedure, vec!["abdomen".to_string()], 5);
        let mut b = a.clone();
        b.offset = 5;
        let c = ContextQuery::new(CatalogKind::Diagnosis, vec!["abdomen".to_string()], 5);
        assert_ne!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
    }

    /// Index whose lexical path always fails, to exercise the fallback.
    struct BrokenLexicalIndex {
        inner: Arc<InMemoryCatalog>,
    }

    #[async_trait]
    impl CatalogIndex for BrokenLexicalIndex {
        async fn lexical_search(
            &self,
            _kind: CatalogKind,
            _terms: &[String],
            _limit: usize,
        ) -> Result<Vec<RankedEntry>, SearchError> {
            Err(SearchError::QueryFailed("index offline".to_string()))
        }

        async fn substring_search(
            &self,
            kind: CatalogKind,
            terms: &[String],
            limit: usize,
        ) -> Result<Vec<CodeCatalogEntry>, SearchError> {
            self.inner.substring_search(kind, terms, limit).await
        }
    }

    #[tokio::test]
    async fn test_fallback_substring_search_on_hybrid_failure() {
        let index = Arc::new(BrokenLexicalIndex {
            inner: sample_index(),
        });
        let retriever = ContextRetriever::new(index, Duration::from_secs(300));
        let query = ContextQuery::new(CatalogKind::Procedure, vec!["abdomen".to_string()], 5);
        let results = retriever.retrieve(&query).await;
        assert_eq!(results.len(), 2);
        // Flat ranking preserves insertion order
        assert_eq!(results[0].entry.code, "74177");
        assert_eq!(results[1].entry.code, "74176");
        assert!(results.iter().all(|r| r.score == 0.0));
    }
}
