//! Short-TTL cache for finished context retrieval result sets.
//!
//! Keys are opaque strings derived from the full query parameter tuple; a
//! hit returns the sorted result set without re-running the hybrid search.
//! Entries expire after a minutes-scale TTL and are dropped lazily on
//! access.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use crate::search::SearchResult;

struct CacheEntry {
    results: Vec<SearchResult>,
    inserted_at: Instant,
}

/// TTL-bounded map of query key to sorted search results.
pub struct ResultCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a result set; expired entries count as misses and are evicted.
    pub async fn get(&self, key: &str) -> Option<Vec<SearchResult>> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                    debug!("Context cache hit for key {}", key);
                    return Some(entry.results.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Entry exists but is stale; evict under the write lock.
        self.entries.write().await.remove(key);
        None
    }

    pub async fn set(&self, key: &str, results: Vec<SearchResult>) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                results,
                inserted_at: Instant::now(),
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
