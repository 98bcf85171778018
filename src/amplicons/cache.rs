//! Process-scoped cache of resolved amplicon sets.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::AmpliconSet;

/// Maps `(canonical scheme name, version)` to its resolved set. Sets are
/// resolved once, during request validation, and shared read-only with the
/// workers afterwards.
#[derive(Debug, Default)]
pub struct AmpliconCache {
    inner: RwLock<HashMap<(String, i64), Arc<AmpliconSet>>>,
}

impl AmpliconCache {
    pub fn new() -> Self {
        AmpliconCache::default()
    }

    pub fn get(&self, scheme: &str, version: i64) -> Option<Arc<AmpliconSet>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.get(&(scheme.to_string(), version)).cloned()
    }

    pub fn insert(&self, scheme: &str, version: i64, set: AmpliconSet) -> Arc<AmpliconSet> {
        let set = Arc::new(set);
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.insert((scheme.to_string(), version), Arc::clone(&set));
        set
    }

    pub fn contains(&self, scheme: &str, version: i64) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.contains_key(&(scheme.to_string(), version))
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
