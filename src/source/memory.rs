//! In-memory `memory:` sources, used for embedded sitemaps and tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;

use crate::error::ProcessingError;
use crate::source::{absolutize, Source, SourceResolver};

pub(crate) const SCHEME: &str = "memory";

#[derive(Debug, Clone)]
struct Entry {
    content: Arc<Vec<u8>>,
    modified: SystemTime,
}

/// Concurrent map of `memory:` URIs to documents.
///
/// Every write gets a strictly later modification time than the previous
/// one, so staleness checks see each update.
#[derive(Debug, Default)]
pub struct MemorySourceResolver {
    entries: DashMap<String, Entry>,
    clock: AtomicU64,
}

impl MemorySourceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&self) -> SystemTime {
        let n = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        SystemTime::UNIX_EPOCH + Duration::from_secs(n)
    }

    fn key(uri: &str) -> String {
        match absolutize(uri, None) {
            Ok(url) if url.scheme() == SCHEME => url.to_string(),
            _ => format!("{}:{}", SCHEME, uri),
        }
    }

    /// Store `content` under `uri` (e.g. `memory:/site/sitemap.json`).
    pub fn insert(&self, uri: &str, content: impl Into<Vec<u8>>) {
        let modified = self.tick();
        self.entries.insert(
            Self::key(uri),
            Entry {
                content: Arc::new(content.into()),
                modified,
            },
        );
    }

    /// Bump the modification time without changing content.
    pub fn touch(&self, uri: &str) {
        let modified = self.tick();
        if let Some(mut entry) = self.entries.get_mut(&Self::key(uri)) {
            entry.modified = modified;
        }
    }

    pub fn remove(&self, uri: &str) {
        self.entries.remove(&Self::key(uri));
    }
}

impl SourceResolver for MemorySourceResolver {
    fn resolve(&self, uri: &str, base: Option<&str>) -> Result<Box<dyn Source>, ProcessingError> {
        let key = absolutize(uri, base)?.to_string();
        let entry = self.entries.get(&key).map(|e| e.value().clone());
        Ok(Box::new(MemorySource { uri: key, entry }))
    }
}

struct MemorySource {
    uri: String,
    entry: Option<Entry>,
}

impl Source for MemorySource {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn exists(&self) -> bool {
        self.entry.is_some()
    }

    fn last_modified(&self) -> Option<SystemTime> {
        self.entry.as_ref().map(|e| e.modified)
    }

    fn read(&self) -> Result<Vec<u8>, ProcessingError> {
        self.entry
            .as_ref()
            .map(|e| e.content.as_ref().clone())
            .ok_or_else(|| ProcessingError::SourceNotFound {
                uri: self.uri.clone(),
            })
    }
}
