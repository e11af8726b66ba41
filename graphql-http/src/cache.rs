//! Parsed document cache.

use std::num::NonZeroUsize;

use displaydoc::Display;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

use crate::engine::Document;
use crate::engine::Schema;
use crate::engine::SchemaId;

/// Document cache errors.
#[derive(Debug, Clone, Error, Display, PartialEq, Eq)]
pub enum CacheError {
    /// cached document was validated against schema {cached}, not {requested}
    SchemaMismatch {
        cached: SchemaId,
        requested: SchemaId,
    },
}

/// Caches validated documents by query text.
///
/// Every entry belongs to the schema it was validated against: looking a query up with another
/// schema is an error, never a miss.
pub trait DocumentCache: Send + Sync {
    fn get(&self, query: &str, schema: &Schema) -> Result<Option<Document>, CacheError>;

    fn put(&self, query: &str, schema: &Schema, document: Document);
}

#[derive(Clone, Debug)]
struct CachedDocument {
    schema_id: SchemaId,
    document: Document,
}

/// An in memory LRU [`DocumentCache`].
pub struct InMemoryDocumentCache {
    inner: Mutex<LruCache<String, CachedDocument>>,
}

impl InMemoryDocumentCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    fn key(query: &str) -> String {
        hex::encode(Sha256::digest(query.as_bytes()))
    }
}

impl DocumentCache for InMemoryDocumentCache {
    fn get(&self, query: &str, schema: &Schema) -> Result<Option<Document>, CacheError> {
        let mut inner = self.inner.lock();
        match inner.get(&Self::key(query)) {
            None => Ok(None),
            Some(cached) if &cached.schema_id == schema.id() => Ok(Some(cached.document.clone())),
            Some(cached) => Err(CacheError::SchemaMismatch {
                cached: cached.schema_id.clone(),
                requested: schema.id().clone(),
            }),
        }
    }

    fn put(&self, query: &str, schema: &Schema, document: Document) {
        self.inner.lock().put(
            Self::key(query),
            CachedDocument {
                schema_id: schema.id().clone(),
                document,
            },
        );
    }
}
