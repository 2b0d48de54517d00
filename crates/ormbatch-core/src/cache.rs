//! Second-level query cache.
//!
//! Cached entries hold the raw rows of one load plan, keyed by a fingerprint
//! of the bound command. Each entry remembers when it was stored; a write to
//! any of its query spaces after that moment makes it stale.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use ormbatch_proto::{decode_rows, encode_rows, Row, SqlCommand};

use crate::error::Error;
use crate::loader::QueryParameters;

/// Cache key for one bound command.
///
/// The fingerprint covers the command text, positional and named parameter
/// values, the row selection, the cache region and the transformer name, so
/// transformed and untransformed lookups never share an entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryKey {
    hash: [u8; 32],
}

impl QueryKey {
    /// Compute the key for a command bound with the given parameters.
    pub fn new(command: &SqlCommand, parameters: &QueryParameters) -> Self {
        let mut hasher = blake3::Hasher::new();

        hasher.update(command.sql.as_bytes());
        hasher.update(&[0]);
        for value in &command.parameters {
            hasher.update(value.type_name().as_bytes());
            hasher.update(value.to_string().as_bytes());
            hasher.update(&[0]);
        }
        for (name, value) in &parameters.named {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.type_name().as_bytes());
            hasher.update(value.to_string().as_bytes());
            hasher.update(&[0]);
        }

        let selection = &parameters.selection;
        for part in [selection.first_row, selection.max_rows] {
            match part {
                Some(n) => hasher.update(&(n as u64).to_le_bytes()),
                None => hasher.update(b"-"),
            };
        }

        hasher.update(parameters.cache_region.as_deref().unwrap_or("").as_bytes());
        hasher.update(&[0]);
        hasher.update(parameters.transformer_name().unwrap_or("").as_bytes());

        Self {
            hash: *hasher.finalize().as_bytes(),
        }
    }

    /// Raw fingerprint bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.hash
    }

    /// Hex rendering of the fingerprint.
    pub fn to_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryKey({})", self.to_hex())
    }
}

/// Storage contract for cached query results.
pub trait QueryCache: Send + Sync {
    /// Region name.
    fn region(&self) -> &str;

    /// Rows stored under `key`, unless a space in `spaces` changed since.
    fn get(&self, key: &QueryKey, spaces: &BTreeSet<String>) -> Option<Vec<Row>>;

    /// Store rows. Returns whether the entry was stored.
    fn put(&self, key: QueryKey, rows: &[Row], spaces: &BTreeSet<String>) -> Result<bool, Error>;

    /// Mark query spaces as modified, invalidating entries that read them.
    fn invalidate(&self, spaces: &BTreeSet<String>);

    /// Remove every entry.
    fn clear(&self);
}

/// Default region name.
pub const DEFAULT_REGION: &str = "default-query-results";

struct CacheEntry {
    bytes: Vec<u8>,
    spaces: BTreeSet<String>,
    stored_at: u64,
    hits: AtomicU64,
}

/// Query cache counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
    stale: AtomicU64,
}

impl CacheStats {
    /// Lookups served from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that found nothing usable.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Entries stored.
    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Entries evicted for capacity.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Entries dropped because a query space changed.
    pub fn stale(&self) -> u64 {
        self.stale.load(Ordering::Relaxed)
    }

    /// Hit rate (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

/// Capacity-bounded in-process query cache.
///
/// Rows are stored rkyv-encoded. When full, the entry with the fewest hits
/// is evicted.
pub struct InMemoryQueryCache {
    region: String,
    capacity: usize,
    entries: DashMap<QueryKey, CacheEntry>,
    space_updates: DashMap<String, u64>,
    clock: AtomicU64,
    stats: CacheStats,
}

impl InMemoryQueryCache {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self::with_region(DEFAULT_REGION, capacity)
    }

    /// Create a cache for a named region.
    pub fn with_region(region: impl Into<String>, capacity: usize) -> Self {
        Self {
            region: region.into(),
            capacity,
            entries: DashMap::new(),
            space_updates: DashMap::new(),
            clock: AtomicU64::new(0),
            stats: CacheStats::default(),
        }
    }

    /// Counters.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_stale(&self, stored_at: u64, spaces: &BTreeSet<String>) -> bool {
        spaces.iter().any(|space| {
            self.space_updates
                .get(space)
                .map_or(false, |updated| *updated >= stored_at)
        })
    }

    fn evict_one(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().hits.load(Ordering::Relaxed))
            .map(|entry| *entry.key());

        if let Some(key) = victim {
            self.entries.remove(&key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl QueryCache for InMemoryQueryCache {
    fn region(&self) -> &str {
        &self.region
    }

    fn get(&self, key: &QueryKey, spaces: &BTreeSet<String>) -> Option<Vec<Row>> {
        let lookup = self.entries.get(key).map(|entry| {
            let mut checked = entry.spaces.clone();
            checked.extend(spaces.iter().cloned());
            if self.is_stale(entry.stored_at, &checked) {
                None
            } else {
                entry.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.bytes.clone())
            }
        });

        match lookup {
            Some(Some(bytes)) => match decode_rows(&bytes) {
                Ok(rows) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    Some(rows)
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "dropping undecodable cache entry");
                    self.entries.remove(key);
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            Some(None) => {
                self.entries.remove(key);
                self.stats.stale.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn put(&self, key: QueryKey, rows: &[Row], spaces: &BTreeSet<String>) -> Result<bool, Error> {
        if self.capacity == 0 {
            return Ok(false);
        }
        let bytes = encode_rows(rows).map_err(|e| Error::Cache(e.to_string()))?;

        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.evict_one();
        }

        self.entries.insert(
            key,
            CacheEntry {
                bytes,
                spaces: spaces.clone(),
                stored_at: self.tick(),
                hits: AtomicU64::new(0),
            },
        );
        self.stats.puts.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn invalidate(&self, spaces: &BTreeSet<String>) {
        let now = self.tick();
        for space in spaces {
            self.space_updates.insert(space.clone(), now);
        }
        tracing::debug!(region = %self.region, spaces = ?spaces, "invalidated query spaces");
    }

    fn clear(&self) {
        self.entries.clear();
    }
}
