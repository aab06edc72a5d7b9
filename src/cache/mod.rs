//! # Cache Module
//!
//! Host-side memoization of resized artwork.
//!
//! Resizing and compressing cover art is the most expensive step of answering
//! a queue request, and neighbouring requests usually share the same album
//! art. The [`ArtworkCache`] keeps the compressed blobs keyed by their
//! artwork reference so each one is produced once per TTL window.
//!
//! ## Configuration
//!
//! ```env
//! QUEUE_MIRROR_ARTWORK_CACHE_SIZE=64   # Maximum number of cached blobs
//! QUEUE_MIRROR_ARTWORK_TTL=10m         # Time-to-live per blob
//! ```

pub mod lru_cache;

use bytes::Bytes;
use lru_cache::LRUCache;
use tracing::info;

use crate::config::SyncConfig;

/// Resized artwork blobs keyed by artwork reference.
pub type ArtworkCache = LRUCache<String, Bytes>;

impl ArtworkCache {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.artwork_cache_size, config.artwork_ttl)
    }

    /// Removes expired blobs; meant to run periodically.
    pub fn cleanup_old_entries(&self) {
        let removed = self.cleanup_expired();
        if removed > 0 {
            info!("🧹 Artwork cache cleanup: removed {} expired entries", removed);
        }
    }
}
