use bytes::Bytes;
use futures::future::join_all;
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, info, warn};

use super::artwork::ArtworkResizer;
use super::player::{ArtworkSource, HostPlayer};
use crate::cache::ArtworkCache;
use crate::error::{Result, SyncError, TransportError};
use crate::protocol::{wire, QueueRangeResponse, Topic};
use crate::transport::Transport;

/// Builds and sends `queue_response` messages for exactly the requested positions.
pub struct RangeResponder {
    player: Arc<dyn HostPlayer>,
    artwork_source: Arc<dyn ArtworkSource>,
    resizer: Arc<dyn ArtworkResizer>,
    artwork_cache: ArtworkCache,
    transport: Arc<dyn Transport>,
    max_dimension: u32,
}

impl RangeResponder {
    pub fn new(
        player: Arc<dyn HostPlayer>,
        artwork_source: Arc<dyn ArtworkSource>,
        resizer: Arc<dyn ArtworkResizer>,
        artwork_cache: ArtworkCache,
        transport: Arc<dyn Transport>,
        max_dimension: u32,
    ) -> Self {
        Self {
            player,
            artwork_source,
            resizer,
            artwork_cache,
            transport,
            max_dimension,
        }
    }

    /// Assembles the response for `indices`.
    ///
    /// The whole request is rejected when any index lies outside the queue.
    /// The response carries the hash of the snapshot the tracks were read
    /// from, so a queue that changes afterwards is caught by the companion.
    pub async fn respond(&self, indices: &[usize]) -> Result<QueueRangeResponse> {
        let slice = self.player.slice(indices);

        if indices.is_empty() || indices.iter().any(|&index| index >= slice.queue_size) {
            return Err(SyncError::InvalidRange {
                indices: indices.to_vec(),
                queue_size: slice.queue_size,
            });
        }

        let mut response = QueueRangeResponse::new(slice.queue_hash);
        response.tracks.extend(slice.tracks);

        let distinct_refs: BTreeSet<String> = response
            .tracks
            .values()
            .filter(|track| track.has_artwork())
            .map(|track| track.artwork_ref.clone())
            .collect();

        let resolved = join_all(distinct_refs.into_iter().map(|artwork_ref| async move {
            let blob = self.resolve_artwork(&artwork_ref).await;
            (artwork_ref, blob)
        }))
        .await;

        response.artwork.extend(
            resolved
                .into_iter()
                .filter_map(|(artwork_ref, blob)| blob.map(|blob| (artwork_ref, blob))),
        );

        debug!(
            "📦 Response for {} indices: {} tracks, {} artwork blobs, hash {}",
            indices.len(),
            response.tracks.len(),
            response.artwork.len(),
            response.queue_hash
        );
        Ok(response)
    }

    /// Answers a request over the transport. Errors are logged, never retried.
    ///
    /// A response over the payload limit is sent once more without artwork.
    pub async fn handle(&self, indices: &[usize]) {
        let response = match self.respond(indices).await {
            Ok(response) => response,
            Err(e) => {
                warn!("🚫 Rejected queue request: {}", e);
                return;
            }
        };

        match self.send(&response) {
            Err(SyncError::Transport(TransportError::PayloadTooLarge { size, limit }))
                if !response.artwork.is_empty() =>
            {
                info!(
                    "✂️ Response of {} bytes exceeds {} bytes, retrying without artwork",
                    size, limit
                );
                if let Err(e) = self.send(&response.without_artwork()) {
                    warn!("⚠️ Queue response dropped: {}", e);
                }
            }
            Err(e) => warn!("⚠️ Queue response dropped: {}", e),
            Ok(()) => {}
        }
    }

    async fn resolve_artwork(&self, artwork_ref: &str) -> Option<Bytes> {
        if let Some(blob) = self.artwork_cache.get(&artwork_ref.to_string()) {
            return Some(blob);
        }

        let original = self.artwork_source.fetch(artwork_ref).await?;
        let resizer = self.resizer.clone();
        let key = artwork_ref.to_string();
        let max_dimension = self.max_dimension;

        let resized = tokio::task::spawn_blocking(move || resizer.resize(&key, &original, max_dimension)).await;

        match resized {
            Ok(Ok(blob)) => {
                self.artwork_cache.insert(artwork_ref.to_string(), blob.clone());
                Some(blob)
            }
            Ok(Err(e)) => {
                warn!("🖼️ Artwork skipped: {}", e);
                None
            }
            Err(e) => {
                warn!("🖼️ Artwork resize task failed for `{}`: {}", artwork_ref, e);
                None
            }
        }
    }

    fn send(&self, response: &QueueRangeResponse) -> Result<()> {
        let payload = wire::encode_response(response)?;
        let limit = self.transport.max_payload();
        if payload.len() > limit {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                limit,
            }
            .into());
        }
        self.transport.send(Topic::QueueResponse, payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::artwork::PassthroughResizer;
    use crate::host::player::{sample_tracks, MemoryPlayer};
    use crate::transport::LocalLink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingSource {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl ArtworkSource for CountingSource {
        async fn fetch(&self, artwork_ref: &str) -> Option<Bytes> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Some(Bytes::from(vec![7u8; 512 + artwork_ref.len()]))
        }
    }

    fn responder(
        player: Arc<MemoryPlayer>,
        source: Arc<CountingSource>,
        transport: Arc<dyn Transport>,
    ) -> RangeResponder {
        RangeResponder::new(
            player,
            source,
            Arc::new(PassthroughResizer),
            ArtworkCache::new(16, Duration::from_secs(60)),
            transport,
            400,
        )
    }

    #[tokio::test]
    async fn test_artwork_resolved_once_per_distinct_ref() {
        let player = Arc::new(MemoryPlayer::new(sample_tracks(12, "q")));
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
        });
        let (host, _companion) = LocalLink::pair(1 << 20, 0.0);
        let responder = responder(player.clone(), source.clone(), Arc::new(host));

        // indices 0..8 share two album covers
        let response = responder.respond(&(0..8).collect::<Vec<_>>()).await.unwrap();

        assert_eq!(response.tracks.len(), 8);
        assert_eq!(response.artwork.len(), 2);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(response.queue_hash, player.state().queue_hash);

        // second request is served from the artwork cache
        responder.respond(&[1, 2]).await.unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_requests_are_rejected() {
        let player = Arc::new(MemoryPlayer::new(sample_tracks(5, "q")));
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
        });
        let (host, _companion) = LocalLink::pair(1 << 20, 0.0);
        let responder = responder(player, source.clone(), Arc::new(host));

        assert!(matches!(
            responder.respond(&[3, 5]).await,
            Err(SyncError::InvalidRange { queue_size: 5, .. })
        ));
        assert!(responder.respond(&[]).await.is_err());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_oversized_response_falls_back_to_tracks_only() {
        let player = Arc::new(MemoryPlayer::new(sample_tracks(4, "q")));
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
        });
        // room for the track metadata but not for the artwork
        let (host, companion) = LocalLink::pair(400, 0.0);
        let mut rx = companion.subscribe();
        let responder = responder(player, source, Arc::new(host));

        responder.handle(&[0, 1]).await;

        let envelope = rx.recv().await.unwrap();
        let response = wire::decode_response(&envelope.payload).unwrap();
        assert_eq!(response.tracks.len(), 2);
        assert!(response.artwork.is_empty());
        assert!(rx.try_recv().is_err());
    }
}
