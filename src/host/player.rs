use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::protocol::{CurrentState, TrackDescriptor};

/// Consistent read of several queue positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSlice {
    pub queue_hash: i64,
    pub queue_size: usize,
    /// Only the positions that exist in the queue, in request order.
    pub tracks: Vec<(usize, TrackDescriptor)>,
}

/// The host's playback engine as seen by the sync layer.
pub trait HostPlayer: Send + Sync {
    fn state(&self) -> CurrentState;

    /// Receiver notified on every state change.
    fn watch_state(&self) -> watch::Receiver<CurrentState>;

    /// Reads `indices` and the generation they belong to from one snapshot.
    fn slice(&self, indices: &[usize]) -> QueueSlice;

    fn next(&self);
    fn previous(&self);
    fn toggle_play_pause(&self);

    /// Jumps to `index` and starts playback. Returns false when out of range.
    fn seek_to(&self, index: usize) -> bool;
}

/// Provider of the original (full size) artwork bytes for a reference.
#[async_trait]
pub trait ArtworkSource: Send + Sync {
    async fn fetch(&self, artwork_ref: &str) -> Option<Bytes>;
}

/// Derives the generation hash from the identities of the queued items.
pub fn queue_hash<'a>(uids: impl IntoIterator<Item = &'a str>) -> i64 {
    let mut hasher = DefaultHasher::new();
    let mut count = 0usize;
    for uid in uids {
        uid.hash(&mut hasher);
        count += 1;
    }
    count.hash(&mut hasher);
    hasher.finish() as i64
}

/// One entry of the host queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTrack {
    /// Stable identity of the queue item; two entries of the same song differ.
    pub uid: String,
    pub descriptor: TrackDescriptor,
    /// Embedded cover art, if the media carries any.
    pub artwork: Option<Bytes>,
}

impl HostTrack {
    pub fn new(uid: impl Into<String>, descriptor: TrackDescriptor) -> Self {
        Self {
            uid: uid.into(),
            descriptor,
            artwork: None,
        }
    }

    pub fn with_artwork(mut self, artwork: Bytes) -> Self {
        self.artwork = Some(artwork);
        self
    }
}

#[derive(Debug)]
struct PlayerQueue {
    tracks: Vec<HostTrack>,
    current_index: usize,
    is_playing: bool,
    queue_hash: i64,
}

impl PlayerQueue {
    fn state(&self) -> CurrentState {
        CurrentState::new(self.queue_hash, self.tracks.len(), self.current_index, self.is_playing)
    }
}

/// In-memory player used by the demo binary and tests.
pub struct MemoryPlayer {
    queue: RwLock<PlayerQueue>,
    state_tx: watch::Sender<CurrentState>,
}

impl MemoryPlayer {
    pub fn new(tracks: Vec<HostTrack>) -> Self {
        let queue = PlayerQueue {
            queue_hash: queue_hash(tracks.iter().map(|t| t.uid.as_str())),
            tracks,
            current_index: 0,
            is_playing: false,
        };
        let (state_tx, _) = watch::channel(queue.state());
        Self {
            queue: RwLock::new(queue),
            state_tx,
        }
    }

    /// Replaces the whole queue, which starts a new generation.
    pub fn replace_queue(&self, tracks: Vec<HostTrack>, current_index: usize) {
        self.update(|q| {
            q.queue_hash = queue_hash(tracks.iter().map(|t| t.uid.as_str()));
            q.current_index = current_index.min(tracks.len().saturating_sub(1));
            q.tracks = tracks;
        });
        info!("📋 Host queue replaced ({} tracks)", self.queue.read().tracks.len());
    }

    pub fn set_playing(&self, playing: bool) {
        self.update(|q| q.is_playing = playing);
    }

    fn update(&self, mutate: impl FnOnce(&mut PlayerQueue)) {
        let state = {
            let mut q = self.queue.write();
            mutate(&mut q);
            q.state()
        };
        self.state_tx.send_replace(state);
    }
}

impl HostPlayer for MemoryPlayer {
    fn state(&self) -> CurrentState {
        self.queue.read().state()
    }

    fn watch_state(&self) -> watch::Receiver<CurrentState> {
        self.state_tx.subscribe()
    }

    fn slice(&self, indices: &[usize]) -> QueueSlice {
        let q = self.queue.read();
        QueueSlice {
            queue_hash: q.queue_hash,
            queue_size: q.tracks.len(),
            tracks: indices
                .iter()
                .filter_map(|&index| q.tracks.get(index).map(|t| (index, t.descriptor.clone())))
                .collect(),
        }
    }

    fn next(&self) {
        self.update(|q| {
            if q.current_index + 1 < q.tracks.len() {
                q.current_index += 1;
            }
        });
        debug!("⏭️ Host skipped forward");
    }

    fn previous(&self) {
        self.update(|q| q.current_index = q.current_index.saturating_sub(1));
        debug!("⏮️ Host skipped back");
    }

    fn toggle_play_pause(&self) {
        self.update(|q| q.is_playing = !q.is_playing);
    }

    fn seek_to(&self, index: usize) -> bool {
        let mut accepted = false;
        self.update(|q| {
            if index < q.tracks.len() {
                q.current_index = index;
                q.is_playing = true;
                accepted = true;
            }
        });
        accepted
    }
}

#[async_trait]
impl ArtworkSource for MemoryPlayer {
    async fn fetch(&self, artwork_ref: &str) -> Option<Bytes> {
        let q = self.queue.read();
        q.tracks
            .iter()
            .find(|t| t.descriptor.artwork_ref == artwork_ref)
            .and_then(|t| t.artwork.clone())
    }
}

#[cfg(test)]
pub(crate) fn sample_tracks(count: usize, prefix: &str) -> Vec<HostTrack> {
    (0..count)
        .map(|i| {
            HostTrack::new(
                format!("{}-{}", prefix, i),
                TrackDescriptor::new(
                    format!("Song {}", i),
                    "Artist",
                    format!("Album {}", i / 4),
                    format!("art://{}/{}", prefix, i / 4),
                ),
            )
        })
        .collect()
}
