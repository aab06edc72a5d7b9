//! # Protocol Module
//!
//! Message schema shared by the host and the companion.
//!
//! Every exchange is a `(topic, payload)` pair on a best-effort channel:
//!
//! | Topic              | Direction        | Payload                         |
//! |--------------------|------------------|---------------------------------|
//! | `current_state`    | host → companion | JSON [`CurrentState`]           |
//! | `queue_response`   | host → companion | JSON [`QueueRangeResponse`]     |
//! | `playback_command` | companion → host | `NEXT`, `PREVIOUS`, ...         |
//! | `request_seek`     | companion → host | `SEEK_TO:<index>`               |
//! | `request_queue`    | companion → host | comma separated indices         |
//!
//! No ordering holds between messages of different topics. Safety under
//! reordering and duplication comes from the `queue_hash` check the
//! companion performs before merging any response.
//!
//! The (de)serialization lives in [`wire`].

pub mod wire;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, SyncError};

/// Message topics of the host ↔ companion link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    CurrentState,
    QueueResponse,
    PlaybackCommand,
    RequestSeek,
    RequestQueue,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::CurrentState,
        Topic::QueueResponse,
        Topic::PlaybackCommand,
        Topic::RequestSeek,
        Topic::RequestQueue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::CurrentState => "current_state",
            Topic::QueueResponse => "queue_response",
            Topic::PlaybackCommand => "playback_command",
            Topic::RequestSeek => "request_seek",
            Topic::RequestQueue => "request_queue",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|topic| topic.as_str() == name)
    }

    /// True for topics the host emits and the companion consumes.
    pub fn is_host_to_companion(&self) -> bool {
        matches!(self, Topic::CurrentState | Topic::QueueResponse)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the host's playback position.
///
/// `queue_hash` identifies the ordered list ("generation"). A new value means
/// the list was reordered or mutated and every positional index cached under
/// the previous hash is meaningless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CurrentState {
    pub queue_hash: i64,
    pub queue_size: usize,
    pub current_index: usize,
    pub is_playing: bool,
}

impl CurrentState {
    pub fn new(queue_hash: i64, queue_size: usize, current_index: usize, is_playing: bool) -> Self {
        Self {
            queue_hash,
            queue_size,
            current_index,
            is_playing,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue_size == 0
    }

    /// Rejects snapshots whose index does not point inside the queue.
    pub fn validate(&self) -> Result<()> {
        if self.queue_size > 0 && self.current_index >= self.queue_size {
            return Err(SyncError::InvalidState {
                current_index: self.current_index,
                queue_size: self.queue_size,
            });
        }
        Ok(())
    }

    /// Whether `other` belongs to the same generation.
    ///
    /// A size change counts as a new generation even when the hash collides.
    pub fn same_generation(&self, other: &CurrentState) -> bool {
        self.queue_hash == other.queue_hash && self.queue_size == other.queue_size
    }
}

/// Metadata of one queue entry as shown on the companion.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackDescriptor {
    #[serde(rename = "trackName", default)]
    pub title: String,
    #[serde(rename = "artistName", default)]
    pub artist: String,
    #[serde(rename = "albumName", default)]
    pub album: String,
    #[serde(rename = "artworkUrl", default)]
    pub artwork_ref: String,
}

impl TrackDescriptor {
    pub fn new(
        title: impl Into<String>,
        artist: impl Into<String>,
        album: impl Into<String>,
        artwork_ref: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            album: album.into(),
            artwork_ref: artwork_ref.into(),
        }
    }

    pub fn has_artwork(&self) -> bool {
        !self.artwork_ref.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    /// The request contains the currently playing index.
    High,
    Normal,
}

/// Request for a set of queue positions. A contiguous range is the common case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRangeRequest {
    indices: Vec<usize>,
    pub priority: Priority,
}

impl QueueRangeRequest {
    /// Builds a request from arbitrary indices; they are sorted and de-duplicated.
    pub fn new(indices: impl IntoIterator<Item = usize>, priority: Priority) -> Self {
        let mut indices: Vec<usize> = indices.into_iter().collect();
        indices.sort_unstable();
        indices.dedup();
        Self { indices, priority }
    }

    /// `[start, end)`.
    pub fn range(start: usize, end: usize, priority: Priority) -> Self {
        Self::new(start..end, priority)
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.indices.binary_search(&index).is_ok()
    }
}

/// Answer to a [`QueueRangeRequest`], tagged with the generation it was built from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueRangeResponse {
    pub queue_hash: i64,
    pub tracks: BTreeMap<usize, TrackDescriptor>,
    /// Resized artwork blobs keyed by `artwork_ref`, one entry per distinct reference.
    pub artwork: BTreeMap<String, Bytes>,
}

impl QueueRangeResponse {
    pub fn new(queue_hash: i64) -> Self {
        Self {
            queue_hash,
            ..Default::default()
        }
    }

    /// Same tracks without any artwork blob.
    pub fn without_artwork(&self) -> Self {
        Self {
            queue_hash: self.queue_hash,
            tracks: self.tracks.clone(),
            artwork: BTreeMap::new(),
        }
    }
}

/// Playback controls carried on the `playback_command` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackCommand {
    Next,
    Previous,
    PlayPause,
    RequestState,
}

impl PlaybackCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackCommand::Next => "NEXT",
            PlaybackCommand::Previous => "PREVIOUS",
            PlaybackCommand::PlayPause => "PLAY_PAUSE",
            PlaybackCommand::RequestState => "REQUEST_STATE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "NEXT" => Some(PlaybackCommand::Next),
            "PREVIOUS" => Some(PlaybackCommand::Previous),
            "PLAY_PAUSE" => Some(PlaybackCommand::PlayPause),
            "REQUEST_STATE" => Some(PlaybackCommand::RequestState),
            _ => None,
        }
    }
}

/// Everything the companion can ask of the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Playback(PlaybackCommand),
    SeekTo(usize),
    RequestQueue(Vec<usize>),
}

impl Command {
    pub fn topic(&self) -> Topic {
        match self {
            Command::Playback(_) => Topic::PlaybackCommand,
            Command::SeekTo(_) => Topic::RequestSeek,
            Command::RequestQueue(_) => Topic::RequestQueue,
        }
    }
}
