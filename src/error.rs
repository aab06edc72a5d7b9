use thiserror::Error;

/// Failures of the underlying message channel.
///
/// None of these are retried: the next published state or an explicit
/// `REQUEST_STATE` pull is the recovery path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("no connected peer")]
    Disconnected,
    #[error("transport channel closed")]
    Closed,
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
}

/// Errors produced while synchronizing the queue between host and companion.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("malformed `{topic}` payload: {reason}")]
    Malformed { topic: &'static str, reason: String },

    #[error("invalid queue range {indices:?} for a queue of {queue_size} tracks")]
    InvalidRange {
        indices: Vec<usize>,
        queue_size: usize,
    },

    #[error("invalid state: index {current_index} outside a queue of {queue_size} tracks")]
    InvalidState {
        current_index: usize,
        queue_size: usize,
    },

    #[error("stale generation {received} (current {current:?})")]
    StaleGeneration { received: i64, current: Option<i64> },

    #[error("artwork `{artwork_ref}`: {reason}")]
    Artwork { artwork_ref: String, reason: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub(crate) fn malformed(topic: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            topic,
            reason: reason.into(),
        }
    }

    pub(crate) fn artwork(artwork_ref: &str, reason: impl ToString) -> Self {
        Self::Artwork {
            artwork_ref: artwork_ref.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
