//! # Host Module
//!
//! The authoritative side of the link: owns the playback queue and answers
//! the companion.
//!
//! ## Architecture
//!
//! ### [`player`] - Playback Source
//! - [`HostPlayer`] abstracts the engine (state, controls, queue reads)
//! - [`MemoryPlayer`] is an in-memory engine for tests and the demo
//! - The generation hash is derived from the queue item identities
//!
//! ### [`publisher`] - State Publisher
//! - Debounced `current_state` snapshots (300ms by default)
//! - Consecutive duplicates are suppressed
//! - `REQUEST_STATE` pulls bypass the debounce
//!
//! ### [`responder`] - Range Responder
//! - Serves exactly the requested positions, tagged with the queue hash
//! - Each distinct cover is fetched and resized once per request
//! - Oversized responses are retried without artwork
//!
//! ### [`service`] - Host Service
//! - Routes companion topics to the player and the responder
//! - Requests containing the current index are served first
//!
//! ## Configuration
//!
//! ```env
//! QUEUE_MIRROR_DEBOUNCE=300ms
//! QUEUE_MIRROR_ARTWORK_MAX_DIMENSION=400
//! QUEUE_MIRROR_ARTWORK_QUALITY=80
//! ```

pub mod artwork;
pub mod player;
pub mod publisher;
pub mod responder;
pub mod service;

pub use artwork::{ArtworkResizer, JpegResizer, PassthroughResizer};
pub use player::{ArtworkSource, HostPlayer, HostTrack, MemoryPlayer, QueueSlice};
pub use publisher::StatePublisher;
pub use responder::RangeResponder;
pub use service::HostService;
