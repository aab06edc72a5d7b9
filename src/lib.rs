//! # Queue Mirror
//!
//! Keeps a scrollable window of a large playback queue on a constrained
//! companion device in sync with the host that owns the queue.
//!
//! The two sides only talk through a lossy, size-limited message channel:
//!
//! ```text
//! host player ─▶ StatePublisher ─▶ current_state ─────▶ WindowedCache ─▶ QueueView
//!                RangeResponder ◀─ request_queue ◀───── (coalesced)
//!                RangeResponder ─▶ queue_response ────▶ merge (hash checked)
//! host player ◀─ HostService    ◀─ playback_command / request_seek ◀─ CommandDispatcher
//! ```
//!
//! - [`host`]: debounced state publishing and range responses
//! - [`companion`]: the windowed cache, pagination and command dispatch
//! - [`protocol`]: topics, message types and their wire encoding
//! - [`transport`]: the channel abstraction and an in-memory link
//! - [`cache`]: host-side artwork memoization
//! - [`config`]: environment-driven tunables

pub mod cache;
pub mod companion;
pub mod config;
pub mod error;
pub mod host;
pub mod protocol;
pub mod transport;

pub use config::SyncConfig;
pub use error::{Result, SyncError, TransportError};
pub use protocol::{CurrentState, QueueRangeRequest, QueueRangeResponse, Topic, TrackDescriptor};
pub use transport::{Envelope, LocalEndpoint, LocalLink, Transport};
