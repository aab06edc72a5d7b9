//! # Companion Module
//!
//! The constrained side of the link. It never sees the whole queue; it keeps
//! a small window around the playing track and asks the host for the rest
//! on demand.
//!
//! ## Architecture
//!
//! ### [`cache`] - Windowed Cache
//! - Partial `index → track` map plus decoded artwork, per queue generation
//! - A hash or size change wipes everything and reloads the first page
//! - In-flight requests are coalesced; responses from other generations are ignored
//! - Consumers read a [`QueueView`] from a `watch` channel
//!
//! ### [`window`] - Pagination Math
//! - Initial page placement around the current index
//! - Edge detection and one-page extensions
//!
//! ### [`commands`] - Command Dispatcher
//! - Fire-and-forget playback controls, seeks and queue requests
//!
//! ### [`artwork`] - Artwork Decoding
//! - [`ImageDecoder`] validates blobs with the `image` crate
//! - [`RawDecoder`] stores them untouched
//!
//! ### [`service`] - Companion Service
//! - Routes host topics into the cache
//!
//! ## Timing
//!
//! ```env
//! QUEUE_MIRROR_PAGE_SIZE=7            # Positions added per extension
//! QUEUE_MIRROR_RESPONSE_TIMEOUT=5s    # Bound on every wait for the host
//! QUEUE_MIRROR_MAX_CACHED_TRACKS=64   # Trim threshold
//! QUEUE_MIRROR_RETENTION_MARGIN=14    # Kept around the window when trimming
//! ```

pub mod artwork;
pub mod cache;
pub mod commands;
pub mod service;
pub mod window;

pub use artwork::{Artwork, ArtworkDecoder, ImageDecoder, RawDecoder};
pub use cache::{CachePhase, QueueView, RequestOutcome, WindowEntry, WindowedCache};
pub use commands::CommandDispatcher;
pub use service::CompanionService;
pub use window::{initial_page_range, DisplayWindow, Edge};
