use bytes::Bytes;
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{watch, Notify},
    time::{timeout_at, Instant},
};
use tracing::{debug, info, warn};

use super::artwork::{Artwork, ArtworkDecoder};
use super::commands::CommandDispatcher;
use super::window::{initial_page_range, DisplayWindow, Edge};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::protocol::{CurrentState, Priority, QueueRangeRequest, QueueRangeResponse, TrackDescriptor};

/// Lifecycle of one queue generation on the companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePhase {
    /// No state received yet.
    #[default]
    Empty,
    /// A new generation was seen; waiting for its first response.
    Initializing,
    Ready,
}

/// Result of asking the cache for a set of positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Everything asked for is cached or already in flight. Nothing was sent.
    Satisfied,
    /// These indices were requested from the host.
    Sent(Vec<usize>),
    /// No generation to request against, or the transport refused the message.
    Failed,
}

/// One row of the displayed window. `track` is `None` while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEntry {
    pub index: usize,
    pub track: Option<TrackDescriptor>,
    pub artwork: Option<Artwork>,
}

impl WindowEntry {
    pub fn is_loading(&self) -> bool {
        self.track.is_none()
    }
}

/// Render-ready snapshot handed to the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueView {
    pub state: Option<CurrentState>,
    pub phase: CachePhase,
    pub window: Vec<WindowEntry>,
}

impl QueueView {
    pub fn current_entry(&self) -> Option<&WindowEntry> {
        let current = self.state?.current_index;
        self.window.iter().find(|entry| entry.index == current)
    }

    pub fn indices(&self) -> Vec<usize> {
        self.window.iter().map(|entry| entry.index).collect()
    }

    pub fn loading(&self) -> usize {
        self.window.iter().filter(|entry| entry.is_loading()).count()
    }
}

/// What an ingest is waiting for, plus the markers it placed.
enum Wait {
    FirstMerge(Vec<usize>),
    Track(usize, Vec<usize>),
}

impl Wait {
    fn markers(&self) -> &[usize] {
        match self {
            Wait::FirstMerge(markers) | Wait::Track(_, markers) => markers,
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    /// Snapshot that opened the current generation.
    generation: Option<CurrentState>,
    /// Last adopted state; `None` while a reset is settling.
    state: Option<CurrentState>,
    /// Most recent current index seen, adopted or not.
    focus: Option<usize>,
    phase: CachePhase,
    tracks: BTreeMap<usize, TrackDescriptor>,
    /// `None` marks artwork that arrived but could not be decoded.
    artwork: HashMap<String, Option<Artwork>>,
    window: DisplayWindow,
    pending: HashMap<usize, Instant>,
    latest_ticket: u64,
}

impl CacheState {
    fn is_generation(&self, state: &CurrentState) -> bool {
        self.generation
            .as_ref()
            .is_some_and(|generation| generation.same_generation(state))
    }

    /// Forgets markers whose response should have arrived long ago.
    fn expire_pending(&mut self, now: Instant, timeout: Duration) {
        self.pending.retain(|index, since| {
            let alive = now.duration_since(*since) < timeout;
            if !alive {
                debug!("⌛ Request for index {} presumed lost", index);
            }
            alive
        });
    }

    /// Updates the window after `merged` positions became available.
    fn place(&mut self, merged: &BTreeSet<usize>, slack: usize) {
        let (Some(&first), Some(&last)) = (merged.first(), merged.last()) else {
            return;
        };
        let span = DisplayWindow::new(first..last + 1);
        let holds_focus = self.focus.is_some_and(|focus| merged.contains(&focus));

        if self.window.is_empty() {
            let near_focus = match self.focus {
                Some(focus) => holds_focus || span.distance_to(focus) <= slack,
                None => true,
            };
            if near_focus {
                self.window = span;
            }
            return;
        }

        let mut start = self.window.start();
        let mut end = self.window.end();
        while merged.contains(&end) {
            end += 1;
        }
        while start > 0 && merged.contains(&(start - 1)) {
            start -= 1;
        }
        if start != self.window.start() || end != self.window.end() {
            self.window = DisplayWindow::new(start..end);
            return;
        }

        let far = merged.iter().all(|&index| self.window.distance_to(index) > slack);
        if far && holds_focus {
            debug!(
                "🎯 Refocusing window {:?} on {:?}",
                self.window.range(),
                span.range()
            );
            self.window = span;
            return;
        }

        // a focus outside the window is refocused when its state is adopted
        let refocus_pending = self.focus.is_some_and(|focus| holds_focus && !self.window.contains(focus));
        let near = merged.iter().all(|&index| self.window.distance_to(index) <= slack);
        if near && !refocus_pending {
            self.window.cover(span.range());
        }
    }

    /// Drops tracks far from the window and the focus once over `max_tracks`.
    fn trim(&mut self, max_tracks: usize, margin: usize) -> usize {
        if self.tracks.len() <= max_tracks {
            return 0;
        }

        let keep_window = (!self.window.is_empty())
            .then(|| self.window.start().saturating_sub(margin)..self.window.end().saturating_add(margin));
        let keep_focus = self
            .focus
            .map(|focus| focus.saturating_sub(margin)..focus.saturating_add(margin + 1));

        let before = self.tracks.len();
        self.tracks.retain(|index, _| {
            keep_window.as_ref().is_some_and(|r| r.contains(index))
                || keep_focus.as_ref().is_some_and(|r| r.contains(index))
        });

        let referenced: HashSet<&str> = self
            .tracks
            .values()
            .map(|track| track.artwork_ref.as_str())
            .collect();
        self.artwork
            .retain(|artwork_ref, _| referenced.contains(artwork_ref.as_str()));

        before - self.tracks.len()
    }

    fn view(&self) -> QueueView {
        let window = self
            .window
            .range()
            .map(|index| {
                let track = self.tracks.get(&index).cloned();
                let artwork = track
                    .as_ref()
                    .filter(|track| track.has_artwork())
                    .and_then(|track| self.artwork.get(&track.artwork_ref).cloned().flatten());
                WindowEntry {
                    index,
                    track,
                    artwork,
                }
            })
            .collect();

        QueueView {
            state: self.state,
            phase: self.phase,
            window,
        }
    }
}

/// The companion's partial, generation-checked copy of the host queue.
///
/// All mutable state sits behind one mutex. Filtering a request against
/// the cache and the in-flight set, marking it pending and sending it
/// happen under that lock, so an index is never requested twice and never
/// both pending and cached. Waiters park on a [`Notify`] fired after every
/// merge and always give up after `response_timeout`.
pub struct WindowedCache {
    inner: Mutex<CacheState>,
    merged: Notify,
    view_tx: watch::Sender<QueueView>,
    dispatcher: CommandDispatcher,
    decoder: Arc<dyn ArtworkDecoder>,
    config: SyncConfig,
}

impl WindowedCache {
    pub fn new(config: SyncConfig, dispatcher: CommandDispatcher, decoder: Arc<dyn ArtworkDecoder>) -> Self {
        let (view_tx, _) = watch::channel(QueueView::default());
        Self {
            inner: Mutex::new(CacheState::default()),
            merged: Notify::new(),
            view_tx,
            dispatcher,
            decoder,
            config,
        }
    }

    /// Applies a state published by the host.
    ///
    /// A new generation (hash or size change) wipes the cache and requests
    /// the initial page. A known generation whose current track is missing
    /// requests it. Either way the state is adopted once the response is
    /// merged or `response_timeout` elapses, unless a newer state or
    /// generation arrived in between.
    pub async fn ingest_state(&self, state: CurrentState) -> Result<()> {
        state.validate()?;
        let deadline = Instant::now() + self.config.response_timeout;

        let (ticket, wait) = {
            let mut inner = self.inner.lock();
            inner.latest_ticket += 1;
            let ticket = inner.latest_ticket;
            let wait = if inner.is_generation(&state) {
                inner.focus = Some(state.current_index);
                self.request_current_locked(&mut inner, &state)
            } else {
                self.reset_locked(&mut inner, &state)
            };
            (ticket, wait)
        };

        if let Some(wait) = wait {
            let settled = match &wait {
                Wait::FirstMerge(_) => {
                    self.wait_until(deadline, move |inner| {
                        !inner.is_generation(&state) || inner.phase != CachePhase::Initializing
                    })
                    .await
                }
                Wait::Track(index, _) => {
                    let index = *index;
                    self.wait_until(deadline, move |inner| {
                        !inner.is_generation(&state)
                            || inner.tracks.contains_key(&index)
                            || !inner.pending.contains_key(&index)
                    })
                    .await
                }
            };
            if !settled {
                self.release_markers(&state, wait.markers());
            }
        }

        let mut inner = self.inner.lock();
        if !inner.is_generation(&state) {
            debug!("Generation changed while waiting, state {:?} dropped", state);
            return Ok(());
        }
        if inner.latest_ticket != ticket {
            debug!("State {:?} superseded by a newer one", state);
            return Ok(());
        }

        inner.state = Some(state);
        inner.focus = Some(state.current_index);
        self.paginate_locked(&mut inner);
        self.publish_locked(&inner);
        Ok(())
    }

    /// Merges a host response.
    ///
    /// Artwork is decoded on the blocking pool before the cache is locked.
    /// Returns the number of tracks merged, or `StaleGeneration` when the
    /// response belongs to another generation; nothing is touched then.
    pub async fn merge_response(&self, mut response: QueueRangeResponse) -> Result<usize> {
        self.check_generation(response.queue_hash)?;

        let blobs = std::mem::take(&mut response.artwork);
        let decoded = if blobs.is_empty() {
            Vec::new()
        } else {
            let decoder = self.decoder.clone();
            let refs: Vec<String> = blobs.keys().cloned().collect();
            match tokio::task::spawn_blocking(move || decode_all(decoder.as_ref(), blobs)).await {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("🖼️ Artwork decode task failed: {}", e);
                    refs.into_iter().map(|artwork_ref| (artwork_ref, None)).collect()
                }
            }
        };

        let (merged, window) = {
            let mut inner = self.inner.lock();
            // the generation may have moved on while decoding
            let generation = match inner.generation {
                Some(generation) if generation.queue_hash == response.queue_hash => generation,
                other => {
                    return Err(SyncError::StaleGeneration {
                        received: response.queue_hash,
                        current: other.map(|generation| generation.queue_hash),
                    });
                }
            };

            let mut merged = BTreeSet::new();
            for (index, track) in response.tracks {
                if index >= generation.queue_size {
                    debug!("Dropping index {} beyond queue size {}", index, generation.queue_size);
                    continue;
                }
                inner.pending.remove(&index);
                inner.tracks.insert(index, track);
                merged.insert(index);
            }
            inner.artwork.extend(decoded);

            inner.place(&merged, self.config.page_size);
            inner.phase = CachePhase::Ready;

            let trimmed = inner.trim(self.config.max_cached_tracks, self.config.retention_margin);
            if trimmed > 0 {
                debug!("🧹 Trimmed {} tracks outside the retention margin", trimmed);
            }

            self.publish_locked(&inner);
            (merged.len(), inner.window.range())
        };

        self.merged.notify_waiters();
        debug!("📥 Merged {} tracks, window {:?}", merged, window);
        Ok(merged)
    }

    fn check_generation(&self, queue_hash: i64) -> Result<()> {
        let current = self.inner.lock().generation.map(|generation| generation.queue_hash);
        if current == Some(queue_hash) {
            return Ok(());
        }
        Err(SyncError::StaleGeneration {
            received: queue_hash,
            current,
        })
    }

    /// Requests whatever part of `indices` is neither cached nor in flight.
    pub fn request_indices(&self, indices: &[usize]) -> RequestOutcome {
        let mut inner = self.inner.lock();
        self.request_locked(&mut inner, indices.iter().copied())
    }

    /// The consumer scrolled to `edge`: grow the window by one page there.
    pub fn on_scroll(&self, edge: Edge) -> RequestOutcome {
        let mut inner = self.inner.lock();
        let Some(state) = inner.state else {
            return RequestOutcome::Failed;
        };
        if inner.phase != CachePhase::Ready || inner.window.is_empty() {
            return RequestOutcome::Failed;
        }

        let extension = inner.window.extension(edge, self.config.page_size, state.queue_size);
        if extension.is_empty() {
            return RequestOutcome::Satisfied;
        }
        inner.window.cover(extension.clone());
        let newest = match edge {
            Edge::Leading => extension.start,
            Edge::Trailing => extension.end - 1,
        };
        inner.window.shrink_behind(edge, self.max_window(), newest);
        let outcome = self.request_locked(&mut inner, extension);
        self.publish_locked(&inner);
        outcome
    }

    pub fn view(&self) -> QueueView {
        self.view_tx.borrow().clone()
    }

    /// Receiver notified on every view change.
    pub fn subscribe(&self) -> watch::Receiver<QueueView> {
        self.view_tx.subscribe()
    }

    pub fn phase(&self) -> CachePhase {
        self.inner.lock().phase
    }

    pub fn current_state(&self) -> Option<CurrentState> {
        self.inner.lock().state
    }

    pub fn track(&self, index: usize) -> Option<TrackDescriptor> {
        self.inner.lock().tracks.get(&index).cloned()
    }

    pub fn artwork(&self, artwork_ref: &str) -> Option<Artwork> {
        self.inner.lock().artwork.get(artwork_ref).cloned().flatten()
    }

    pub fn cached_indices(&self) -> Vec<usize> {
        self.inner.lock().tracks.keys().copied().collect()
    }

    pub fn pending_indices(&self) -> Vec<usize> {
        let mut pending: Vec<usize> = self.inner.lock().pending.keys().copied().collect();
        pending.sort_unstable();
        pending
    }

    pub fn artwork_refs(&self) -> Vec<String> {
        let mut refs: Vec<String> = self.inner.lock().artwork.keys().cloned().collect();
        refs.sort();
        refs
    }

    pub fn displayed_indices(&self) -> Vec<usize> {
        self.inner.lock().window.range().collect()
    }

    fn reset_locked(&self, inner: &mut CacheState, state: &CurrentState) -> Option<Wait> {
        info!(
            "🔄 New queue generation (hash {}, {} tracks), resetting cache",
            state.queue_hash, state.queue_size
        );
        *inner = CacheState {
            generation: Some(*state),
            focus: Some(state.current_index),
            latest_ticket: inner.latest_ticket,
            ..CacheState::default()
        };
        self.merged.notify_waiters();

        if state.is_empty() {
            inner.phase = CachePhase::Ready;
            self.publish_locked(inner);
            return None;
        }

        inner.phase = CachePhase::Initializing;
        let outcome = self.request_locked(inner, initial_page_range(state.current_index, state.queue_size));
        self.publish_locked(inner);
        match outcome {
            RequestOutcome::Sent(markers) => Some(Wait::FirstMerge(markers)),
            RequestOutcome::Satisfied | RequestOutcome::Failed => None,
        }
    }

    fn request_current_locked(&self, inner: &mut CacheState, state: &CurrentState) -> Option<Wait> {
        let index = state.current_index;
        if state.is_empty() || inner.tracks.contains_key(&index) {
            return None;
        }
        match self.request_locked(inner, [index]) {
            RequestOutcome::Sent(markers) => Some(Wait::Track(index, markers)),
            RequestOutcome::Satisfied => Some(Wait::Track(index, Vec::new())),
            RequestOutcome::Failed => None,
        }
    }

    /// Edge pagination around the adopted state.
    fn paginate_locked(&self, inner: &mut CacheState) {
        let Some(state) = inner.state else {
            return;
        };
        if state.is_empty() {
            inner.window.clear();
            return;
        }

        let current = state.current_index;
        let page = self.config.page_size;

        if inner.window.is_empty() {
            let initial = initial_page_range(current, state.queue_size);
            // the first merge of a new generation places the window
            if inner.phase != CachePhase::Initializing {
                inner.window = DisplayWindow::new(initial.clone());
            }
            self.request_locked(inner, initial);
            return;
        }

        if !inner.window.contains(current) {
            let initial = initial_page_range(current, state.queue_size);
            debug!(
                "↪️ Index {} left window {:?}, refocusing on {:?}",
                current,
                inner.window.range(),
                initial
            );
            inner.window = DisplayWindow::new(initial.clone());
            self.request_locked(inner, initial);
            return;
        }

        let shown = inner.window.range();
        self.request_locked(inner, shown);

        for edge in inner.window.near_edges(current) {
            let extension = inner.window.extension(edge, page, state.queue_size);
            if extension.is_empty() {
                continue;
            }
            debug!("📜 Index {} near {:?} edge, extending with {:?}", current, edge, extension);
            inner.window.cover(extension.clone());
            inner.window.shrink_behind(edge, self.max_window(), current);
            self.request_locked(inner, extension);
        }
    }

    /// Longest window kept while paging: one page plus the retention margin
    /// on either side, so trimming can always get back under its bound.
    fn max_window(&self) -> usize {
        self.config.page_size + 2 * self.config.retention_margin
    }

    fn request_locked(&self, inner: &mut CacheState, indices: impl IntoIterator<Item = usize>) -> RequestOutcome {
        let Some(generation) = inner.generation else {
            debug!("No queue generation yet, request skipped");
            return RequestOutcome::Failed;
        };

        let now = Instant::now();
        inner.expire_pending(now, self.config.response_timeout);

        let missing: BTreeSet<usize> = indices
            .into_iter()
            .filter(|index| {
                *index < generation.queue_size
                    && !inner.tracks.contains_key(index)
                    && !inner.pending.contains_key(index)
            })
            .collect();
        if missing.is_empty() {
            return RequestOutcome::Satisfied;
        }

        let priority = if inner.focus.is_some_and(|focus| missing.contains(&focus)) {
            Priority::High
        } else {
            Priority::Normal
        };
        let request = QueueRangeRequest::new(missing, priority);

        match self.dispatcher.request_queue(request.indices()) {
            Ok(()) => {
                for &index in request.indices() {
                    inner.pending.insert(index, now);
                }
                debug!("📤 {:?} request for {:?}", request.priority, request.indices());
                RequestOutcome::Sent(request.indices().to_vec())
            }
            Err(e) => {
                warn!("⚠️ Queue request for {:?} not sent: {}", request.indices(), e);
                RequestOutcome::Failed
            }
        }
    }

    async fn wait_until<F>(&self, deadline: Instant, done: F) -> bool
    where
        F: Fn(&CacheState) -> bool + Send,
    {
        loop {
            let notified = self.merged.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let satisfied = done(&self.inner.lock());
            if satisfied {
                return true;
            }
            if timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }

    fn release_markers(&self, state: &CurrentState, markers: &[usize]) {
        let mut inner = self.inner.lock();
        if !inner.is_generation(state) {
            return;
        }
        for index in markers {
            inner.pending.remove(index);
        }
        warn!(
            "⏱️ No response within {:?}, continuing with cached data",
            self.config.response_timeout
        );
    }

    fn publish_locked(&self, inner: &CacheState) {
        self.view_tx.send_replace(inner.view());
    }
}

/// Decodes every blob, recording `None` for the ones that fail.
fn decode_all(decoder: &dyn ArtworkDecoder, blobs: BTreeMap<String, Bytes>) -> Vec<(String, Option<Artwork>)> {
    blobs
        .into_iter()
        .map(|(artwork_ref, blob)| match decoder.decode(&artwork_ref, &blob) {
            Ok(artwork) => (artwork_ref, Some(artwork)),
            Err(e) => {
                warn!("🖼️ {}", e);
                (artwork_ref, None)
            }
        })
        .collect()
}
