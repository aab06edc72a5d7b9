use std::ops::Range;

/// Default number of positions fetched around the current index.
pub const INITIAL_PAGE: usize = 7;

/// Positions shown before the current index in a centred page.
const LEAD: usize = 3;

/// Positions requested first for `(current_index, queue_size)`.
///
/// The range always lies inside `[0, queue_size)`, holds at most
/// [`INITIAL_PAGE`] positions and contains `current_index` whenever the
/// queue is non-empty and the index is valid.
pub fn initial_page_range(current_index: usize, queue_size: usize) -> Range<usize> {
    if queue_size == 0 {
        return 0..0;
    }

    if current_index < LEAD {
        0..INITIAL_PAGE.min(queue_size)
    } else if current_index + (INITIAL_PAGE - LEAD) > queue_size {
        queue_size.saturating_sub(INITIAL_PAGE)..queue_size
    } else {
        let start = current_index - LEAD;
        start..(current_index + INITIAL_PAGE - LEAD).min(queue_size)
    }
}

/// Which end of the displayed window the user is approaching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Towards index 0.
    Leading,
    /// Towards the end of the queue.
    Trailing,
}

/// Contiguous run of positions currently presented, `[start, end)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayWindow {
    range: Range<usize>,
}

impl DisplayWindow {
    pub fn new(range: Range<usize>) -> Self {
        if range.start >= range.end {
            return Self::default();
        }
        Self { range }
    }

    pub fn is_empty(&self) -> bool {
        self.range.start >= self.range.end
    }

    pub fn start(&self) -> usize {
        self.range.start
    }

    pub fn end(&self) -> usize {
        self.range.end
    }

    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.range.contains(&index)
    }

    pub fn clear(&mut self) {
        self.range = 0..0;
    }

    /// Grows the window to cover `other` as well, filling anything between.
    pub fn cover(&mut self, other: Range<usize>) {
        if other.start >= other.end {
            return;
        }
        if self.is_empty() {
            self.range = other;
        } else {
            self.range = self.range.start.min(other.start)..self.range.end.max(other.end);
        }
    }

    /// Distance from the window to `index`, zero when inside.
    pub fn distance_to(&self, index: usize) -> usize {
        if self.is_empty() {
            return usize::MAX;
        }
        if index < self.range.start {
            self.range.start - index
        } else if index >= self.range.end {
            index + 1 - self.range.end
        } else {
            0
        }
    }

    /// Edges `index` sits close to, i.e. within one position of.
    pub fn near_edges(&self, index: usize) -> Vec<Edge> {
        let mut edges = Vec::new();
        if self.is_empty() || !self.contains(index) {
            return edges;
        }
        if index <= self.range.start + 1 {
            edges.push(Edge::Leading);
        }
        if index + 2 >= self.range.end {
            edges.push(Edge::Trailing);
        }
        edges
    }

    /// One page past `edge`, clipped to `[0, queue_size)`. Empty when the
    /// window already touches that end of the queue.
    pub fn extension(&self, edge: Edge, page: usize, queue_size: usize) -> Range<usize> {
        if self.is_empty() {
            return 0..0;
        }
        match edge {
            Edge::Leading => self.range.start.saturating_sub(page)..self.range.start,
            Edge::Trailing => {
                let start = self.range.end.min(queue_size);
                start..self.range.end.saturating_add(page).min(queue_size)
            }
        }
    }

    /// After growing at `edge`, pulls the opposite edge inward until at most
    /// `max_len` positions remain. `keep` always stays inside.
    pub fn shrink_behind(&mut self, edge: Edge, max_len: usize, keep: usize) {
        if self.is_empty() || self.len() <= max_len {
            return;
        }
        match edge {
            Edge::Trailing => {
                let start = self.range.end.saturating_sub(max_len).min(keep);
                self.range.start = start.max(self.range.start);
            }
            Edge::Leading => {
                let end = self.range.start.saturating_add(max_len).max(keep.saturating_add(1));
                self.range.end = end.min(self.range.end);
            }
        }
    }
}
