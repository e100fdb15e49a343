//! Restores submission order between an out-of-order stage and its successor

use super::stage::{Completion, Submit};
use std::collections::BTreeMap;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Buffers completions until the next expected index is available.
///
/// Memory is bounded by the skew actually observed between the fastest and
/// slowest in-flight task, not by the total task count.
#[derive(Debug)]
pub struct OrderingReassembler<R> {
    next: usize,
    pending: BTreeMap<usize, R>,
    max_pending: usize,
}

impl<R> Default for OrderingReassembler<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> OrderingReassembler<R> {
    pub fn new() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
            max_pending: 0,
        }
    }

    /// Accept one completion and return every result that is now releasable,
    /// in strictly increasing index order.
    pub fn accept(&mut self, index: usize, result: R) -> Vec<(usize, R)> {
        if index < self.next || self.pending.contains_key(&index) {
            warn!(index, "Duplicate completion ignored");
            return Vec::new();
        }
        self.pending.insert(index, result);
        self.max_pending = self.max_pending.max(self.pending.len());

        let mut ready = Vec::new();
        while let Some(result) = self.pending.remove(&self.next) {
            ready.push((self.next, result));
            self.next += 1;
        }
        ready
    }

    /// Index the reassembler is waiting for
    pub fn next_expected(&self) -> usize {
        self.next
    }

    /// Completions currently buffered
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// High-water mark of the buffer
    pub fn max_pending(&self) -> usize {
        self.max_pending
    }
}

/// Counters reported when a connector finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub forwarded: usize,
    pub stranded: usize,
    pub max_pending: usize,
}

/// Forward `upstream` completions into `downstream` in index order.
///
/// The connector owns a downstream handle, so the downstream input closes
/// once upstream has drained and every releasable result was forwarded.
pub fn connect<R, D>(
    mut upstream: UnboundedReceiver<Completion<R>>,
    downstream: D,
) -> JoinHandle<ReassemblyStats>
where
    R: Send + 'static,
    D: Submit<R> + 'static,
{
    tokio::spawn(async move {
        let mut reassembler = OrderingReassembler::new();
        let mut forwarded = 0;

        while let Some(Completion { index, result }) = upstream.recv().await {
            for (index, result) in reassembler.accept(index, result) {
                if !downstream.submit(result, index) {
                    warn!(index, "Downstream stage closed, result discarded");
                }
                forwarded += 1;
            }
        }

        let stats = ReassemblyStats {
            forwarded,
            stranded: reassembler.pending(),
            max_pending: reassembler.max_pending(),
        };
        debug!(
            forwarded = stats.forwarded,
            stranded = stats.stranded,
            max_pending = stats.max_pending,
            "Reassembler finished"
        );
        stats
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_releases_in_order() {
        let mut r = OrderingReassembler::new();
        assert!(r.accept(2, "c").is_empty());
        assert!(r.accept(1, "b").is_empty());
        assert_eq!(r.pending(), 2);
        assert_eq!(r.accept(0, "a"), vec![(0, "a"), (1, "b"), (2, "c")]);
        assert_eq!(r.pending(), 0);
        assert_eq!(r.max_pending(), 3);
        assert_eq!(r.next_expected(), 3);
    }

    #[test]
    fn test_buffer_bounded_by_skew() {
        let mut r = OrderingReassembler::new();
        let mut released = Vec::new();
        // Pairs swapped: skew of one
        for pair in (0..100).collect::<Vec<usize>>().chunks(2) {
            released.extend(r.accept(pair[1], pair[1]));
            released.extend(r.accept(pair[0], pair[0]));
        }
        assert_eq!(r.max_pending(), 2);
        let indices: Vec<usize> = released.into_iter().map(|(i, _)| i).collect();
        assert_eq!(indices, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_duplicates_are_ignored() {
        let mut r = OrderingReassembler::new();
        assert_eq!(r.accept(0, 1), vec![(0, 1)]);
        assert!(r.accept(0, 1).is_empty());
        assert!(r.accept(2, 3).is_empty());
        assert!(r.accept(2, 3).is_empty());
        assert_eq!(r.pending(), 1);
    }
}
