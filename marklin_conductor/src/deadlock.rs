//! Deadlock detection (§4.6 scenario S1): a short ring of recent
//! path-activation failures, used to spot two trains each waiting on a
//! block the other owns and break the tie in favor of the lower train id.

use heapless::Deque;

use marklin_common::consts::{DEADLOCK_RECORD_EXPIRY_TICKS, MAX_DEADLOCK_RECORDS};
use marklin_common::ids::{BlockId, NodeIndex, Tick, TrainId};

/// One train's failed attempt to advance past a block owned by another train.
#[derive(Debug, Clone, Copy)]
pub struct FailureRecord {
    pub train_id: TrainId,
    pub from: NodeIndex,
    pub to: NodeIndex,
    pub blocking_train: TrainId,
    pub blocking_block: BlockId,
    pub timestamp: Tick,
}

/// Resolution for a detected mutual block: `yield_train` should release and
/// retry with `excluded_block` excluded; `proceed_train` keeps its
/// reservation attempt standing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub yield_train: TrainId,
    pub proceed_train: TrainId,
    /// The block, owned by `proceed_train`, that `yield_train` is waiting on
    /// and should route around on its next path request.
    pub excluded_block: BlockId,
}

/// Bounded ring of recent failure records.
pub struct DeadlockTracker {
    records: Deque<FailureRecord, MAX_DEADLOCK_RECORDS>,
}

impl DeadlockTracker {
    pub fn new() -> Self {
        Self { records: Deque::new() }
    }

    /// Record a failure, evicting anything older than
    /// `DEADLOCK_RECORD_EXPIRY_TICKS` and the oldest record if the ring is
    /// full.
    pub fn record_failure(&mut self, now: Tick, record: FailureRecord) {
        self.expire(now);
        if self.records.is_full() {
            self.records.pop_front();
        }
        self.records.push_back(record).ok();
    }

    fn expire(&mut self, now: Tick) {
        while let Some(front) = self.records.front() {
            let age = now.since(front.timestamp).unwrap_or(0);
            if age > DEADLOCK_RECORD_EXPIRY_TICKS {
                self.records.pop_front();
            } else {
                break;
            }
        }
    }

    /// Look for two live records that block each other — train A waiting
    /// on a block owned by train B, and train B waiting on a block owned
    /// by train A. The higher train id yields.
    pub fn detect_mutual_block(&mut self, now: Tick) -> Option<Resolution> {
        self.expire(now);
        let records: heapless::Vec<FailureRecord, MAX_DEADLOCK_RECORDS> = self.records.iter().copied().collect();
        for a in records.iter() {
            for b in records.iter() {
                if a.train_id == b.train_id {
                    continue;
                }
                if a.blocking_train == b.train_id && b.blocking_train == a.train_id {
                    let (yield_train, proceed_train, excluded_block) = if a.train_id.0 < b.train_id.0 {
                        (b.train_id, a.train_id, b.blocking_block)
                    } else {
                        (a.train_id, b.train_id, a.blocking_block)
                    };
                    return Some(Resolution { yield_train, proceed_train, excluded_block });
                }
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for DeadlockTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(train: u8, blocking_train: u8, tick: u64) -> FailureRecord {
        FailureRecord {
            train_id: TrainId(train),
            from: NodeIndex(0),
            to: NodeIndex(1),
            blocking_train: TrainId(blocking_train),
            blocking_block: BlockId(0),
            timestamp: Tick(tick),
        }
    }

    #[test]
    fn mutual_block_resolves_in_favor_of_lower_train_id() {
        let mut tracker = DeadlockTracker::new();
        tracker.record_failure(Tick(10), record(5, 9, 10));
        tracker.record_failure(Tick(11), record(9, 5, 11));
        let resolution = tracker.detect_mutual_block(Tick(12)).unwrap();
        assert_eq!(resolution.proceed_train, TrainId(5));
        assert_eq!(resolution.yield_train, TrainId(9));
    }

    #[test]
    fn unrelated_failures_do_not_trigger_resolution() {
        let mut tracker = DeadlockTracker::new();
        tracker.record_failure(Tick(10), record(5, 9, 10));
        assert!(tracker.detect_mutual_block(Tick(11)).is_none());
    }

    #[test]
    fn expired_records_are_evicted_before_detection() {
        let mut tracker = DeadlockTracker::new();
        tracker.record_failure(Tick(0), record(5, 9, 0));
        tracker.record_failure(Tick(0), record(9, 5, 0));
        let far_future = Tick(DEADLOCK_RECORD_EXPIRY_TICKS + 100);
        assert!(tracker.detect_mutual_block(far_future).is_none());
        assert!(tracker.is_empty());
    }
}
