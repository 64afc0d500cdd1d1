use std::cmp::Ordering;
use std::fmt;
use std::time::Instant;

/// A pending delayed completion.
///
/// The payload and target future are captured inside `fire`, type-erasing
/// them so timers with heterogeneous payloads share one queue.
pub(crate) struct TimerEntry {
    /// When the timer is set to expire.
    pub(crate) deadline: Instant,
    /// Registration id, used for cancellation.
    pub(crate) id: u64,
    /// Completes the target future with `Ok(payload)`.
    pub(crate) fire: Box<dyn FnOnce() + Send>,
}

/*
* Need to manually implement `Ord` since the completion closure is not
* comparable and we are only concerned with ordering by deadline.
*/

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline.cmp(&other.deadline)
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}

impl Eq for TimerEntry {}

impl fmt::Debug for TimerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerEntry")
            .field("deadline", &self.deadline)
            .field("id", &self.id)
            .finish()
    }
}

/// Queue of [`TimerEntry`] values kept sorted ascending by deadline.
///
/// Invariant: `entries[i].deadline <= entries[i + 1].deadline` at all times.
#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    entries: Vec<TimerEntry>,
}

impl TimerQueue {
    /// Creates an empty `TimerQueue`.
    #[inline]
    pub(crate) const fn new() -> Self {
        TimerQueue { entries: vec![] }
    }

    /// Inserts an entry at its sorted position.
    ///
    /// The position is found by binary search over deadlines. Searching for
    /// the upper bound keeps insertion order among equal deadlines, so timers
    /// scheduled for the same instant fire in the order they were scheduled.
    pub(crate) fn insert(&mut self, entry: TimerEntry) {
        let pos = self.entries.partition_point(|queued| queued <= &entry);
        self.entries.insert(pos, entry);
    }

    /// Removes and returns every entry with `deadline <= now`, in ascending
    /// deadline order. The remaining entries stay sorted.
    pub(crate) fn pop_expired(&mut self, now: Instant) -> Vec<TimerEntry> {
        let split = self.entries.partition_point(|queued| queued.deadline <= now);
        self.entries.drain(..split).collect()
    }

    /// Returns the smallest remaining deadline, or `None` if the queue is
    /// empty.
    #[inline]
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.first().map(|entry| entry.deadline)
    }

    /// Removes the entry with the given registration id, if still queued.
    /// Order among the remaining entries is preserved.
    pub(crate) fn remove(&mut self, id: u64) -> Option<TimerEntry> {
        let pos = self.entries.iter().position(|queued| queued.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// Returns `true` if no timers are queued.
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(base: Instant, offset_ms: u64, id: u64) -> TimerEntry {
        TimerEntry {
            deadline: base + Duration::from_millis(offset_ms),
            id,
            fire: Box::new(|| {}),
        }
    }

    fn deadlines_sorted(queue: &TimerQueue) -> bool {
        queue
            .entries
            .windows(2)
            .all(|pair| pair[0].deadline <= pair[1].deadline)
    }

    #[test]
    fn test_insert_keeps_ascending_order() {
        let base = Instant::now();
        let mut queue = TimerQueue::new();

        for (offset, id) in [(50, 1), (10, 2), (30, 3), (10, 4), (70, 5), (0, 6)] {
            queue.insert(entry(base, offset, id));
            assert!(deadlines_sorted(&queue));
        }

        let ids: Vec<u64> = queue.entries.iter().map(|e| e.id).collect();
        // Equal deadlines (ids 2 and 4) keep insertion order.
        assert_eq!(ids, vec![6, 2, 4, 3, 1, 5]);
    }

    #[test]
    fn test_pop_expired_returns_prefix() {
        let base = Instant::now();
        let mut queue = TimerQueue::new();

        for (offset, id) in [(40, 1), (10, 2), (20, 3), (60, 4)] {
            queue.insert(entry(base, offset, id));
        }

        let expired = queue.pop_expired(base + Duration::from_millis(25));
        let ids: Vec<u64> = expired.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 3]);

        assert!(deadlines_sorted(&queue));
        assert_eq!(queue.next_deadline(), Some(base + Duration::from_millis(40)));
    }

    #[test]
    fn test_pop_expired_includes_exact_deadline() {
        let base = Instant::now();
        let mut queue = TimerQueue::new();
        queue.insert(entry(base, 10, 1));

        let expired = queue.pop_expired(base + Duration::from_millis(10));
        assert_eq!(expired.len(), 1);
        assert!(queue.is_empty());
        assert_eq!(queue.next_deadline(), None);
    }

    #[test]
    fn test_remove_by_id_preserves_order() {
        let base = Instant::now();
        let mut queue = TimerQueue::new();

        for (offset, id) in [(10, 1), (20, 2), (30, 3)] {
            queue.insert(entry(base, offset, id));
        }

        assert!(queue.remove(2).is_some());
        assert!(queue.remove(2).is_none());

        let ids: Vec<u64> = queue.entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(deadlines_sorted(&queue));
    }
}
