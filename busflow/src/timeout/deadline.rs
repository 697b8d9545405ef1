//! Poll deadline shared between the poller and push notifiers.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct DeadlineState {
    next_retrieval: DateTime<Utc>,
    push_pending: bool,
}

/// The next time the poller will query the store.
///
/// Both fields live behind one mutex; there is no other copy of either.
#[derive(Debug)]
pub struct PollDeadline {
    state: Mutex<DeadlineState>,
    max_interval: Duration,
}

impl PollDeadline {
    /// Creates a deadline that is due at `initial`.
    #[must_use]
    pub fn new(initial: DateTime<Utc>, max_interval: Duration) -> Self {
        Self {
            state: Mutex::new(DeadlineState {
                next_retrieval: initial,
                push_pending: false,
            }),
            max_interval,
        }
    }

    /// Returns the scheduled retrieval time.
    #[must_use]
    pub fn next_retrieval(&self) -> DateTime<Utc> {
        self.state.lock().next_retrieval
    }

    /// Returns true if a push arrived since the last chunk.
    #[must_use]
    pub fn push_pending(&self) -> bool {
        self.state.lock().push_pending
    }

    /// Returns true if the deadline has been reached at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_retrieval()
    }

    /// Pulls the deadline forward to `due` if it is earlier.
    ///
    /// Returns true if the deadline moved.
    pub fn on_push(&self, due: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        if due < state.next_retrieval {
            state.next_retrieval = due;
            state.push_pending = true;
            true
        } else {
            false
        }
    }

    /// Schedules the next retrieval after a chunk has been processed.
    ///
    /// A pending push earlier than `next_query_time` wins. The result never
    /// lies more than the maximum interval past `now`.
    pub fn schedule_after_chunk(&self, next_query_time: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut state = self.state.lock();

        let mut next = next_query_time;
        if state.push_pending && state.next_retrieval < next {
            next = state.next_retrieval;
        }
        state.push_pending = false;

        let cap = now
            .checked_add_signed(self.max_interval)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        state.next_retrieval = next.min(cap);
        state.next_retrieval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deadline(now: DateTime<Utc>) -> PollDeadline {
        PollDeadline::new(now, Duration::seconds(60))
    }

    #[test]
    fn test_initially_due() {
        let now = Utc::now();
        assert!(deadline(now).is_due(now));
    }

    #[test]
    fn test_far_future_query_time_is_clamped() {
        let now = Utc::now();
        let d = deadline(now);

        let next = d.schedule_after_chunk(now + Duration::days(365), now);
        assert_eq!(next, now + Duration::seconds(60));
    }

    #[test]
    fn test_near_query_time_is_kept() {
        let now = Utc::now();
        let d = deadline(now);

        let next = d.schedule_after_chunk(now + Duration::seconds(5), now);
        assert_eq!(next, now + Duration::seconds(5));
    }

    #[test]
    fn test_earlier_push_wins_over_query_time() {
        let now = Utc::now();
        let d = deadline(now);
        d.schedule_after_chunk(now + Duration::seconds(50), now);

        assert!(d.on_push(now + Duration::seconds(10)));
        assert!(d.push_pending());

        let next = d.schedule_after_chunk(now + Duration::seconds(30), now);
        assert_eq!(next, now + Duration::seconds(10));
        assert!(!d.push_pending());
    }

    #[test]
    fn test_later_push_is_ignored() {
        let now = Utc::now();
        let d = deadline(now);
        d.schedule_after_chunk(now + Duration::seconds(20), now);

        assert!(!d.on_push(now + Duration::seconds(40)));
        assert!(!d.push_pending());
        assert_eq!(d.next_retrieval(), now + Duration::seconds(20));
    }

    #[test]
    fn test_push_later_than_query_time_does_not_delay() {
        let now = Utc::now();
        let d = deadline(now);
        d.schedule_after_chunk(now + Duration::seconds(50), now);
        d.on_push(now + Duration::seconds(40));

        let next = d.schedule_after_chunk(now + Duration::seconds(30), now);
        assert_eq!(next, now + Duration::seconds(30));
    }

    #[test]
    fn test_cap_saturates_instead_of_overflowing() {
        let now = Utc::now();
        let d = PollDeadline::new(now, Duration::MAX);

        let query_time = now + Duration::days(2);
        assert_eq!(d.schedule_after_chunk(query_time, now), query_time);

        let d = PollDeadline::new(DateTime::<Utc>::MAX_UTC, Duration::seconds(60));
        let next = d.schedule_after_chunk(DateTime::<Utc>::MAX_UTC, DateTime::<Utc>::MAX_UTC);
        assert_eq!(next, DateTime::<Utc>::MAX_UTC);
    }
}
