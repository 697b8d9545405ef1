//! Timeout store contracts and the in-memory store.

use super::{Clock, DueTimeout, TimeoutChunk, TimeoutData};
use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Query side of the timeout store, as used by the poller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TimeoutStore: Send + Sync {
    /// Returns timeouts due since `start_slice`, ordered by due time, and the
    /// next time a query could return more.
    async fn get_next_chunk(&self, start_slice: DateTime<Utc>) -> Result<TimeoutChunk>;
}

/// Write side of the timeout store.
#[async_trait]
pub trait TimeoutPersister: TimeoutStore {
    /// Persists a timeout.
    async fn add(&self, timeout: TimeoutData) -> Result<()>;

    /// Removes and returns a timeout, or `None` if it no longer exists.
    async fn try_remove(&self, timeout_id: &str) -> Result<Option<TimeoutData>>;
}

/// Timeout store kept in process memory.
///
/// Each due timeout is returned by at most one chunk query; it stays stored
/// until removed.
pub struct InMemoryTimeoutStore {
    timeouts: Mutex<Vec<TimeoutData>>,
    handed_out: Mutex<HashSet<String>>,
    clock: Arc<dyn Clock>,
    empty_query_interval: Duration,
}

impl InMemoryTimeoutStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            timeouts: Mutex::new(Vec::new()),
            handed_out: Mutex::new(HashSet::new()),
            clock,
            empty_query_interval: Duration::minutes(1),
        }
    }

    /// Sets how far ahead the next query is scheduled when nothing is pending.
    #[must_use]
    pub fn with_empty_query_interval(mut self, interval: Duration) -> Self {
        self.empty_query_interval = interval;
        self
    }

    /// Returns the number of stored timeouts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timeouts.lock().len()
    }

    /// Returns true if no timeouts are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timeouts.lock().is_empty()
    }
}

impl std::fmt::Debug for InMemoryTimeoutStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTimeoutStore")
            .field("stored", &self.len())
            .field("handed_out", &self.handed_out.lock().len())
            .finish()
    }
}

#[async_trait]
impl TimeoutStore for InMemoryTimeoutStore {
    async fn get_next_chunk(&self, start_slice: DateTime<Utc>) -> Result<TimeoutChunk> {
        let now = self.clock.now();
        let timeouts = self.timeouts.lock();
        let mut handed_out = self.handed_out.lock();

        let mut due: Vec<DueTimeout> = timeouts
            .iter()
            .filter(|t| t.time >= start_slice && t.time <= now && !handed_out.contains(&t.id))
            .map(|t| DueTimeout::new(t.id.clone(), t.time))
            .collect();
        due.sort_by_key(|d| d.due);

        for entry in &due {
            handed_out.insert(entry.id.clone());
        }

        let next_query_time = timeouts
            .iter()
            .filter(|t| t.time > now)
            .map(|t| t.time)
            .min()
            .unwrap_or(now + self.empty_query_interval);

        Ok(TimeoutChunk::new(due, next_query_time))
    }
}

#[async_trait]
impl TimeoutPersister for InMemoryTimeoutStore {
    async fn add(&self, timeout: TimeoutData) -> Result<()> {
        let mut timeouts = self.timeouts.lock();
        timeouts.retain(|t| t.id != timeout.id);
        self.handed_out.lock().remove(&timeout.id);
        timeouts.push(timeout);
        Ok(())
    }

    async fn try_remove(&self, timeout_id: &str) -> Result<Option<TimeoutData>> {
        let mut timeouts = self.timeouts.lock();
        self.handed_out.lock().remove(timeout_id);
        let position = timeouts.iter().position(|t| t.id == timeout_id);
        Ok(position.map(|i| timeouts.remove(i)))
    }
}
