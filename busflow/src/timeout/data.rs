//! Timeout records and store query results.

use crate::context::Headers;
use crate::transport::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A delayed message waiting to be redelivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutData {
    /// Timeout identifier.
    pub id: String,
    /// When the timeout becomes due.
    pub time: DateTime<Utc>,
    /// Where the delayed message should eventually go.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Address>,
    /// Opaque payload of the delayed message.
    #[serde(default)]
    pub state: Vec<u8>,
    /// Headers of the delayed message.
    #[serde(default)]
    pub headers: Headers,
    /// Endpoint that owns this timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owning_endpoint: Option<String>,
}

impl TimeoutData {
    /// Creates a timeout due at `time`.
    #[must_use]
    pub fn new(id: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            time,
            destination: None,
            state: Vec::new(),
            headers: Headers::new(),
            owning_endpoint: None,
        }
    }

    /// Sets the destination.
    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<Address>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_state(mut self, state: Vec<u8>) -> Self {
        self.state = state;
        self
    }

    /// Sets the owning endpoint.
    #[must_use]
    pub fn with_owning_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.owning_endpoint = Some(endpoint.into());
        self
    }
}

/// A due timeout as returned by a chunk query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueTimeout {
    /// Timeout identifier.
    pub id: String,
    /// Due-time marker used to advance the query lower bound.
    pub due: DateTime<Utc>,
}

impl DueTimeout {
    /// Creates a due entry.
    #[must_use]
    pub fn new(id: impl Into<String>, due: DateTime<Utc>) -> Self {
        Self { id: id.into(), due }
    }
}

/// Result of a chunk query against the timeout store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutChunk {
    /// Due timeouts, ordered by due time ascending.
    pub due: Vec<DueTimeout>,
    /// The next time a query could return more.
    pub next_query_time: DateTime<Utc>,
}

impl TimeoutChunk {
    /// Creates a chunk.
    #[must_use]
    pub fn new(due: Vec<DueTimeout>, next_query_time: DateTime<Utc>) -> Self {
        Self {
            due,
            next_query_time,
        }
    }

    /// Creates a chunk with nothing due.
    #[must_use]
    pub fn empty(next_query_time: DateTime<Utc>) -> Self {
        Self::new(Vec::new(), next_query_time)
    }
}
