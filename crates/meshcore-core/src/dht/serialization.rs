//! Last stage of the chain: takes whatever nobody else wanted.

use std::sync::atomic::{AtomicU64, Ordering};

use super::{DhtMessage, DhtModule};
use crate::benc::Dict;
use crate::error::RequestError;

/// Catch-all stage; counts and drops every message it sees
#[derive(Debug, Default)]
pub struct SerializationModule {
    dropped: AtomicU64,
}

impl SerializationModule {
    /// Create the stage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages dropped so far
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl DhtModule for SerializationModule {
    fn claims(&self, _message: &DhtMessage) -> bool {
        true
    }

    fn handle(&self, message: &DhtMessage) -> Result<Option<Dict>, RequestError> {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            "dropping unclaimed dht message ({} keys, {} dropped)",
            message.body().len(),
            total
        );
        Ok(None)
    }
}
