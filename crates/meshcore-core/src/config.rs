//! Process limits for the worker.
//!
//! The node's runtime configuration arrives from the supervisor during the
//! handshake (see [`crate::angel::ingest`]). What lives here are the fixed
//! bounds the worker enforces on itself; tests shrink them.

use std::time::Duration;

use crate::arena::ALLOCATOR_FAILSAFE;

/// Size of the buffer the initial configuration must fit in
pub const INITIAL_CONF_BUFF_SIZE: usize = 8192;

/// Largest payload accepted in a post-handshake frame
pub const MAX_FRAME_PAYLOAD: usize = 64 * 1024;

/// Bounds applied to a worker process
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Root arena ceiling in bytes
    pub arena_ceiling: usize,
    /// Buffer size for the initial configuration
    pub initial_conf_buffer: usize,
    /// How long to wait for the initial configuration
    pub handshake_timeout: Duration,
    /// Largest frame payload on the supervisor pipe
    pub max_frame_payload: usize,
    /// How long an admin auth cookie stays valid
    pub cookie_lifetime: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            arena_ceiling: ALLOCATOR_FAILSAFE,
            initial_conf_buffer: INITIAL_CONF_BUFF_SIZE,
            handshake_timeout: Duration::from_secs(10),
            max_frame_payload: MAX_FRAME_PAYLOAD,
            cookie_lifetime: Duration::from_secs(10),
        }
    }
}

impl CoreConfig {
    /// Builder: set the arena ceiling
    #[must_use]
    pub fn with_arena_ceiling(mut self, bytes: usize) -> Self {
        self.arena_ceiling = bytes;
        self
    }

    /// Builder: set the initial configuration buffer size
    #[must_use]
    pub fn with_initial_conf_buffer(mut self, bytes: usize) -> Self {
        self.initial_conf_buffer = bytes;
        self
    }

    /// Builder: set the handshake timeout
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!(config.arena_ceiling, 1 << 22);
        assert_eq!(config.initial_conf_buffer, 8192);
        assert!(config.initial_conf_buffer < config.arena_ceiling);
    }

    #[test]
    fn test_builders() {
        let config = CoreConfig::default()
            .with_arena_ceiling(1024)
            .with_initial_conf_buffer(64)
            .with_handshake_timeout(Duration::from_millis(5));
        assert_eq!(config.arena_ceiling, 1024);
        assert_eq!(config.initial_conf_buffer, 64);
        assert_eq!(config.handshake_timeout, Duration::from_millis(5));
    }
}
