//! Simulation configuration
//!
//! Mailbox capacities, the diagnostic watchdog and trace recording.
//! None of these change the protocol itself.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SimError;

/// Configuration for a simulation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Capacity of every node's distance-update mailbox
    pub mailbox_capacity: usize,

    /// Capacity of every node's token mailbox
    pub token_capacity: usize,

    /// Watchdog window; a run with no protocol step for this long is
    /// reported as stalled
    #[serde(with = "humantime_serde")]
    pub stall_timeout: Duration,

    /// Keep the ordered protocol trace in the report
    pub record_trace: bool,

    /// Worker threads for the blocking [`crate::run`] entry point
    pub worker_threads: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
            token_capacity: 5,
            stall_timeout: Duration::from_secs(30),
            record_trace: true,
            worker_threads: num_cpus::get(),
        }
    }
}

impl SimConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the distance mailbox capacity
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Set the token mailbox capacity
    pub fn with_token_capacity(mut self, capacity: usize) -> Self {
        self.token_capacity = capacity;
        self
    }

    /// Set the watchdog window
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Enable or disable trace recording
    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.record_trace = enabled;
        self
    }

    /// Set worker thread count (at least one)
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    /// Reject values tokio channels or the watchdog cannot work with
    pub fn validate(&self) -> Result<(), SimError> {
        if self.mailbox_capacity == 0 {
            return Err(SimError::config_error("mailbox_capacity must be at least 1"));
        }
        if self.token_capacity == 0 {
            return Err(SimError::config_error("token_capacity must be at least 1"));
        }
        if self.stall_timeout.is_zero() {
            return Err(SimError::config_error("stall_timeout must be non-zero"));
        }
        if self.worker_threads == 0 {
            return Err(SimError::config_error("worker_threads must be at least 1"));
        }
        Ok(())
    }
}
