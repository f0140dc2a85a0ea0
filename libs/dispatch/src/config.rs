//! Engine configuration
//!
//! Loaded from TOML. Every field has a default, so an empty document is a
//! valid configuration:
//!
//! ```toml
//! mailbox_capacity = 1
//! dispatch_timeout_ms = 250   # omit for unbounded blocking
//! stop_timeout_ms = 1000      # bound on the STOP broadcast before cancelling
//! cancellation = "subtree"    # or "global"
//! ```

use crate::error::{DispatchError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Mailbox capacity used when neither the config nor the node overrides it
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1;

/// Bound on the STOP broadcast before `Engine::stop` cancels regardless
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 1000;

/// How cancellation tokens are shared between nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationScope {
    /// Every node shares the engine's token
    Global,
    /// Every node holds a child token of its parent's, so cancelling one node
    /// takes down its subtree only
    #[default]
    Subtree,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bounded inbox size for every node without its own override
    pub mailbox_capacity: usize,

    /// Upper bound on a single mailbox send. `None` blocks until the child
    /// accepts or is cancelled.
    pub dispatch_timeout_ms: Option<u64>,

    /// Upper bound on the STOP broadcast in `Engine::stop` before
    /// cancellation is signalled regardless. `None` waits for the roots to
    /// accept STOP however long that takes.
    pub stop_timeout_ms: Option<u64>,

    pub cancellation: CancellationScope,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            dispatch_timeout_ms: None,
            stop_timeout_ms: Some(DEFAULT_STOP_TIMEOUT_MS),
            cancellation: CancellationScope::default(),
        }
    }
}

impl EngineConfig {
    /// Create from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Create from file path
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mailbox_capacity == 0 {
            return Err(DispatchError::invalid_config(
                "Mailbox capacity must be greater than 0",
                Some("mailbox_capacity"),
            ));
        }
        if self.dispatch_timeout_ms == Some(0) {
            return Err(DispatchError::invalid_config(
                "Dispatch timeout must be greater than 0 when set",
                Some("dispatch_timeout_ms"),
            ));
        }
        if self.stop_timeout_ms == Some(0) {
            return Err(DispatchError::invalid_config(
                "Stop timeout must be greater than 0 when set",
                Some("stop_timeout_ms"),
            ));
        }
        Ok(())
    }

    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    /// Sub-millisecond timeouts round up to 1 ms
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout_ms = Some(ceil_millis(timeout));
        self
    }

    /// Sub-millisecond timeouts round up to 1 ms
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout_ms = Some(ceil_millis(timeout));
        self
    }

    /// Let `Engine::stop` wait on the STOP broadcast without a bound
    pub fn without_stop_timeout(mut self) -> Self {
        self.stop_timeout_ms = None;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationScope) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout_ms.map(Duration::from_millis)
    }

    pub fn stop_timeout(&self) -> Option<Duration> {
        self.stop_timeout_ms.map(Duration::from_millis)
    }
}

fn ceil_millis(timeout: Duration) -> u64 {
    let millis = timeout.as_nanos().div_ceil(1_000_000);
    u64::try_from(millis).unwrap_or(u64::MAX)
}
