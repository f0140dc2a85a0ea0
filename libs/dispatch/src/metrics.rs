//! Engine-wide counters
//!
//! One `EngineMetrics` is shared by every node task of an engine. All counters
//! are relaxed atomics; read them through `snapshot()`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub nodes_spawned: AtomicU64,
    pub nodes_exited: AtomicU64,
    pub messages_handled: AtomicU64,
    pub total_handling_time_ns: AtomicU64,
    pub messages_discarded: AtomicU64,
    pub messages_forwarded: AtomicU64,
    pub handler_errors: AtomicU64,

    // Delivery outcomes
    pub mailbox_full_events: AtomicU64,
    pub deliveries_cancelled: AtomicU64,
    pub deliveries_timed_out: AtomicU64,
}

impl EngineMetrics {
    pub fn record_message_handled(&self, duration: Duration) {
        self.messages_handled.fetch_add(1, Ordering::Relaxed);
        self.total_handling_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn avg_handling_time_ns(&self) -> f64 {
        let count = self.messages_handled.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total = self.total_handling_time_ns.load(Ordering::Relaxed);
        total as f64 / count as f64
    }

    /// Message arrived at a killed node and was dropped
    pub fn record_discarded(&self) {
        self.messages_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.messages_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Send found the mailbox full and had to wait
    pub fn record_mailbox_full(&self) {
        self.mailbox_full_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_cancelled(&self) {
        self.deliveries_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_timed_out(&self) {
        self.deliveries_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_node_spawned(&self) {
        self.nodes_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_node_exited(&self) {
        self.nodes_exited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineStats {
        EngineStats {
            nodes_spawned: self.nodes_spawned.load(Ordering::Relaxed),
            nodes_exited: self.nodes_exited.load(Ordering::Relaxed),
            messages_handled: self.messages_handled.load(Ordering::Relaxed),
            avg_handling_time_ns: self.avg_handling_time_ns(),
            messages_discarded: self.messages_discarded.load(Ordering::Relaxed),
            messages_forwarded: self.messages_forwarded.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            mailbox_full_events: self.mailbox_full_events.load(Ordering::Relaxed),
            deliveries_cancelled: self.deliveries_cancelled.load(Ordering::Relaxed),
            deliveries_timed_out: self.deliveries_timed_out.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `EngineMetrics`
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStats {
    pub nodes_spawned: u64,
    pub nodes_exited: u64,
    pub messages_handled: u64,
    pub avg_handling_time_ns: f64,
    pub messages_discarded: u64,
    pub messages_forwarded: u64,
    pub handler_errors: u64,
    pub mailbox_full_events: u64,
    pub deliveries_cancelled: u64,
    pub deliveries_timed_out: u64,
}

impl EngineStats {
    /// Nodes whose loop is still running
    pub fn nodes_alive(&self) -> u64 {
        self.nodes_spawned.saturating_sub(self.nodes_exited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avg_handling_time() {
        let metrics = EngineMetrics::default();
        assert_eq!(metrics.avg_handling_time_ns(), 0.0);

        metrics.record_message_handled(Duration::from_nanos(100));
        metrics.record_message_handled(Duration::from_nanos(300));
        assert_eq!(metrics.avg_handling_time_ns(), 200.0);
    }

    #[test]
    fn test_snapshot_counts() {
        let metrics = EngineMetrics::default();
        metrics.record_node_spawned();
        metrics.record_node_spawned();
        metrics.record_node_exited();
        metrics.record_discarded();
        metrics.record_forwarded();
        metrics.record_mailbox_full();
        metrics.record_delivery_cancelled();
        metrics.record_delivery_timed_out();
        metrics.record_handler_error();

        let stats = metrics.snapshot();
        assert_eq!(stats.nodes_spawned, 2);
        assert_eq!(stats.nodes_exited, 1);
        assert_eq!(stats.nodes_alive(), 1);
        assert_eq!(stats.messages_discarded, 1);
        assert_eq!(stats.messages_forwarded, 1);
        assert_eq!(stats.mailbox_full_events, 1);
        assert_eq!(stats.deliveries_cancelled, 1);
        assert_eq!(stats.deliveries_timed_out, 1);
        assert_eq!(stats.handler_errors, 1);
    }
}
