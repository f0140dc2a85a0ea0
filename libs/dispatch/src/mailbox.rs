//! Bounded node mailboxes
//!
//! A mailbox is a bounded `tokio::sync::mpsc` channel: many dispatching
//! producers, one consuming node loop. Sending into a full mailbox waits for
//! space. That wait is the engine's backpressure and is never turned into a
//! drop; it only ends when the node takes a message, the node is cancelled,
//! or an optional timeout elapses.

use crate::message::Message;
use crate::metrics::EngineMetrics;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outcome of one mailbox send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Message is in the mailbox
    Delivered,
    /// Receiving node was cancelled before the message got in
    Cancelled,
    /// Receiving node's loop has exited
    Closed,
    /// Configured dispatch timeout elapsed while the mailbox stayed full
    TimedOut,
}

impl Delivery {
    pub fn is_delivered(self) -> bool {
        self == Delivery::Delivered
    }
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Delivery::Delivered => "delivered",
            Delivery::Cancelled => "cancelled",
            Delivery::Closed => "closed",
            Delivery::TimedOut => "timed_out",
        };
        f.write_str(label)
    }
}

/// Sending half of a node's mailbox
#[derive(Debug, Clone)]
pub(crate) struct Mailbox {
    tx: mpsc::Sender<Arc<Message>>,
}

/// Receiving half, owned by the node loop
#[derive(Debug)]
pub(crate) struct MailboxReceiver {
    rx: mpsc::Receiver<Arc<Message>>,
}

impl Mailbox {
    /// Create a mailbox holding at most `capacity` messages. `capacity` must
    /// be non-zero; `EngineConfig::validate` and `Node::validate` reject zero
    /// before any mailbox is built.
    pub fn new(capacity: usize) -> (Self, MailboxReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, MailboxReceiver { rx })
    }

    /// Enqueue `msg`, waiting while the mailbox is full
    ///
    /// The wait is raced against `cancel` (the receiving node's token) so a
    /// send into a node that is shutting down resolves instead of hanging.
    pub async fn deliver(
        &self,
        msg: Arc<Message>,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
        metrics: &EngineMetrics,
    ) -> Delivery {
        if cancel.is_cancelled() {
            metrics.record_delivery_cancelled();
            return Delivery::Cancelled;
        }

        // Fast path first so full-mailbox waits are visible in metrics
        let msg = match self.tx.try_send(msg) {
            Ok(()) => return Delivery::Delivered,
            Err(mpsc::error::TrySendError::Closed(_)) => return Delivery::Closed,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                metrics.record_mailbox_full();
                msg
            }
        };

        let send = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, self.tx.send(msg)).await {
                    Ok(Ok(())) => Delivery::Delivered,
                    Ok(Err(_)) => Delivery::Closed,
                    Err(_) => Delivery::TimedOut,
                },
                None => match self.tx.send(msg).await {
                    Ok(()) => Delivery::Delivered,
                    Err(_) => Delivery::Closed,
                },
            }
        };

        let outcome = tokio::select! {
            biased;

            _ = cancel.cancelled() => Delivery::Cancelled,
            outcome = send => outcome,
        };

        match outcome {
            Delivery::Cancelled => metrics.record_delivery_cancelled(),
            Delivery::TimedOut => metrics.record_delivery_timed_out(),
            Delivery::Delivered | Delivery::Closed => {}
        }
        outcome
    }

    /// Number of messages currently queued
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// True once the receiving loop has exited
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl MailboxReceiver {
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        self.rx.recv().await
    }

    /// Stop accepting messages; queued ones are dropped with the receiver
    pub fn close(&mut self) {
        self.rx.close();
    }
}
