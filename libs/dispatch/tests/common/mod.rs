//! Behaviours and helpers shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use node_dispatch::{Behavior, DispatchError, Message, NodeContext, NodeState, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// One handled message as seen from inside the handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub node: String,
    pub kind: String,
    pub state: NodeState,
}

/// Shared log of handled messages across all nodes of a test
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<Entry>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, ctx: &NodeContext, msg: &Message) {
        self.entries.lock().push(Entry {
            node: ctx.name().to_string(),
            kind: msg.kind().to_string(),
            state: ctx.state(),
        });
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.entries.lock().clone()
    }

    /// Message kinds handled by `node`, in handling order
    pub fn kinds_for(&self, node: &str) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.node == node)
            .map(|e| e.kind.clone())
            .collect()
    }

    pub fn count_for(&self, node: &str, kind: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.node == node && e.kind == kind)
            .count()
    }
}

/// Records every message and lets the loop forward as usual
pub struct Recorder {
    pub journal: Journal,
}

impl Recorder {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
        }
    }
}

#[async_trait]
impl Behavior for Recorder {
    async fn handle(&mut self, ctx: &mut NodeContext, msg: Arc<Message>) -> Result<()> {
        self.journal.record(ctx, &msg);
        Ok(())
    }
}

/// Records every message and blocks on `Hold` until the gate gets a permit
pub struct Gated {
    pub journal: Journal,
    pub gate: Arc<Semaphore>,
}

impl Gated {
    pub fn new(journal: &Journal) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (
            Self {
                journal: journal.clone(),
                gate: Arc::clone(&gate),
            },
            gate,
        )
    }
}

#[async_trait]
impl Behavior for Gated {
    async fn handle(&mut self, ctx: &mut NodeContext, msg: Arc<Message>) -> Result<()> {
        self.journal.record(ctx, &msg);
        if msg.kind().as_str() == "Hold" {
            self.gate
                .acquire()
                .await
                .map_err(DispatchError::handler)?
                .forget();
        }
        Ok(())
    }
}

/// Poll `cond` until it holds, failing the test after two seconds
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Give spawned node loops a chance to run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
