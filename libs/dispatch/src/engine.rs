//! Engine: owner of the root nodes and the START/STOP lifecycle
//!
//! # Shutdown
//!
//! `stop` has two independent paths to every node. It broadcasts a `STOP`
//! message down the tree and waits for it to settle, then cancels the root
//! token. A node wedged behind a full mailbox never sees the `STOP`, but it
//! still sees the cancellation and exits. Both the broadcast and the wait are
//! bounded by `stop_timeout_ms` so a wedged node cannot hold up the
//! cancellation.

use crate::config::EngineConfig;
use crate::dispatcher::Children;
use crate::error::Result;
use crate::message::Message;
use crate::metrics::{EngineMetrics, EngineStats};
use crate::node::{Node, NodeRef, SpawnEnv};
use crate::service::Scope;
use futures::future::{join_all, BoxFuture, FutureExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct Engine {
    engine_id: String,
    config: EngineConfig,
    scope: Scope,
    roots: Children,
    cancel: CancellationToken,
    tracker: TaskTracker,
    metrics: Arc<EngineMetrics>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Engine {
    /// Spawn every node of the given trees
    ///
    /// Must be called from within a tokio runtime. Nodes start in `Waiting`;
    /// nothing is handled until `start` or a direct send.
    pub fn new(config: EngineConfig, scope: Scope, roots: Vec<Node>) -> Result<Self> {
        config.validate()?;
        roots.iter().try_for_each(Node::validate)?;

        let engine_id = format!("engine-{}", Uuid::new_v4().simple());
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let metrics = Arc::new(EngineMetrics::default());

        let env = SpawnEnv {
            scope: scope.clone(),
            mailbox_capacity: config.mailbox_capacity,
            dispatch_timeout: config.dispatch_timeout(),
            cancellation: config.cancellation,
            metrics: Arc::clone(&metrics),
            tracker: tracker.clone(),
        };

        let roots: Children = roots
            .into_iter()
            .map(|root| root.spawn(&cancel, &env))
            .collect();

        info!(
            engine_id = %engine_id,
            roots = roots.len(),
            nodes = metrics.snapshot().nodes_spawned,
            mailbox_capacity = config.mailbox_capacity,
            cancellation = ?config.cancellation,
            "Engine created"
        );

        Ok(Self {
            engine_id,
            config,
            scope,
            roots,
            cancel,
            tracker,
            metrics,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Broadcast `START` to the root nodes
    ///
    /// Returns once the roots have the message; descendants switch to
    /// `Running` as their own loops get to it.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            debug!(engine_id = %self.engine_id, "Engine already started, broadcasting START again");
        }

        let report = self.roots.dispatch(Message::start()).await;
        info!(
            engine_id = %self.engine_id,
            delivered = report.delivered(),
            roots = report.len(),
            "START broadcast"
        );
    }

    /// Broadcast `STOP` to the root nodes, let it run its course, then
    /// cancel every node
    ///
    /// After the broadcast, waits for every node that received `STOP` to
    /// settle, following the message down the tree. The broadcast and that
    /// wait share one `stop_timeout`; when it runs out the remaining nodes are
    /// cancelled mid-flight.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            debug!(engine_id = %self.engine_id, "Engine already stopped");
            return;
        }

        let stop_start = Instant::now();
        let drain = async {
            let report = self.roots.dispatch(Message::stop()).await;
            debug!(
                engine_id = %self.engine_id,
                delivered = report.delivered(),
                "STOP broadcast"
            );
            join_all(self.roots.iter().map(quiesce)).await;
        };

        match self.config.stop_timeout() {
            Some(limit) => {
                if tokio::time::timeout(limit, drain).await.is_err() {
                    warn!(
                        engine_id = %self.engine_id,
                        timeout_ms = limit.as_millis(),
                        unsettled = self.nodes().iter().filter(|n| !n.is_settled()).count(),
                        "STOP did not settle in time, cancelling anyway"
                    );
                }
            }
            None => drain.await,
        }

        self.cancel.cancel();
        info!(
            engine_id = %self.engine_id,
            stop_duration_ms = stop_start.elapsed().as_millis(),
            "Engine stopped"
        );
    }

    /// Wait until every node loop has exited
    ///
    /// Only returns after `stop` (or after every node was cancelled some
    /// other way).
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        debug!(engine_id = %self.engine_id, "All node loops exited");
    }

    /// `stop` followed by `wait`
    pub async fn shutdown(&self) {
        self.stop().await;
        self.wait().await;
    }

    pub fn id(&self) -> &str {
        &self.engine_id
    }

    pub fn roots(&self) -> &Children {
        &self.roots
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn stats(&self) -> EngineStats {
        self.metrics.snapshot()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Every node, depth-first, parents before children
    pub fn nodes(&self) -> Vec<NodeRef> {
        fn collect(children: &Children, out: &mut Vec<NodeRef>) {
            for node in children {
                out.push(node.clone());
                collect(node.children(), out);
            }
        }

        let mut out = Vec::new();
        collect(&self.roots, &mut out);
        out
    }

    /// Look up a node by its `/`-separated name path from the roots,
    /// e.g. `"Random Numbers/Random Logger"`
    pub fn find(&self, path: &str) -> Option<NodeRef> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let mut current = self.roots.find(segments.next()?)?;
        for segment in segments {
            current = current.children().find(segment)?;
        }
        Some(current.clone())
    }
}

/// Wait for `node` to settle if it was sent `STOP`, then do the same for its
/// children. Nodes that never got `STOP` are left to cancellation.
fn quiesce(node: &NodeRef) -> BoxFuture<'_, ()> {
    async move {
        if !node.stop_delivered() {
            return;
        }
        node.settled().await;
        join_all(node.children().iter().map(quiesce)).await;
    }
    .boxed()
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Node tasks must not outlive their engine
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("engine_id", &self.engine_id)
            .field("roots", &self.roots)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CancellationScope;
    use crate::node::Passthrough;
    use crate::state::NodeState;
    use std::time::Duration;

    fn tree() -> Vec<Node> {
        vec![
            Node::new("a", Passthrough)
                .with_child(Node::new("b", Passthrough).with_child(Node::new("c", Passthrough)))
                .with_child(Node::new("d", Passthrough)),
            Node::new("e", Passthrough),
        ]
    }

    #[tokio::test]
    async fn test_engine_creation() {
        let engine = Engine::new(EngineConfig::default(), Scope::new(), tree()).unwrap();
        assert!(engine.id().starts_with("engine-"));
        assert_eq!(engine.roots().len(), 2);
        assert_eq!(engine.stats().nodes_spawned, 5);
        assert!(!engine.is_stopped());
        assert!(engine.nodes().iter().all(|n| n.state() == NodeState::Waiting));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let err = Engine::new(
            EngineConfig::default().with_mailbox_capacity(0),
            Scope::new(),
            tree(),
        )
        .unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_zero_capacity_node_is_an_error_not_a_panic() {
        let roots = vec![Node::new("a", Passthrough)
            .with_child(Node::new("b", Passthrough).with_mailbox_capacity(0))];
        let err = Engine::new(EngineConfig::default(), Scope::new(), roots).unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_nodes_depth_first() {
        let engine = Engine::new(EngineConfig::default(), Scope::new(), tree()).unwrap();
        let names: Vec<String> = engine.nodes().iter().map(|n| n.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_find_by_path() {
        let engine = Engine::new(EngineConfig::default(), Scope::new(), tree()).unwrap();
        assert_eq!(engine.find("a/b/c").map(|n| n.name().to_string()), Some("c".to_string()));
        assert_eq!(engine.find("e").map(|n| n.name().to_string()), Some("e".to_string()));
        assert!(engine.find("a/c").is_none());
        assert!(engine.find("").is_none());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let engine = Engine::new(EngineConfig::default(), Scope::new(), tree()).unwrap();
        engine.start().await;
        engine.stop().await;
        engine.stop().await;
        assert!(engine.is_stopped());
        engine.wait().await;
        assert_eq!(engine.stats().nodes_alive(), 0);
    }

    #[tokio::test]
    async fn test_subtree_cancellation() {
        let config = EngineConfig::default().with_cancellation(CancellationScope::Subtree);
        let engine = Engine::new(config, Scope::new(), tree()).unwrap();

        engine.find("a/b").unwrap().cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(engine.find("a/b").unwrap().is_exited());
        assert!(engine.find("a/b/c").unwrap().is_exited());
        assert!(!engine.find("a").unwrap().is_exited());
        assert!(!engine.find("a/d").unwrap().is_exited());
        assert!(!engine.find("e").unwrap().is_exited());
        assert_eq!(engine.find("a/b/c").unwrap().state(), NodeState::Killed);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_global_cancellation() {
        let config = EngineConfig::default().with_cancellation(CancellationScope::Global);
        let engine = Engine::new(config, Scope::new(), tree()).unwrap();

        engine.find("a/b").unwrap().cancel();
        engine.wait().await;

        assert!(engine.nodes().iter().all(|n| n.is_exited()));
        assert!(engine.nodes().iter().all(|n| n.state() == NodeState::Killed));
    }

    #[tokio::test]
    async fn test_drop_cancels_nodes() {
        let engine = Engine::new(EngineConfig::default(), Scope::new(), tree()).unwrap();
        let leaf = engine.find("a/b/c").unwrap();
        drop(engine);

        tokio::time::timeout(Duration::from_secs(1), async {
            while !leaf.is_exited() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(leaf.state(), NodeState::Killed);
    }
}
