//! Ordered fan-out to child nodes
//!
//! `Children::dispatch` hands one shared message to each child in list order
//! and waits for every send to resolve before returning. A child whose
//! mailbox is full holds up every sibling after it, and transitively whoever
//! is dispatching: that is the engine's backpressure.

use crate::mailbox::Delivery;
use crate::message::Message;
use crate::node::NodeRef;
use std::sync::Arc;
use tracing::debug;

/// Ordered list of child nodes
#[derive(Debug, Clone, Default)]
pub struct Children {
    nodes: Vec<NodeRef>,
}

impl Children {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_refs(nodes: Vec<NodeRef>) -> Self {
        Self { nodes }
    }

    /// Append a node; it receives dispatches after every existing child
    pub fn push(&mut self, node: NodeRef) {
        self.nodes.push(node);
    }

    /// Deliver `msg` to every child, in order, one send at a time
    pub async fn dispatch(&self, msg: impl Into<Arc<Message>>) -> DispatchReport {
        let msg = msg.into();
        let mut outcomes = Vec::with_capacity(self.nodes.len());

        for child in &self.nodes {
            let outcome = child.send(Arc::clone(&msg)).await;
            if !outcome.is_delivered() {
                debug!(
                    child = %child.name(),
                    kind = %msg.kind(),
                    outcome = %outcome,
                    "Dispatch did not reach child"
                );
            }
            outcomes.push(outcome);
        }

        DispatchReport { outcomes }
    }

    /// Deliver `msg` to the child at `index` only
    pub async fn dispatch_to(&self, index: usize, msg: impl Into<Arc<Message>>) -> Option<Delivery> {
        let child = self.nodes.get(index)?;
        Some(child.send(msg.into()).await)
    }

    pub fn get(&self, index: usize) -> Option<&NodeRef> {
        self.nodes.get(index)
    }

    /// First child with the given name
    pub fn find(&self, name: &str) -> Option<&NodeRef> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodeRef> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<'a> IntoIterator for &'a Children {
    type Item = &'a NodeRef;
    type IntoIter = std::slice::Iter<'a, NodeRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

impl FromIterator<NodeRef> for Children {
    fn from_iter<I: IntoIterator<Item = NodeRef>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

/// Per-child outcomes of one dispatch, in child order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    outcomes: Vec<Delivery>,
}

impl DispatchReport {
    pub fn outcomes(&self) -> &[Delivery] {
        &self.outcomes
    }

    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_delivered()).count()
    }

    pub fn all_delivered(&self) -> bool {
        self.outcomes.iter().all(|o| o.is_delivered())
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::node::{Behavior, Node, NodeContext};
    use crate::service::Scope;
    use crate::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Records (node, tag) pairs into a shared log
    struct Recorder {
        log: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl Behavior for Recorder {
        async fn handle(&mut self, ctx: &mut NodeContext, msg: Arc<Message>) -> Result<()> {
            self.log
                .lock()
                .push((ctx.name().to_string(), msg.kind().to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_empty_children() {
        let children = Children::new();
        let report = children.dispatch(Message::new("Tick")).await;
        assert!(report.is_empty());
        assert!(report.all_delivered());
        assert_eq!(report.delivered(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_reaches_every_child_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let roots = ["a", "b", "c"]
            .iter()
            .map(|name| Node::new(*name, Recorder { log: Arc::clone(&log) }))
            .collect();
        let engine = Engine::new(EngineConfig::default(), Scope::new(), roots).unwrap();

        let report = engine.roots().dispatch(Message::new("Tick")).await;
        assert_eq!(report.len(), 3);
        assert!(report.all_delivered());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut seen: Vec<String> = log.lock().iter().map(|(n, _)| n.clone()).collect();
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_dispatch_to_single_child() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let roots = vec![
            Node::new("left", Recorder { log: Arc::clone(&log) }),
            Node::new("right", Recorder { log: Arc::clone(&log) }),
        ];
        let engine = Engine::new(EngineConfig::default(), Scope::new(), roots).unwrap();

        let outcome = engine.roots().dispatch_to(1, Message::new("Only")).await;
        assert_eq!(outcome, Some(Delivery::Delivered));
        assert_eq!(engine.roots().dispatch_to(7, Message::new("Nobody")).await, None);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            *log.lock(),
            vec![("right".to_string(), "Only".to_string())]
        );

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_push_and_find() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine = Engine::new(
            EngineConfig::default(),
            Scope::new(),
            vec![
                Node::new("first", Recorder { log: Arc::clone(&log) }),
                Node::new("second", Recorder { log: Arc::clone(&log) }),
            ],
        )
        .unwrap();

        let mut custom = Children::new();
        let second = engine.roots().find("second").cloned().unwrap();
        custom.push(second);
        assert_eq!(custom.len(), 1);
        assert_eq!(custom.get(0).map(|n| n.name()), Some("second"));
        assert!(custom.find("first").is_none());

        let report = custom.dispatch(Message::new("Picked")).await;
        assert_eq!(report.delivered(), 1);

        engine.shutdown().await;
    }
}
