//! Nodes and the per-node scheduling loop
//!
//! A `Node` is an unspawned description: a name, a `Behavior` and child
//! nodes. `Engine::new` spawns one tokio task per node and hands back
//! `NodeRef`s, the cloneable handles used to address running nodes.
//!
//! # Loop
//!
//! Each task selects between its cancellation token and its mailbox, biased
//! toward cancellation. For every message it:
//!
//! 1. discards it if the node is already `Killed`,
//! 2. applies the lifecycle transition (`START` -> `Running`, `STOP` -> `Killed`),
//! 3. runs `Behavior::handle`,
//! 4. forwards the message unchanged to its children when `forward` is set and
//!    the handler neither forwarded it itself nor suppressed forwarding.
//!
//! Cancellation ends the loop at once. Queued messages are dropped, not
//! drained.

use crate::dispatcher::{Children, DispatchReport};
use crate::error::{DispatchError, Result};
use crate::mailbox::{Delivery, Mailbox, MailboxReceiver};
use crate::message::{Message, MessageType};
use crate::metrics::EngineMetrics;
use crate::service::Scope;
use crate::state::{NodeState, StateCell};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

/// What the loop does after a handler error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDirective {
    /// Keep processing messages
    Resume,
    /// Move the node to `Killed`
    Kill,
}

/// Domain logic of a node
///
/// Handlers see every message that reaches a live node, including the `STOP`
/// that kills it. Messages arriving after that are discarded by the loop and
/// never reach `handle`.
#[async_trait]
pub trait Behavior: Send + 'static {
    async fn handle(&mut self, ctx: &mut NodeContext, msg: Arc<Message>) -> Result<()>;

    /// Called after `handle` returns an error
    async fn on_error(&mut self, ctx: &NodeContext, error: DispatchError) -> ErrorDirective {
        warn!(
            node = %ctx.name(),
            error = %error,
            error_category = error.category(),
            "Node handler failed, resuming"
        );
        ErrorDirective::Resume
    }

    /// Called once after the loop exits, for cleanup
    async fn on_exit(&mut self, _ctx: &NodeContext) {}
}

/// Behaviour with no domain logic; the loop's default forwarding still runs
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

#[async_trait]
impl Behavior for Passthrough {
    async fn handle(&mut self, _ctx: &mut NodeContext, _msg: Arc<Message>) -> Result<()> {
        Ok(())
    }
}

/// Unspawned node description
pub struct Node {
    name: String,
    behavior: Box<dyn Behavior>,
    mailbox_capacity: Option<usize>,
    children: Vec<Node>,
}

impl Node {
    pub fn new(name: impl Into<String>, behavior: impl Behavior) -> Self {
        Self {
            name: name.into(),
            behavior: Box::new(behavior),
            mailbox_capacity: None,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }

    /// Override the engine-wide mailbox capacity for this node only
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = Some(capacity);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Check per-node settings across the whole subtree before anything spawns
    pub(crate) fn validate(&self) -> Result<()> {
        if self.mailbox_capacity == Some(0) {
            return Err(DispatchError::invalid_config(
                format!("Node '{}' mailbox capacity must be greater than 0", self.name),
                Some("mailbox_capacity"),
            ));
        }
        self.children.iter().try_for_each(Node::validate)
    }

    /// Spawn this node and its subtree, children first
    pub(crate) fn spawn(self, parent: &CancellationToken, env: &SpawnEnv) -> NodeRef {
        let cancel = match env.cancellation {
            crate::config::CancellationScope::Global => parent.clone(),
            crate::config::CancellationScope::Subtree => parent.child_token(),
        };

        let children: Children = self
            .children
            .into_iter()
            .map(|child| child.spawn(&cancel, env))
            .collect();

        let capacity = self.mailbox_capacity.unwrap_or(env.mailbox_capacity);
        let (mailbox, receiver) = Mailbox::new(capacity);
        let state = Arc::new(StateCell::new());
        let name: Arc<str> = Arc::from(self.name.as_str());

        let node_ref = NodeRef {
            inner: Arc::new(NodeShared {
                name: Arc::clone(&name),
                mailbox,
                state: Arc::clone(&state),
                cancel: cancel.clone(),
                children: children.clone(),
                stop_delivered: AtomicBool::new(false),
                dispatch_timeout: env.dispatch_timeout,
                metrics: Arc::clone(&env.metrics),
            }),
        };

        let task = NodeTask {
            behavior: self.behavior,
            receiver,
            ctx: NodeContext {
                scope: env.scope.with_name(&*name),
                name,
                children,
                state,
                cancel,
                metrics: Arc::clone(&env.metrics),
                forwarded: false,
                suppress_forward: false,
            },
            metrics: Arc::clone(&env.metrics),
        };

        env.metrics.record_node_spawned();
        env.tracker.spawn(task.run());
        node_ref
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("children", &self.children)
            .finish()
    }
}

/// Everything a spawning node needs from its engine
pub(crate) struct SpawnEnv {
    pub scope: Scope,
    pub mailbox_capacity: usize,
    pub dispatch_timeout: Option<Duration>,
    pub cancellation: crate::config::CancellationScope,
    pub metrics: Arc<EngineMetrics>,
    pub tracker: TaskTracker,
}

/// Handle to a running node
#[derive(Clone)]
pub struct NodeRef {
    inner: Arc<NodeShared>,
}

struct NodeShared {
    name: Arc<str>,
    mailbox: Mailbox,
    state: Arc<StateCell>,
    cancel: CancellationToken,
    children: Children,
    stop_delivered: AtomicBool,
    dispatch_timeout: Option<Duration>,
    metrics: Arc<EngineMetrics>,
}

impl NodeRef {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> NodeState {
        self.inner.state.get()
    }

    /// Enqueue `msg` into this node's mailbox
    ///
    /// Waits while the mailbox is full. Resolves early if the node is
    /// cancelled or the engine's dispatch timeout elapses.
    pub async fn send(&self, msg: impl Into<Arc<Message>>) -> Delivery {
        let inner = &self.inner;
        let msg = msg.into();
        let is_stop = msg.is_stop();
        let outcome = inner
            .mailbox
            .deliver(msg, &inner.cancel, inner.dispatch_timeout, &inner.metrics)
            .await;
        if is_stop && outcome.is_delivered() {
            inner.stop_delivered.store(true, Ordering::Release);
        }
        outcome
    }

    /// Resolves once the node is `Killed`
    pub async fn killed(&self) {
        self.inner.state.killed().await
    }

    /// Resolves once the node is `Killed` and done with the message that
    /// killed it, or its loop has exited
    pub async fn settled(&self) {
        self.inner.state.settled().await
    }

    pub fn is_settled(&self) -> bool {
        self.inner.state.is_settled()
    }

    /// True once a `STOP` made it into this node's mailbox
    pub fn stop_delivered(&self) -> bool {
        self.inner.stop_delivered.load(Ordering::Acquire)
    }

    pub fn children(&self) -> &Children {
        &self.inner.children
    }

    /// Messages waiting in the mailbox
    pub fn mailbox_depth(&self) -> usize {
        self.inner.mailbox.depth()
    }

    pub fn mailbox_capacity(&self) -> usize {
        self.inner.mailbox.capacity()
    }

    /// Cancel this node. Under `CancellationScope::Subtree` this reaches the
    /// node and its descendants; under `Global` the token is shared and the
    /// whole engine goes down.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// True once the node's loop has exited
    pub fn is_exited(&self) -> bool {
        self.inner.mailbox.is_closed()
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("children", &self.inner.children.len())
            .finish()
    }
}

/// A node's view of itself while handling a message
pub struct NodeContext {
    name: Arc<str>,
    scope: Scope,
    children: Children,
    state: Arc<StateCell>,
    cancel: CancellationToken,
    metrics: Arc<EngineMetrics>,
    forwarded: bool,
    suppress_forward: bool,
}

impl NodeContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scope labelled with this node's name
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn children(&self) -> &Children {
        &self.children
    }

    /// Mutable child list, e.g. to attach a node spawned elsewhere
    pub fn children_mut(&mut self) -> &mut Children {
        &mut self.children
    }

    pub fn state(&self) -> NodeState {
        self.state.get()
    }

    pub fn is_killed(&self) -> bool {
        self.state().is_killed()
    }

    /// Send any message to all children
    pub async fn dispatch(&self, msg: impl Into<Arc<Message>>) -> DispatchReport {
        self.children.dispatch(msg).await
    }

    /// Forward the message being handled to all children and tell the loop
    /// not to forward it again
    pub async fn forward(&mut self, msg: &Arc<Message>) -> DispatchReport {
        self.forwarded = true;
        self.metrics.record_forwarded();
        self.children.dispatch(Arc::clone(msg)).await
    }

    /// Stop the loop from forwarding the message being handled
    pub fn suppress_forward(&mut self) {
        self.suppress_forward = true;
    }

    pub fn send_to(&self, service: &str, msg: &Message) -> usize {
        self.scope.send_to(service, msg)
    }

    /// Move this node to `Killed`. Later messages are discarded.
    pub fn kill(&self) -> bool {
        let killed = self.state.kill();
        if killed {
            info!(node = %self.name, "Node killed itself");
        }
        killed
    }

    /// Resolves when this node is cancelled
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token for work the handler hands off to other tasks
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn begin_message(&mut self) {
        self.forwarded = false;
        self.suppress_forward = false;
    }

    fn should_forward(&self, msg: &Message) -> bool {
        msg.forward() && !self.forwarded && !self.suppress_forward
    }
}

/// Task owning one node's behaviour and mailbox receiver
struct NodeTask {
    behavior: Box<dyn Behavior>,
    receiver: MailboxReceiver,
    ctx: NodeContext,
    metrics: Arc<EngineMetrics>,
}

impl NodeTask {
    async fn run(mut self) {
        let started = Instant::now();
        debug!(node = %self.ctx.name, children = self.ctx.children.len(), "Node loop started");

        loop {
            let msg = tokio::select! {
                biased;

                _ = self.ctx.cancel.cancelled() => break,
                msg = self.receiver.recv() => match msg {
                    Some(msg) => msg,
                    // Every sender is gone, nothing can reach this node again
                    None => break,
                },
            };

            if !self.process(msg).await {
                break;
            }
            if self.ctx.state.get().is_killed() {
                self.ctx.state.settle();
            }
        }

        if self.ctx.state.kill() {
            debug!(node = %self.ctx.name, "Node killed on loop exit");
        }
        self.receiver.close();
        self.ctx.state.settle();
        self.behavior.on_exit(&self.ctx).await;
        self.metrics.record_node_exited();

        info!(
            node = %self.ctx.name,
            runtime_ms = started.elapsed().as_millis(),
            "Node loop exited"
        );
    }

    /// Handle one message. Returns false if the node was cancelled meanwhile.
    async fn process(&mut self, msg: Arc<Message>) -> bool {
        if self.ctx.state.get().is_killed() {
            self.metrics.record_discarded();
            trace!(node = %self.ctx.name, kind = %msg.kind(), "Discarding message for killed node");
            return true;
        }

        match msg.kind() {
            MessageType::Start => {
                if self.ctx.state.start() {
                    info!(node = %self.ctx.name, "Node running");
                }
            }
            MessageType::Stop => {
                if self.ctx.state.kill() {
                    info!(node = %self.ctx.name, "Node stopped");
                }
            }
            MessageType::Custom(_) => {}
        }

        self.ctx.begin_message();
        let cancel = self.ctx.cancel.clone();
        let handle_start = Instant::now();

        let result = tokio::select! {
            biased;

            _ = cancel.cancelled() => return false,
            result = self.behavior.handle(&mut self.ctx, Arc::clone(&msg)) => result,
        };

        match result {
            Ok(()) => self.metrics.record_message_handled(handle_start.elapsed()),
            Err(e) => {
                self.metrics.record_handler_error();
                let category = e.category();
                if self.behavior.on_error(&self.ctx, e).await == ErrorDirective::Kill
                    && self.ctx.state.kill()
                {
                    error!(
                        node = %self.ctx.name,
                        kind = %msg.kind(),
                        error_category = category,
                        "Node killed after handler error"
                    );
                }
            }
        }

        // The message that killed the node may still travel on; later ones may not
        if self.ctx.should_forward(&msg) && !self.ctx.children.is_empty() {
            self.metrics.record_forwarded();
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return false,
                _ = self.ctx.children.dispatch(Arc::clone(&msg)) => {}
            }
        }

        true
    }
}
