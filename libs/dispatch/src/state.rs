//! Node lifecycle state

use std::fmt;
use tokio::sync::watch;

/// Node state
///
/// `Waiting -> Running -> Killed`. `Killed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Waiting,
    Running,
    Killed,
}

impl NodeState {
    pub fn is_killed(self) -> bool {
        self == NodeState::Killed
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeState::Waiting => "waiting",
            NodeState::Running => "running",
            NodeState::Killed => "killed",
        };
        f.write_str(label)
    }
}

/// Shared holder for a node's state
///
/// Written only by the node's own task; read and awaited by anyone holding a
/// `NodeRef`. Besides the state itself it tracks whether the node has
/// settled: it is `Killed` and finished handling (and forwarding) the message
/// that killed it, or its loop has exited.
#[derive(Debug)]
pub struct StateCell {
    state: watch::Sender<NodeState>,
    settled: watch::Sender<bool>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(NodeState::Waiting),
            settled: watch::Sender::new(false),
        }
    }

    pub fn get(&self) -> NodeState {
        *self.state.borrow()
    }

    /// `Waiting -> Running`. Returns true if the transition happened.
    pub fn start(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == NodeState::Waiting {
                *state = NodeState::Running;
                true
            } else {
                false
            }
        })
    }

    /// Move to `Killed` from any state. Returns true if the node was not
    /// already killed.
    pub fn kill(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_killed() {
                false
            } else {
                *state = NodeState::Killed;
                true
            }
        })
    }

    /// Resolves once the node is `Killed`
    pub async fn killed(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|state| state.is_killed()).await;
    }

    pub fn is_settled(&self) -> bool {
        *self.settled.borrow()
    }

    /// Resolves once the node has settled
    pub async fn settled(&self) {
        let mut rx = self.settled.subscribe();
        let _ = rx.wait_for(|settled| *settled).await;
    }

    /// Mark the node settled. Only meaningful once it is `Killed`.
    pub(crate) fn settle(&self) {
        self.settled.send_if_modified(|settled| !std::mem::replace(settled, true));
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
