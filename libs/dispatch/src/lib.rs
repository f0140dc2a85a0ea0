//! Hierarchical Message-Dispatch Engine
//!
//! A tree of independently scheduled nodes exchanging immutable, timestamped
//! messages, plus a side-channel of named services reachable from any node.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────────────┐
//!   start()/stop()│          Engine          │  root CancellationToken
//!  ──────────────▶│  roots: Children         │  TaskTracker (wait)
//!                 └────────────┬─────────────┘
//!                              │ dispatch (ordered, blocking on full mailbox)
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!        ┌─────────────┐               ┌─────────────┐
//!        │ Node A      │               │ Node B      │
//!        │ [mailbox]   │               │ [mailbox]   │
//!        │ Behavior    │── send_to ──▶ Scope { services }
//!        └──────┬──────┘               └─────────────┘
//!               │ forward
//!               ▼
//!        ┌─────────────┐
//!        │ Node A1     │
//!        └─────────────┘
//! ```
//!
//! - **Mailboxes** are bounded (capacity 1 by default). A full mailbox makes
//!   the sender wait, which throttles producers to their consumers' pace.
//! - **Lifecycle**: `START` moves a node from `Waiting` to `Running`, `STOP`
//!   or cancellation moves it to `Killed`, which is terminal.
//! - **Forwarding**: messages with `forward` set continue to the node's
//!   children unless the behaviour forwarded or suppressed them itself.
//! - **Services**: a `Scope` is an immutable, append-only list of named
//!   handlers; `send_to` runs every handler with a matching name.
//!
//! # Examples
//!
//! ```rust,no_run
//! use node_dispatch::{Engine, EngineConfig, Message, Node, NodeContext, Behavior, Scope, Result};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl Behavior for Printer {
//!     async fn handle(&mut self, ctx: &mut NodeContext, msg: Arc<Message>) -> Result<()> {
//!         println!("[{}] {}", ctx.name(), msg.kind());
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<()> {
//! let root = Node::new("parent", Printer).with_child(Node::new("child", Printer));
//! let engine = Engine::new(EngineConfig::default(), Scope::new(), vec![root])?;
//!
//! engine.start().await;
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod mailbox;
pub mod message;
pub mod metrics;
pub mod node;
pub mod service;
pub mod state;

pub use config::{CancellationScope, EngineConfig, DEFAULT_MAILBOX_CAPACITY};
pub use dispatcher::{Children, DispatchReport};
pub use engine::Engine;
pub use error::{DispatchError, Result};
pub use mailbox::Delivery;
pub use message::{current_timestamp_ns, Message, MessageType, Value};
pub use metrics::{EngineMetrics, EngineStats};
pub use node::{Behavior, ErrorDirective, Node, NodeContext, NodeRef, Passthrough};
pub use service::{FnService, Scope, Service};
pub use state::{NodeState, StateCell};
