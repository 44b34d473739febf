//! Lazy, depth-bounded discovery walk over a source address space.
//!
//! The address space is a graph and may contain cycles, so the depth bound
//! is what guarantees termination. Nodes are yielded parent first, children
//! in the order the server reports them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uamqtt_core::{NodeIdentity, NodeSnapshot, ProtocolError, SourceSession};

/// Default depth bound of a walk.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Errors ending a discovery walk.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DiscoveryError {
    /// Stop was requested before the walk completed
    #[error("discovery aborted")]
    Aborted,
    /// No source session is connected
    #[error("source session not connected")]
    NotConnected,
    /// Browse or read failed
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Background walk could not be started
    #[error("failed to start discovery thread: {0}")]
    Spawn(String),
}

/// One node produced by a walk.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredNode {
    /// Distance from the start node
    pub depth: usize,
    /// Node this one was reached from; `None` for the start node
    pub parent: Option<NodeIdentity>,
    /// Snapshot taken when the node was visited
    pub snapshot: NodeSnapshot,
}

/// Shared flag for aborting a walk from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort every walk holding this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether `cancel` was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct Pending {
    node: NodeIdentity,
    parent: Option<NodeIdentity>,
    depth: usize,
}

/// Depth-first iterator over discovered nodes.
///
/// The stop condition is checked before every node. Once an error has been
/// yielded the iterator is exhausted.
pub struct Walk {
    session: Arc<dyn SourceSession>,
    stack: Vec<Pending>,
    max_depth: usize,
    stop: Box<dyn Fn() -> bool + Send>,
    deferred: Option<ProtocolError>,
    done: bool,
}

impl Walk {
    /// Walk from `start`, expanding nodes up to `max_depth` levels below it.
    #[must_use]
    pub fn new(session: Arc<dyn SourceSession>, start: NodeIdentity, max_depth: usize) -> Self {
        Self {
            session,
            stack: vec![Pending {
                node: start,
                parent: None,
                depth: 0,
            }],
            max_depth,
            stop: Box::new(|| false),
            deferred: None,
            done: false,
        }
    }

    /// Abort the walk as soon as `stop` returns true.
    #[must_use]
    pub fn with_stop(mut self, stop: impl Fn() -> bool + Send + 'static) -> Self {
        self.stop = Box::new(stop);
        self
    }

    fn fail(&mut self, error: DiscoveryError) -> Option<Result<DiscoveredNode, DiscoveryError>> {
        self.done = true;
        self.stack.clear();
        Some(Err(error))
    }
}

impl Iterator for Walk {
    type Item = Result<DiscoveredNode, DiscoveryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(error) = self.deferred.take() {
            return self.fail(error.into());
        }
        if (self.stop)() {
            tracing::info!("Discovery aborted");
            return self.fail(DiscoveryError::Aborted);
        }

        let Some(pending) = self.stack.pop() else {
            self.done = true;
            return None;
        };

        let snapshot = match self.session.read_node(&pending.node) {
            Ok(snapshot) => snapshot,
            Err(error) => return self.fail(error.into()),
        };

        if pending.depth < self.max_depth {
            match self.session.children(&pending.node) {
                Ok(children) => {
                    self.stack
                        .extend(children.into_iter().rev().map(|child| Pending {
                            node: child.identity,
                            parent: Some(pending.node.clone()),
                            depth: pending.depth + 1,
                        }));
                }
                // Yield the node itself first, fail on the next step.
                Err(error) => self.deferred = Some(error),
            }
        } else {
            tracing::trace!(node = %pending.node, depth = pending.depth, "Depth bound reached");
        }

        Some(Ok(DiscoveredNode {
            depth: pending.depth,
            parent: pending.parent,
            snapshot,
        }))
    }
}

impl std::iter::FusedIterator for Walk {}
