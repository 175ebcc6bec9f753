//! Cancellation context
//!
//! Every long-running operation (`encode_to`, `decode_from`, `decode_to`,
//! `serve_track`) takes a [`Context`]. Contexts form a tree: cancelling a
//! context cancels all of its children, never its parent.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{Error, Result};

struct Node {
    cancelled: watch::Sender<bool>,
    children: Mutex<Vec<Weak<Node>>>,
}

impl Node {
    fn new() -> Arc<Self> {
        let (cancelled, _) = watch::channel(false);
        Arc::new(Self {
            cancelled,
            children: Mutex::new(Vec::new()),
        })
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    fn cancel(&self) {
        let fired = self.cancelled.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        });
        if !fired {
            return;
        }

        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

/// Cancellation signal passed down a call tree
///
/// Cloning a context shares the same signal. Use [`Context::child`] to derive
/// a context that can be cancelled independently of its parent.
#[derive(Clone)]
pub struct Context {
    node: Arc<Node>,
}

impl Context {
    /// Create a new root context
    pub fn new() -> Self {
        Self { node: Node::new() }
    }

    /// Derive a child context, cancelled whenever `self` is cancelled
    pub fn child(&self) -> Self {
        let child = Node::new();

        {
            let mut children = self.node.children.lock();
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child));
        }

        // The parent may have been cancelled while we were registering.
        if self.node.is_cancelled() {
            child.cancel();
        }

        Self { node: child }
    }

    /// Derive a child context that cancels itself after `timeout`
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let child = self.child();
        let weak = Arc::downgrade(&child.node);

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(node) = weak.upgrade() {
                node.cancel();
            }
        });

        child
    }

    /// Cancel this context and all contexts derived from it
    pub fn cancel(&self) {
        self.node.cancel();
    }

    /// Check whether the context has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.node.is_cancelled()
    }

    /// Wait until the context is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.node.cancelled.subscribe();
        loop {
            let cancelled = *rx.borrow_and_update();
            if cancelled {
                return;
            }
            // The sender lives as long as `self`, so this never errors here.
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Drive `fut` to completion unless the context is cancelled first
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Error::Cancelled),
            output = fut => Ok(output),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_cancel_propagates_to_children() {
        let root = Context::new();
        let child = root.child();
        let grandchild = child.child();

        root.cancel();

        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
        grandchild.cancelled().await;
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_reach_parent() {
        let root = Context::new();
        let child = root.child();

        child.cancel();

        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_of_cancelled_parent_starts_cancelled() {
        let root = Context::new();
        root.cancel();

        assert!(root.child().is_cancelled());
    }

    #[tokio::test]
    async fn test_run_returns_output() {
        let ctx = Context::new();
        let value = assert_ok!(ctx.run(async { 42 }).await);
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_run_aborts_pending_future() {
        let ctx = Context::new();
        let waiter = ctx.clone();

        let handle = tokio::spawn(async move { waiter.run(std::future::pending::<()>()).await });
        tokio::task::yield_now().await;
        ctx.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(assert_err!(result), Error::Cancelled));
    }

    #[tokio::test]
    async fn test_with_timeout_cancels() {
        let ctx = Context::new().with_timeout(Duration::from_millis(20));

        tokio::time::timeout(Duration::from_secs(1), ctx.cancelled())
            .await
            .unwrap();
        assert!(ctx.is_cancelled());
    }
}
