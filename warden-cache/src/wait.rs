//! Pending waits for patterns that have not appeared yet.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use warden_core::TimerId;

/// Bookkeeping for one unresolved wait.
///
/// Whoever removes the waiter from the cache's table owns resolution: the
/// flush on a match, the timeout on expiry, or `destroy`. The table removal
/// is the single point that guarantees exactly-once delivery.
pub(crate) struct Waiter<N> {
    pub pattern: String,
    pub scope: Option<N>,
    pub sender: oneshot::Sender<Option<N>>,
    /// Armed right after registration, so briefly unset.
    pub timeout: Option<TimerId>,
    /// Set when the wait polls instead of using the shared observer.
    pub poll: Option<TimerId>,
}

impl<N> Waiter<N> {
    pub fn new(pattern: &str, scope: Option<N>, sender: oneshot::Sender<Option<N>>) -> Self {
        Self {
            pattern: pattern.to_string(),
            scope,
            sender,
            timeout: None,
            poll: None,
        }
    }

    pub fn resolve(self, value: Option<N>) {
        // The receiver may already be gone; nothing to report then.
        let _ = self.sender.send(value);
    }
}

enum WaitState<N> {
    Ready(Option<Option<N>>),
    Waiting(oneshot::Receiver<Option<N>>),
}

/// Future returned by `QueryCache::wait_for`.
///
/// Resolves to the node once it appears, or `None` when the timeout elapses
/// or the cache is destroyed. There is no cancel handle: dropping the future
/// stops nobody from resolving it, the value is simply discarded.
pub struct PendingWait<N> {
    state: WaitState<N>,
}

impl<N> Unpin for PendingWait<N> {}

impl<N> PendingWait<N> {
    pub(crate) fn ready(value: Option<N>) -> Self {
        Self {
            state: WaitState::Ready(Some(value)),
        }
    }

    pub(crate) fn waiting(receiver: oneshot::Receiver<Option<N>>) -> Self {
        Self {
            state: WaitState::Waiting(receiver),
        }
    }

    /// Whether the result was available at call time.
    pub fn is_immediate(&self) -> bool {
        matches!(self.state, WaitState::Ready(_))
    }

    /// Non-blocking check. `Some(result)` once resolved; `None` while pending.
    /// The result can be taken only once.
    pub fn try_resolve(&mut self) -> Option<Option<N>> {
        match &mut self.state {
            WaitState::Ready(value) => value.take(),
            WaitState::Waiting(receiver) => match receiver.try_recv() {
                Ok(value) => Some(value),
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => Some(None),
            },
        }
    }
}

impl<N> Future for PendingWait<N> {
    type Output = Option<N>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            WaitState::Ready(value) => Poll::Ready(value.take().flatten()),
            WaitState::Waiting(receiver) => Pin::new(receiver).poll(cx).map(|r| r.unwrap_or(None)),
        }
    }
}

impl<N> std::fmt::Debug for PendingWait<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingWait")
            .field("immediate", &self.is_immediate())
            .finish()
    }
}
