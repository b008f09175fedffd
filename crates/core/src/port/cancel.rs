// Cooperative cancellation signal

use tokio::sync::watch;

/// Cancellation signal handed to a unit of work (and to background loops).
///
/// Cloning is cheap; every clone observes the same signal.
#[derive(Clone, Debug)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that is never cancelled
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until cancellation is requested.
    ///
    /// If the handle is dropped without cancelling, this never resolves.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sending half of a cancellation signal
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation to every token. Calling it again is a no-op.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Create a cancellation channel
pub fn cancel_channel() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[test]
    fn test_cancel_wakes_waiter() {
        let (handle, mut token) = cancel_channel();
        assert!(!token.is_cancelled());

        let mut waiter = task::spawn(token.cancelled());
        assert_pending!(waiter.poll());

        handle.cancel();
        handle.cancel();
        assert!(waiter.is_woken());
        assert_ready!(waiter.poll());
    }

    #[test]
    fn test_never_token_stays_pending() {
        let mut token = CancelToken::never();
        {
            let mut waiter = task::spawn(token.cancelled());
            assert_pending!(waiter.poll());
        }
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_clones_observe_same_signal() {
        let (handle, token) = cancel_channel();
        let clone = token.clone();
        handle.cancel();
        assert!(token.is_cancelled());
        assert!(clone.is_cancelled());
        assert!(handle.is_cancelled());
    }
}
