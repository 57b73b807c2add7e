//! Cooperative cancellation for the consumer loop.
//!
//! A [`ShutdownSender`] is held by whoever owns the process lifetime (the CLI
//! signal handler, a test); every clone of the [`ShutdownToken`] observes the
//! request. Sleeps and long polls are raced against the token so the loop
//! stops promptly instead of finishing a full backoff interval.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Shutdown signal for graceful termination
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the shutdown signal.
    ///
    /// Never completes once every sender is dropped without signalling.
    pub async fn wait(&mut self) {
        if self.rx.wait_for(|requested| *requested).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Sleep for `duration` unless shutdown is requested first.
    ///
    /// Returns `true` when the full duration elapsed.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_shutdown() {
            return false;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait() => false,
        }
    }

    /// Run `future` unless shutdown is requested first
    pub async fn run_until_shutdown<F>(&mut self, future: F) -> Option<F::Output>
    where
        F: Future,
    {
        if self.is_shutdown() {
            return None;
        }

        tokio::select! {
            output = future => Some(output),
            _ = self.wait() => None,
        }
    }
}

/// Shutdown sender
#[derive(Debug)]
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Signal shutdown to every token
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }

    /// Create another token observing this sender
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

#[cfg(test)]
#[path = "shutdown_tests.rs"]
mod tests;
