//! "New data may be available" signalling
//!
//! The stores are passive. After a successful publish, the mailbox writer
//! pokes a [`ChangeNotifier`] so the reader knows to poll. Cross-process
//! transports (platform notification centers, eventfds, pipes) implement the
//! trait outside this crate; [`LocalNotifier`] covers readers in the same
//! process.

use std::sync::Arc;

use tokio::sync::Notify;

/// Signal sink for appended data
pub trait ChangeNotifier: Send + Sync {
    fn notify(&self);
}

/// Notifier that signals nobody
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn notify(&self) {}
}

/// In-process notifier backed by [`tokio::sync::Notify`].
///
/// A signal sent while nobody waits is kept, so a reader that starts
/// waiting after the publish still wakes up once.
#[derive(Debug, Clone, Default)]
pub struct LocalNotifier {
    inner: Arc<Notify>,
}

impl LocalNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the next signal
    pub async fn notified(&self) {
        self.inner.notified().await;
    }
}

impl ChangeNotifier for LocalNotifier {
    fn notify(&self) {
        self.inner.notify_one();
    }
}
