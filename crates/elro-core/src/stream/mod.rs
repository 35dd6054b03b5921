// ── Reactive device streams ──
//
// Subscription type for consuming device-table changes from the store.

mod filter;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::Device;

pub use filter::DeviceFilter;

type Snapshot = Arc<Vec<Arc<Device>>>;

/// A subscription to the device table.
///
/// Point-in-time snapshot access plus change notification via
/// [`changed()`](Self::changed) or by converting into a `Stream`.
pub struct DeviceStream {
    current: Snapshot,
    receiver: watch::Receiver<Snapshot>,
}

impl DeviceStream {
    pub(crate) fn new(receiver: watch::Receiver<Snapshot>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Snapshot captured at creation (or at the last `changed()`).
    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    /// Wait for the next change. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    pub fn into_stream(self) -> DeviceWatchStream {
        DeviceWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` of device snapshots, one per store mutation.
pub struct DeviceWatchStream {
    inner: WatchStream<Snapshot>,
}

impl Stream for DeviceWatchStream {
    type Item = Snapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use crate::model::DevicePatch;
    use crate::store::DeviceStore;

    #[tokio::test]
    async fn changed_yields_new_snapshot() {
        let store = DeviceStore::new();
        let mut stream = store.subscribe();
        assert!(stream.current().is_empty());

        store.upsert(2, &DevicePatch::default());
        let snap = stream.changed().await.unwrap_or_default();
        assert_eq!(snap.len(), 1);
        assert_eq!(stream.current().len(), 1);
    }

    #[tokio::test]
    async fn into_stream_starts_with_current_snapshot() {
        let store = DeviceStore::new();
        store.upsert(1, &DevicePatch::default());
        let mut stream = store.subscribe().into_stream();
        let first = stream.next().await.unwrap_or_default();
        assert_eq!(first.len(), 1);
    }
}
