//! Periodic draining of the registry towards the export receiver.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::registry::{Registry, Snapshot};
use crate::time::UnixTimestamp;

/// Receiver for drained metric snapshots.
///
/// The export collaborator implements this trait. Snapshots are handed over in the fire and
/// forget fashion once per drain cycle; delivery to the monitoring backend is the receiver's
/// concern.
pub trait FlushSink: Send + Sync + 'static {
    /// Accepts the snapshots of one completed drain cycle.
    fn accept(&self, snapshots: Vec<Snapshot>);
}

impl<F> FlushSink for F
where
    F: Fn(Vec<Snapshot>) + Send + Sync + 'static,
{
    fn accept(&self, snapshots: Vec<Snapshot>) {
        self(snapshots)
    }
}

/// Service driving the drain cycle of a [`Registry`].
///
/// Internally, the service runs a continuous flush cycle at the configured interval. On
/// shutdown, a final drain is performed so aggregated state is not lost.
#[derive(Debug)]
pub struct FlushService<S> {
    registry: Arc<Registry>,
    sink: S,
}

impl<S: FlushSink> FlushService<S> {
    /// Creates a new flush service draining `registry` into `sink`.
    pub fn new(registry: Arc<Registry>, sink: S) -> Self {
        Self { registry, sink }
    }

    /// Spawns the flush loop onto the current tokio runtime.
    pub fn spawn(self) -> FlushHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(());
        let interval = Duration::from_secs(self.registry.config().flush_interval);

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);

            loop {
                tokio::select! {
                    biased;

                    _ = ticker.tick() => self.flush(),
                    _ = shutdown_rx.changed() => {
                        self.flush();
                        break;
                    }
                }
            }
        });

        FlushHandle {
            shutdown: shutdown_tx,
            handle,
        }
    }

    fn flush(&self) {
        let snapshots = self.registry.drain(UnixTimestamp::now());
        if snapshots.is_empty() {
            return;
        }

        tracing::trace!("flushing {} metrics to receiver", snapshots.len());
        self.sink.accept(snapshots);
    }
}

/// Handle to a spawned [`FlushService`].
#[derive(Debug)]
pub struct FlushHandle {
    shutdown: watch::Sender<()>,
    handle: JoinHandle<()>,
}

impl FlushHandle {
    /// Stops the flush loop after one final drain and waits for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use similar_asserts::assert_eq;

    use crate::aggregate::SnapshotValue;
    use crate::config::RegistryConfig;
    use crate::datagram::Datagram;

    use super::*;

    #[derive(Clone, Default)]
    struct TestSink {
        flushes: Arc<Mutex<Vec<Vec<Snapshot>>>>,
    }

    impl FlushSink for TestSink {
        fn accept(&self, snapshots: Vec<Snapshot>) {
            self.flushes.lock().unwrap().push(snapshots);
        }
    }

    impl TestSink {
        fn flush_count(&self) -> usize {
            self.flushes.lock().unwrap().len()
        }

        fn last(&self) -> Vec<Snapshot> {
            self.flushes.lock().unwrap().last().cloned().unwrap()
        }
    }

    fn apply_line(registry: &Registry, line: &str) {
        registry.apply(Datagram::parse(line.as_bytes()).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush() {
        let registry = Arc::new(Registry::new(RegistryConfig::default()));
        let sink = TestSink::default();

        apply_line(&registry, "page.views:1|c");
        let handle = FlushService::new(Arc::clone(&registry), sink.clone()).spawn();

        tokio::time::sleep(Duration::from_millis(10_100)).await;
        assert_eq!(sink.flush_count(), 1);
        let snapshots = sink.last();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].name, "page.views");
        assert_eq!(snapshots[0].value, SnapshotValue::Counter(1.0));

        // The counter delta was reset; the next cycle exports zero.
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(sink.flush_count(), 2);
        assert_eq!(sink.last()[0].value, SnapshotValue::Counter(0.0));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_drains_not_delivered() {
        let registry = Arc::new(Registry::new(RegistryConfig::default()));
        let sink = TestSink::default();

        let handle = FlushService::new(Arc::clone(&registry), sink.clone()).spawn();

        tokio::time::sleep(Duration::from_millis(30_500)).await;
        assert_eq!(sink.flush_count(), 0);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_pending_state() {
        let registry = Arc::new(Registry::new(RegistryConfig::default()));
        let sink = TestSink::default();

        let handle = FlushService::new(Arc::clone(&registry), sink.clone()).spawn();

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        apply_line(&registry, "uniques:abc|s");
        handle.shutdown().await;

        assert_eq!(sink.flush_count(), 1);
        assert_eq!(sink.last()[0].value, SnapshotValue::Set(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closure_sink() {
        let registry = Arc::new(Registry::new(RegistryConfig::default()));
        let flushed = Arc::new(Mutex::new(0usize));

        apply_line(&registry, "page.views:1|c");

        let captured = Arc::clone(&flushed);
        let service = FlushService::new(Arc::clone(&registry), move |snapshots: Vec<Snapshot>| {
            *captured.lock().unwrap() += snapshots.len();
        });
        let handle = service.spawn();

        tokio::time::sleep(Duration::from_millis(10_100)).await;
        handle.shutdown().await;

        assert_eq!(*flushed.lock().unwrap(), 1);
    }
}
