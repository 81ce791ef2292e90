use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::db::DocumentStore;

/// Observable connectivity flag. Created and shut down by whoever composes
/// the application; consumers hold a `watch` receiver.
#[derive(Debug)]
pub struct NetworkMonitor {
    status: Arc<watch::Sender<bool>>,
    probe: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (status, _) = watch::channel(online);
        Self {
            status: Arc::new(status),
            probe: Mutex::new(None),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.status.subscribe()
    }

    pub fn set_online(&self, online: bool) {
        set_status(&self.status, online);
    }

    /// Polls `store.ping()` every `interval`, replacing any running probe.
    pub fn start_probe(&self, store: Arc<dyn DocumentStore>, interval: Duration) {
        let status = Arc::clone(&self.status);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let online = match store.ping().await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::debug!(error = %e, "network probe failed");
                        false
                    }
                };
                set_status(&status, online);
            }
        });

        if let Ok(mut probe) = self.probe.lock() {
            if let Some(previous) = probe.replace(handle) {
                previous.abort();
            }
        }
    }

    pub fn shutdown(&self) {
        if let Ok(mut probe) = self.probe.lock() {
            if let Some(handle) = probe.take() {
                handle.abort();
                tracing::debug!("network monitor stopped");
            }
        }
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn set_status(status: &watch::Sender<bool>, online: bool) {
    let changed = status.send_if_modified(|current| {
        if *current == online {
            false
        } else {
            *current = online;
            true
        }
    });
    if changed {
        tracing::info!(online, "connectivity changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SnapshotReceiver;
    use crate::errors::FetchError;
    use crate::models::{Document, Filter};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlakyStore {
        up: AtomicBool,
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        async fn fetch_all(&self, _: &str, _: &[Filter]) -> Result<Vec<Document>, FetchError> {
            Ok(vec![])
        }

        async fn watch(&self, _: &str, _: &[Filter]) -> Result<SnapshotReceiver, FetchError> {
            Err(FetchError::Unavailable)
        }

        async fn ping(&self) -> Result<(), FetchError> {
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(FetchError::Unavailable)
            }
        }
    }

    #[tokio::test]
    async fn test_set_online_notifies_only_on_change() {
        let monitor = NetworkMonitor::new(true);
        let mut rx = monitor.subscribe();

        monitor.set_online(true);
        assert!(!rx.has_changed().unwrap());

        monitor.set_online(false);
        assert!(rx.has_changed().unwrap());
        assert!(!*rx.borrow_and_update());
        assert!(!monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_tracks_store() {
        let store = Arc::new(FlakyStore {
            up: AtomicBool::new(false),
        });
        let monitor = NetworkMonitor::new(true);
        monitor.start_probe(store.clone(), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!monitor.is_online());

        store.up.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(monitor.is_online());

        monitor.shutdown();
    }
}
