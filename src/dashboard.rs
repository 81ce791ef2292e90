use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::DashboardConfig;
use crate::db::DocumentStore;
use crate::errors::DashboardError;
use crate::models::{Booking, Category, DashboardSnapshot, DashboardStats};
use crate::services::clock::Clock;
use crate::services::network::NetworkMonitor;
use crate::sync::coordinator::{self, Coordinator, Event, Shared, Started};

/// Read side and actions for the presentation layer.
///
/// Reads return the latest published [`DashboardSnapshot`]; snapshots are
/// replaced wholesale, so a reader never observes a half-applied update.
pub struct Dashboard {
    shared: Arc<Shared>,
    snapshots: watch::Receiver<Arc<DashboardSnapshot>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Dashboard {
    pub async fn start(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        config: DashboardConfig,
        network: Option<&NetworkMonitor>,
    ) -> Self {
        let Started {
            shared,
            snapshots,
            task,
        } = Coordinator::start(store, clock, config, network).await;

        Self {
            shared,
            snapshots,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn snapshot(&self) -> Arc<DashboardSnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    pub fn stats(&self) -> DashboardStats {
        self.snapshot().stats.clone()
    }

    pub fn categories(&self) -> Vec<Category> {
        self.snapshot().categories.clone()
    }

    pub fn today_bookings(&self) -> Vec<Booking> {
        self.snapshot().today_bookings.clone()
    }

    pub fn loading(&self) -> bool {
        self.snapshot().loading
    }

    pub fn refreshing(&self) -> bool {
        self.snapshot().refreshing
    }

    /// A receiver that wakes on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<DashboardSnapshot>> {
        self.snapshots.clone()
    }

    /// Waits up to `timeout` for a snapshot satisfying `pred`.
    pub async fn wait_for<F>(&self, timeout: Duration, mut pred: F) -> Option<Arc<DashboardSnapshot>>
    where
        F: FnMut(&DashboardSnapshot) -> bool,
    {
        let mut rx = self.subscribe();
        let changed = rx.wait_for(|snap: &Arc<DashboardSnapshot>| pred(&**snap));
        let found = match tokio::time::timeout(timeout, changed).await {
            Ok(Ok(snapshot)) => Some(Arc::clone(&snapshot)),
            _ => None,
        };
        found
    }

    /// Re-runs every one-shot fetch. Only one refresh runs at a time.
    pub async fn refresh(&self) -> Result<(), DashboardError> {
        coordinator::refresh(&self.shared).await
    }

    pub fn set_category_edit_target(&self, target: Option<Category>) -> Result<(), DashboardError> {
        self.shared.send(Event::SetEditTarget(target))
    }

    /// Ends the session: closes every stream and clears all slots. Later
    /// actions fail with [`DashboardError::ShutDown`].
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.shared.send(Event::Shutdown { ack }).is_ok() {
            let _ = done.await;
        }
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::models::Document;
    use crate::services::clock::FixedClock;
    use chrono::NaiveDate;
    use serde_json::json;

    const WAIT: Duration = Duration::from_secs(2);

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 16).unwrap()
    }

    async fn dashboard(store: &SqliteStore) -> Dashboard {
        Dashboard::start(
            Arc::new(store.clone()),
            Arc::new(FixedClock::new(day())),
            DashboardConfig::default(),
            None,
        )
        .await
    }

    #[tokio::test]
    async fn test_loads_baseline_from_store() {
        let store = SqliteStore::open(":memory:").unwrap();
        store
            .put(
                "bookings",
                &Document::new("b1", json!({"date": "2025-06-16", "time": "10:00", "status": "pending", "price": 40})),
            )
            .unwrap();
        store
            .put("services", &Document::new("s1", json!({"isActive": true, "category": "Hair"})))
            .unwrap();
        store
            .put("categories", &Document::new("c1", json!({"name": "Hair"})))
            .unwrap();

        let dash = dashboard(&store).await;
        let snap = dash
            .wait_for(WAIT, |s| !s.loading && s.categories.first().is_some_and(|c| c.service_count == 1))
            .await
            .expect("dashboard never finished loading");

        assert_eq!(snap.stats.total_bookings, 1);
        assert_eq!(snap.stats.pending_bookings, 1);
        assert_eq!(snap.stats.today_revenue, 40.0);
        assert_eq!(snap.stats.active_services, 1);
        assert_eq!(snap.today_bookings.len(), 1);
        dash.shutdown().await;
    }

    #[tokio::test]
    async fn test_push_updates_stats() {
        let store = SqliteStore::open(":memory:").unwrap();
        let dash = dashboard(&store).await;
        dash.wait_for(WAIT, |s| !s.loading).await.unwrap();

        store
            .put("bookings", &Document::new("b1", json!({"date": "2025-01-01", "status": "completed"})))
            .unwrap();
        let snap = dash
            .wait_for(WAIT, |s| s.stats.total_bookings == 1)
            .await
            .expect("push never applied");
        assert_eq!(snap.stats.pending_bookings, 0);
        dash.shutdown().await;
    }

    #[tokio::test]
    async fn test_edit_target_published() {
        let store = SqliteStore::open(":memory:").unwrap();
        let dash = dashboard(&store).await;

        let target = Category::from_document(&Document::new("c1", json!({"name": "Hair"}))).unwrap();
        dash.set_category_edit_target(Some(target.clone())).unwrap();
        let snap = dash
            .wait_for(WAIT, |s| s.category_edit_target.is_some())
            .await
            .unwrap();
        assert_eq!(snap.category_edit_target, Some(target));

        dash.set_category_edit_target(None).unwrap();
        assert!(dash.wait_for(WAIT, |s| s.category_edit_target.is_none()).await.is_some());
        dash.shutdown().await;
    }

    #[tokio::test]
    async fn test_actions_fail_after_shutdown() {
        let store = SqliteStore::open(":memory:").unwrap();
        let dash = dashboard(&store).await;
        dash.shutdown().await;

        assert!(matches!(dash.refresh().await, Err(DashboardError::ShutDown)));
        assert!(matches!(
            dash.set_category_edit_target(None),
            Err(DashboardError::ShutDown)
        ));
        // second shutdown is a no-op
        dash.shutdown().await;
    }
}
