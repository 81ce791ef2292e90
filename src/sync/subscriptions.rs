use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;
use uuid::Uuid;

use super::{SourceKey, SourceQuery};
use crate::db::{DocumentStore, SnapshotReceiver};
use crate::errors::DashboardError;
use crate::models::Document;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Full current record set for the stream.
    Snapshot(Vec<Document>),
    /// No snapshot arrived within the liveness window.
    Stalled { silent_for: Duration },
    /// The store closed the stream; no further updates will arrive.
    Closed,
}

/// One stream event stamped with the subscription that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub subscription: Uuid,
    pub source: SourceKey,
    pub event: StreamEvent,
}

pub type UpdateHandler = Arc<dyn Fn(Delivery) + Send + Sync>;

/// Handle to one live stream. Cloning shares the same stream.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: Uuid,
    source: SourceKey,
    active: Arc<AtomicBool>,
    abort: AbortHandle,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source(&self) -> SourceKey {
        self.source
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stops delivery. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.abort.abort();
            tracing::debug!(source = %self.source, id = %self.id, "unsubscribed");
        }
    }
}

/// Owns at most one live subscription per source.
pub struct SubscriptionManager {
    store: Arc<dyn DocumentStore>,
    liveness: Option<Duration>,
    live: HashMap<SourceKey, Subscription>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn DocumentStore>, liveness: Option<Duration>) -> Self {
        Self {
            store,
            liveness,
            live: HashMap::new(),
        }
    }

    pub async fn subscribe(
        &mut self,
        source: SourceKey,
        query: SourceQuery,
        on_update: UpdateHandler,
    ) -> Result<Subscription, DashboardError> {
        if self.live.get(&source).is_some_and(Subscription::is_active) {
            return Err(DashboardError::AlreadySubscribed(source));
        }

        let rx = self
            .store
            .watch(query.collection, &query.filters)
            .await
            .map_err(|error| DashboardError::Subscribe { key: source, error })?;

        let id = Uuid::new_v4();
        let active = Arc::new(AtomicBool::new(true));
        let deliver = move |event: StreamEvent| {
            on_update(Delivery {
                subscription: id,
                source,
                event,
            })
        };
        let task = tokio::spawn(forward(rx, deliver, Arc::clone(&active), self.liveness));

        let subscription = Subscription {
            id,
            source,
            active,
            abort: task.abort_handle(),
        };
        tracing::debug!(%source, id = %subscription.id, collection = query.collection, "subscribed");

        self.live.insert(source, subscription.clone());
        Ok(subscription)
    }

    pub fn unsubscribe(&mut self, source: SourceKey) -> bool {
        match self.live.remove(&source) {
            Some(subscription) => {
                subscription.unsubscribe();
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe_all(&mut self) {
        for (_, subscription) in self.live.drain() {
            subscription.unsubscribe();
        }
    }

    /// Whether `id` is still the live subscription registered for `source`.
    pub fn is_current(&self, source: SourceKey, id: Uuid) -> bool {
        self.live
            .get(&source)
            .is_some_and(|s| s.id == id && s.is_active())
    }

    /// Whether `id` is registered for `source`, even if its stream has
    /// already ended.
    pub fn is_registered(&self, source: SourceKey, id: Uuid) -> bool {
        self.live.get(&source).is_some_and(|s| s.id == id)
    }

    pub fn live_sources(&self) -> Vec<SourceKey> {
        let mut sources: Vec<SourceKey> = self
            .live
            .values()
            .filter(|s| s.is_active())
            .map(Subscription::source)
            .collect();
        sources.sort();
        sources
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

async fn forward<F>(
    mut rx: SnapshotReceiver,
    on_update: F,
    active: Arc<AtomicBool>,
    liveness: Option<Duration>,
) where
    F: Fn(StreamEvent) + Send + 'static,
{
    let mut stalled = false;
    loop {
        let next = match liveness {
            Some(limit) => match tokio::time::timeout(limit, rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    if !stalled && active.load(Ordering::SeqCst) {
                        stalled = true;
                        on_update(StreamEvent::Stalled { silent_for: limit });
                    }
                    continue;
                }
            },
            None => rx.recv().await,
        };

        // Late deliveries after unsubscribe are dropped here.
        if !active.load(Ordering::SeqCst) {
            break;
        }

        match next {
            Some(docs) => {
                stalled = false;
                on_update(StreamEvent::Snapshot(docs));
            }
            None => {
                on_update(StreamEvent::Closed);
                active.store(false, Ordering::SeqCst);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FetchError;
    use crate::models::Filter;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Store whose live queries are fed by the test.
    struct ChannelStore {
        senders: Mutex<Vec<mpsc::Sender<Vec<Document>>>>,
        fail_watch: bool,
    }

    impl ChannelStore {
        fn new() -> Self {
            Self {
                senders: Mutex::new(vec![]),
                fail_watch: false,
            }
        }

        fn sender(&self, idx: usize) -> mpsc::Sender<Vec<Document>> {
            self.senders.lock().unwrap()[idx].clone()
        }
    }

    #[async_trait]
    impl DocumentStore for ChannelStore {
        async fn fetch_all(&self, _: &str, _: &[Filter]) -> Result<Vec<Document>, FetchError> {
            Ok(vec![])
        }

        async fn watch(&self, _: &str, _: &[Filter]) -> Result<SnapshotReceiver, FetchError> {
            if self.fail_watch {
                return Err(FetchError::Unavailable);
            }
            let (tx, rx) = mpsc::channel(8);
            self.senders.lock().unwrap().push(tx);
            Ok(rx)
        }
    }

    fn recorder() -> (UpdateHandler, Arc<Mutex<Vec<StreamEvent>>>) {
        let seen = Arc::new(Mutex::new(vec![]));
        let sink = Arc::clone(&seen);
        let handler: UpdateHandler =
            Arc::new(move |delivery: Delivery| sink.lock().unwrap().push(delivery.event));
        (handler, seen)
    }

    fn query() -> SourceQuery {
        SourceKey::AllBookings.query(NaiveDate::from_ymd_opt(2025, 6, 16).unwrap())
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_delivers_full_snapshots_in_order() {
        let store = Arc::new(ChannelStore::new());
        let mut manager = SubscriptionManager::new(store.clone(), None);
        let (handler, seen) = recorder();

        manager
            .subscribe(SourceKey::AllBookings, query(), handler)
            .await
            .unwrap();

        let tx = store.sender(0);
        tx.send(vec![Document::new("b1", json!({}))]).await.unwrap();
        tx.send(vec![]).await.unwrap();
        settle().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], StreamEvent::Snapshot(vec![Document::new("b1", json!({}))]));
        assert_eq!(seen[1], StreamEvent::Snapshot(vec![]));
    }

    #[tokio::test]
    async fn test_one_live_subscription_per_source() {
        let store = Arc::new(ChannelStore::new());
        let mut manager = SubscriptionManager::new(store, None);
        let (handler, _) = recorder();

        manager
            .subscribe(SourceKey::AllBookings, query(), handler.clone())
            .await
            .unwrap();
        let err = manager
            .subscribe(SourceKey::AllBookings, query(), handler.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, DashboardError::AlreadySubscribed(SourceKey::AllBookings)));

        assert!(manager.unsubscribe(SourceKey::AllBookings));
        assert!(manager
            .subscribe(SourceKey::AllBookings, query(), handler)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_late_push_after_unsubscribe_is_dropped() {
        let store = Arc::new(ChannelStore::new());
        let mut manager = SubscriptionManager::new(store.clone(), None);
        let (handler, seen) = recorder();

        let sub = manager
            .subscribe(SourceKey::Categories, query(), handler)
            .await
            .unwrap();
        let tx = store.sender(0);
        tx.send(vec![]).await.unwrap();
        settle().await;

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert!(!manager.is_current(SourceKey::Categories, sub.id()));

        let _ = tx.send(vec![Document::new("late", json!({}))]).await;
        settle().await;

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_stream_reported_once() {
        let store = Arc::new(ChannelStore::new());
        let mut manager = SubscriptionManager::new(store.clone(), None);
        let (handler, seen) = recorder();

        let sub = manager
            .subscribe(SourceKey::AllBookings, query(), handler)
            .await
            .unwrap();
        store.senders.lock().unwrap().clear();
        settle().await;

        assert_eq!(seen.lock().unwrap().as_slice(), &[StreamEvent::Closed]);
        assert!(!sub.is_active());
        assert!(!manager.is_current(SourceKey::AllBookings, sub.id()));
        assert!(manager.is_registered(SourceKey::AllBookings, sub.id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_reported_once_until_next_snapshot() {
        let store = Arc::new(ChannelStore::new());
        let mut manager = SubscriptionManager::new(store.clone(), Some(Duration::from_secs(5)));
        let (handler, seen) = recorder();

        manager
            .subscribe(SourceKey::TodayBookings, query(), handler)
            .await
            .unwrap();
        let tx = store.sender(0);

        tokio::time::sleep(Duration::from_secs(12)).await;
        tx.send(vec![]).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &[
                StreamEvent::Stalled { silent_for: Duration::from_secs(5) },
                StreamEvent::Snapshot(vec![]),
                StreamEvent::Stalled { silent_for: Duration::from_secs(5) },
            ]
        );
    }

    #[tokio::test]
    async fn test_watch_failure_surfaces() {
        let store = Arc::new(ChannelStore {
            senders: Mutex::new(vec![]),
            fail_watch: true,
        });
        let mut manager = SubscriptionManager::new(store, None);
        let (handler, _) = recorder();

        let err = manager
            .subscribe(SourceKey::AllBookings, query(), handler)
            .await
            .unwrap_err();
        assert!(matches!(err, DashboardError::Subscribe { .. }));
        assert!(manager.live_sources().is_empty());
    }
}
