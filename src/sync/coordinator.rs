//! The coordinator task owns every slot. Stream pushes, fetch results and
//! user actions reach it as [`Event`]s on one channel and are applied in
//! arrival order; after each accepted change the whole view is recomputed
//! and published.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::aggregate::{aggregate, today_schedule};
use super::enrichment::enrich_categories;
use super::slot::Slots;
use super::subscriptions::{Delivery, StreamEvent, SubscriptionManager, UpdateHandler};
use super::SourceKey;
use crate::config::DashboardConfig;
use crate::db::DocumentStore;
use crate::errors::{DashboardError, FetchError};
use crate::models::{Booking, Category, DashboardSnapshot, Document, Service};
use crate::services::clock::Clock;
use crate::services::network::NetworkMonitor;

/// Typed result of a one-shot fetch.
#[derive(Debug, Clone)]
pub enum Payload {
    Bookings(Vec<Booking>),
    Services(Vec<Service>),
    Categories(Vec<Category>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOrigin {
    /// Startup baseline; a failure substitutes an empty result.
    Initial,
    /// Manual or reconnect refresh; a failure leaves the slot as it was.
    Refresh,
}

#[derive(Debug)]
pub enum Event {
    Stream(Delivery),
    Fetched {
        source: SourceKey,
        outcome: Result<Payload, FetchError>,
        origin: FetchOrigin,
        scope: NaiveDate,
    },
    Enriched {
        arrival: u64,
        categories: Vec<Category>,
    },
    RefreshStarted,
    RefreshFinished {
        error: Option<String>,
        ack: oneshot::Sender<()>,
    },
    SetEditTarget(Option<Category>),
    Connectivity(bool),
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// State shared between the coordinator task and the dashboard handle.
pub struct Shared {
    pub store: Arc<dyn DocumentStore>,
    pub clock: Arc<dyn Clock>,
    events: mpsc::UnboundedSender<Event>,
    refresh_gate: Mutex<()>,
}

impl Shared {
    pub fn send(&self, event: Event) -> Result<(), DashboardError> {
        self.events.send(event).map_err(|_| DashboardError::ShutDown)
    }
}

/// Reads one source from the store and ingests it. Categories come back
/// enriched with service counts.
pub async fn fetch_source(
    store: &dyn DocumentStore,
    source: SourceKey,
    today: NaiveDate,
) -> Result<Payload, FetchError> {
    let query = source.query(today);
    match source {
        SourceKey::AllBookings => {
            let docs = store.fetch_all(query.collection, &query.filters).await?;
            Ok(Payload::Bookings(ingest_bookings(&docs)))
        }
        SourceKey::TodayBookings => {
            let date = today.format("%Y-%m-%d").to_string();
            let docs = store.fetch_by_date(query.collection, &date).await?;
            Ok(Payload::Bookings(ingest_bookings(&docs)))
        }
        SourceKey::ActiveServices | SourceKey::AllServices => {
            let docs = store.fetch_all(query.collection, &query.filters).await?;
            Ok(Payload::Services(ingest_services(&docs)))
        }
        SourceKey::Categories => {
            let docs = store.fetch_all(query.collection, &query.filters).await?;
            Ok(Payload::Categories(enrich_categories(store, &docs).await.categories))
        }
    }
}

const REFRESH_SOURCES: [SourceKey; 4] = [
    SourceKey::AllBookings,
    SourceKey::TodayBookings,
    SourceKey::ActiveServices,
    SourceKey::Categories,
];

/// Re-runs every one-shot fetch concurrently. Successful fetches are
/// committed even when others fail; any failure makes the whole refresh
/// report an error. Concurrent callers queue behind each other.
pub async fn refresh(shared: &Shared) -> Result<(), DashboardError> {
    let _gate = shared.refresh_gate.lock().await;
    shared.send(Event::RefreshStarted)?;

    let today = shared.clock.today();
    let store = shared.store.as_ref();
    let (all, day, active, categories) = tokio::join!(
        fetch_source(store, SourceKey::AllBookings, today),
        fetch_source(store, SourceKey::TodayBookings, today),
        fetch_source(store, SourceKey::ActiveServices, today),
        fetch_source(store, SourceKey::Categories, today),
    );

    let mut failed = vec![];
    for (source, outcome) in REFRESH_SOURCES.into_iter().zip([all, day, active, categories]) {
        if let Err(e) = &outcome {
            tracing::warn!(%source, error = %e, "refresh fetch failed");
            failed.push(source);
        }
        shared.send(Event::Fetched {
            source,
            outcome,
            origin: FetchOrigin::Refresh,
            scope: today,
        })?;
    }

    let result = if failed.is_empty() {
        Ok(())
    } else {
        Err(DashboardError::Refresh { failed })
    };

    let (ack, done) = oneshot::channel();
    shared.send(Event::RefreshFinished {
        error: result.as_ref().err().map(ToString::to_string),
        ack,
    })?;
    // Wait until the results are published before reporting back.
    let _ = done.await;

    result
}

fn ingest_bookings(docs: &[Document]) -> Vec<Booking> {
    docs.iter().map(Booking::from_document).collect()
}

fn ingest_services(docs: &[Document]) -> Vec<Service> {
    docs.iter().map(Service::from_document).collect()
}

pub struct Coordinator {
    shared: Arc<Shared>,
    config: DashboardConfig,
    events: mpsc::UnboundedReceiver<Event>,
    publisher: watch::Sender<Arc<DashboardSnapshot>>,
    subs: SubscriptionManager,
    slots: Slots,
    next_arrival: u64,
    /// Day the today-bookings subscription is filtered on.
    today: NaiveDate,
    /// Latest raw categories from the live stream, kept for re-enrichment
    /// when services change.
    category_docs: Option<Vec<Document>>,
    stale: BTreeSet<SourceKey>,
    refreshing: bool,
    online: bool,
    edit_target: Option<Category>,
    last_error: Option<String>,
    network_task: Option<JoinHandle<()>>,
}

/// Handles returned by [`Coordinator::start`].
pub struct Started {
    pub shared: Arc<Shared>,
    pub snapshots: watch::Receiver<Arc<DashboardSnapshot>>,
    pub task: JoinHandle<()>,
}

impl Coordinator {
    fn new(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        config: DashboardConfig,
        network: Option<&NetworkMonitor>,
    ) -> (Self, watch::Receiver<Arc<DashboardSnapshot>>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            store: Arc::clone(&store),
            clock: Arc::clone(&clock),
            events: events_tx,
            refresh_gate: Mutex::new(()),
        });

        let online = network.map_or(true, NetworkMonitor::is_online);
        let (publisher, snapshots) = watch::channel(Arc::new(DashboardSnapshot {
            loading: true,
            online,
            ..Default::default()
        }));

        let coordinator = Coordinator {
            subs: SubscriptionManager::new(store, config.stream_liveness),
            network_task: network.map(|monitor| watch_network(monitor, &shared)),
            shared,
            config,
            events: events_rx,
            publisher,
            slots: Slots::new(),
            next_arrival: 0,
            today: clock.today(),
            category_docs: None,
            stale: BTreeSet::new(),
            refreshing: false,
            online,
            edit_target: None,
            last_error: None,
        };
        (coordinator, snapshots)
    }

    /// Issues the baseline fetches, opens every live stream and spawns the
    /// coordinator task.
    pub async fn start(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        config: DashboardConfig,
        network: Option<&NetworkMonitor>,
    ) -> Started {
        let (mut coordinator, snapshots) = Coordinator::new(store, clock, config, network);
        let shared = Arc::clone(&coordinator.shared);
        let today = coordinator.today;

        for source in SourceKey::BASELINE {
            coordinator.slots.begin_loading(source);
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let outcome = fetch_source(shared.store.as_ref(), source, today).await;
                let _ = shared.send(Event::Fetched {
                    source,
                    outcome,
                    origin: FetchOrigin::Initial,
                    scope: today,
                });
            });
        }

        for source in SourceKey::ALL {
            coordinator.open_stream(source).await;
        }

        coordinator.publish();
        let task = tokio::spawn(coordinator.run());

        Started {
            shared,
            snapshots,
            task,
        }
    }

    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.day_check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                next = self.events.recv() => match next {
                    Some(Event::Shutdown { ack }) => {
                        self.teardown();
                        let _ = ack.send(());
                        break;
                    }
                    Some(event) => self.handle(event),
                    None => break,
                },
                _ = ticker.tick() => self.check_day().await,
            }
        }
        tracing::debug!("coordinator stopped");
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Stream(delivery) => self.on_stream(delivery),
            Event::Fetched {
                source,
                outcome,
                origin,
                scope,
            } => self.on_fetched(source, outcome, origin, scope),
            Event::Enriched {
                arrival,
                categories,
            } => {
                if self.slots.categories.populate(categories, arrival, None) {
                    self.publish();
                }
            }
            Event::RefreshStarted => {
                self.refreshing = true;
                self.publish();
            }
            Event::RefreshFinished { error, ack } => {
                self.refreshing = false;
                self.last_error = error;
                self.publish();
                let _ = ack.send(());
            }
            Event::SetEditTarget(target) => {
                self.edit_target = target;
                self.publish();
            }
            Event::Connectivity(online) => self.on_connectivity(online),
            // handled in run()
            Event::Shutdown { ack } => {
                let _ = ack.send(());
            }
        }
    }

    fn on_stream(&mut self, delivery: Delivery) {
        let Delivery {
            subscription,
            source,
            event,
        } = delivery;

        // a closed stream has already flipped itself inactive
        let current = match event {
            StreamEvent::Closed => self.subs.is_registered(source, subscription),
            _ => self.subs.is_current(source, subscription),
        };
        if !current {
            tracing::debug!(%source, %subscription, "discarding event from retired subscription");
            return;
        }

        match event {
            StreamEvent::Snapshot(docs) => {
                self.stale.remove(&source);
                self.apply_snapshot(source, docs);
            }
            StreamEvent::Stalled { silent_for } => {
                tracing::warn!(%source, ?silent_for, "live stream silent");
                self.stale.insert(source);
                self.publish();
            }
            StreamEvent::Closed => {
                tracing::warn!(%source, "live stream closed by store");
                self.subs.unsubscribe(source);
                self.stale.insert(source);
                self.publish();
            }
        }
    }

    fn apply_snapshot(&mut self, source: SourceKey, docs: Vec<Document>) {
        match source {
            SourceKey::AllBookings => {
                let arrival = self.ticket();
                self.slots
                    .all_bookings
                    .populate(ingest_bookings(&docs), arrival, None);
            }
            SourceKey::TodayBookings => {
                let arrival = self.ticket();
                let scope = Some(self.today);
                self.slots
                    .today_bookings
                    .populate(ingest_bookings(&docs), arrival, scope);
            }
            SourceKey::ActiveServices => {
                let arrival = self.ticket();
                self.slots
                    .active_services
                    .populate(ingest_services(&docs), arrival, None);
            }
            SourceKey::AllServices => {
                if let Some(categories) = self.category_docs.clone() {
                    self.spawn_enrichment(categories);
                }
                return;
            }
            SourceKey::Categories => {
                self.category_docs = Some(docs.clone());
                self.spawn_enrichment(docs);
                return;
            }
        }
        self.publish();
    }

    fn spawn_enrichment(&mut self, docs: Vec<Document>) {
        self.slots.categories.begin_loading();
        let arrival = self.ticket();
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let outcome = enrich_categories(shared.store.as_ref(), &docs).await;
            let _ = shared.send(Event::Enriched {
                arrival,
                categories: outcome.categories,
            });
        });
    }

    fn on_fetched(
        &mut self,
        source: SourceKey,
        outcome: Result<Payload, FetchError>,
        origin: FetchOrigin,
        scope: NaiveDate,
    ) {
        // all-services only re-triggers enrichment; it has no slot to fill
        if source == SourceKey::AllServices {
            tracing::debug!("ignoring fetch result for slotless all-services");
            return;
        }

        let payload = match (outcome, origin) {
            (Ok(payload), _) => payload,
            (Err(e), FetchOrigin::Initial) => {
                if self.slots.is_populated(source) {
                    tracing::warn!(%source, error = %e, "baseline fetch failed, keeping streamed data");
                    return;
                }
                tracing::warn!(%source, error = %e, "baseline fetch failed, using empty result");
                empty_payload(source)
            }
            // already reported by refresh()
            (Err(_), FetchOrigin::Refresh) => return,
        };

        let arrival = self.ticket();
        let accepted = match (source, payload) {
            (SourceKey::AllBookings, Payload::Bookings(records)) => {
                self.slots.all_bookings.populate(records, arrival, None)
            }
            (SourceKey::TodayBookings, Payload::Bookings(records)) => {
                self.slots
                    .today_bookings
                    .populate(records, arrival, Some(scope))
            }
            (SourceKey::ActiveServices, Payload::Services(records)) => {
                self.slots.active_services.populate(records, arrival, None)
            }
            (SourceKey::Categories, Payload::Categories(records)) => {
                self.slots.categories.populate(records, arrival, None)
            }
            (source, payload) => {
                tracing::error!(%source, ?payload, "fetch result does not match source");
                false
            }
        };

        if accepted {
            self.publish();
        }
    }

    fn on_connectivity(&mut self, online: bool) {
        let reconnected = online && !self.online;
        self.online = online;
        self.publish();

        if reconnected {
            tracing::info!("connectivity restored, refreshing");
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                if let Err(e) = refresh(&shared).await {
                    tracing::warn!(error = %e, "refresh after reconnect failed");
                }
            });
        }
    }

    async fn check_day(&mut self) {
        let today = self.shared.clock.today();
        if today == self.today {
            return;
        }

        tracing::info!(from = %self.today, to = %today, "calendar day changed");
        self.today = today;
        self.subs.unsubscribe(SourceKey::TodayBookings);
        self.open_stream(SourceKey::TodayBookings).await;
        self.publish();
    }

    async fn open_stream(&mut self, source: SourceKey) {
        let query = source.query(self.today);
        let events = self.shared.events.clone();
        let handler: UpdateHandler = Arc::new(move |delivery: Delivery| {
            let _ = events.send(Event::Stream(delivery));
        });

        match self.subs.subscribe(source, query, handler).await {
            Ok(_) => {
                self.stale.remove(&source);
            }
            Err(e) => {
                tracing::error!(%source, error = %e, "could not open live stream");
                self.stale.insert(source);
            }
        }
    }

    fn teardown(&mut self) {
        tracing::info!(sources = ?self.subs.live_sources(), "tearing down dashboard session");
        self.subs.unsubscribe_all();
        if let Some(task) = self.network_task.take() {
            task.abort();
        }
        self.slots.reset();
        self.category_docs = None;
        self.stale.clear();
        self.edit_target = None;
        self.refreshing = false;
        self.publisher.send_replace(Arc::new(DashboardSnapshot {
            online: self.online,
            published_at: Some(self.shared.clock.now()),
            ..Default::default()
        }));
    }

    fn ticket(&mut self) -> u64 {
        self.next_arrival += 1;
        self.next_arrival
    }

    fn publish(&self) {
        let today = self.shared.clock.today();
        let snapshot = DashboardSnapshot {
            stats: aggregate(&self.slots, today),
            categories: self.slots.categories.records().to_vec(),
            today_bookings: today_schedule(&self.slots, today),
            loading: self.slots.loading(),
            refreshing: self.refreshing,
            online: self.online,
            category_edit_target: self.edit_target.clone(),
            stale_sources: self.stale.iter().copied().collect(),
            last_error: self.last_error.clone(),
            published_at: Some(self.shared.clock.now()),
        };
        self.publisher.send_replace(Arc::new(snapshot));
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Some(task) = self.network_task.take() {
            task.abort();
        }
    }
}

fn empty_payload(source: SourceKey) -> Payload {
    match source {
        SourceKey::AllBookings | SourceKey::TodayBookings => Payload::Bookings(vec![]),
        SourceKey::ActiveServices | SourceKey::AllServices => Payload::Services(vec![]),
        SourceKey::Categories => Payload::Categories(vec![]),
    }
}

fn watch_network(monitor: &NetworkMonitor, shared: &Arc<Shared>) -> JoinHandle<()> {
    let mut rx = monitor.subscribe();
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let online = *rx.borrow_and_update();
            if shared.send(Event::Connectivity(online)).is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::services::clock::FixedClock;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    const WAIT: Duration = Duration::from_secs(2);

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 16).unwrap()
    }

    fn booking(id: &str, date: &str) -> Document {
        Document::new(id, json!({"date": date, "time": "10:00", "status": "pending", "price": 10}))
    }

    /// Pulls queued events until a stream delivery for `source` arrives from
    /// a subscription other than `skip`.
    async fn next_delivery(coordinator: &mut Coordinator, source: SourceKey, skip: Option<Uuid>) -> Delivery {
        loop {
            let event = tokio::time::timeout(WAIT, coordinator.events.recv())
                .await
                .expect("no delivery queued")
                .expect("event channel closed");
            if let Event::Stream(delivery) = event {
                if delivery.source == source && Some(delivery.subscription) != skip {
                    return delivery;
                }
            }
        }
    }

    fn today_ids(coordinator: &Coordinator) -> Vec<String> {
        coordinator
            .slots
            .today_bookings
            .records()
            .iter()
            .map(|b| b.id.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_retired_subscription_delivery_is_discarded() {
        let store = SqliteStore::open(":memory:").unwrap();
        store.put("bookings", &booking("a", "2025-06-16")).unwrap();
        store.put("bookings", &booking("b", "2025-06-17")).unwrap();
        let clock = FixedClock::new(day());

        let (mut coordinator, snapshots) = Coordinator::new(
            Arc::new(store),
            Arc::new(clock.clone()),
            DashboardConfig::default(),
            None,
        );
        coordinator.open_stream(SourceKey::TodayBookings).await;

        let first = next_delivery(&mut coordinator, SourceKey::TodayBookings, None).await;
        let retired = first.subscription;
        coordinator.handle(Event::Stream(first));
        assert_eq!(today_ids(&coordinator), vec!["a"]);

        clock.set(day().succ_opt().unwrap());
        coordinator.check_day().await;
        assert!(!coordinator.subs.is_current(SourceKey::TodayBookings, retired));

        // already queued by the retired stream when it was replaced
        coordinator.handle(Event::Stream(Delivery {
            subscription: retired,
            source: SourceKey::TodayBookings,
            event: StreamEvent::Snapshot(vec![booking("a", "2025-06-16"), booking("late", "2025-06-16")]),
        }));
        coordinator.handle(Event::Stream(Delivery {
            subscription: retired,
            source: SourceKey::TodayBookings,
            event: StreamEvent::Closed,
        }));
        assert_eq!(today_ids(&coordinator), vec!["a"]);
        assert_eq!(coordinator.slots.today_bookings.scope(), Some(day()));
        assert!(coordinator.stale.is_empty());

        // the replacement stream keeps flowing
        let fresh = next_delivery(&mut coordinator, SourceKey::TodayBookings, Some(retired)).await;
        coordinator.handle(Event::Stream(fresh));
        assert_eq!(today_ids(&coordinator), vec!["b"]);
        assert_eq!(coordinator.slots.today_bookings.scope(), day().succ_opt());

        let snap = snapshots.borrow().clone();
        assert_eq!(snap.today_bookings.len(), 1);
        assert_eq!(snap.today_bookings[0].id, "b");
    }

    #[tokio::test]
    async fn test_closed_current_stream_marked_stale() {
        let store = SqliteStore::open(":memory:").unwrap();
        let (mut coordinator, snapshots) = Coordinator::new(
            Arc::new(store),
            Arc::new(FixedClock::new(day())),
            DashboardConfig::default(),
            None,
        );
        coordinator.open_stream(SourceKey::Categories).await;
        let delivery = next_delivery(&mut coordinator, SourceKey::Categories, None).await;

        coordinator.handle(Event::Stream(Delivery {
            event: StreamEvent::Closed,
            ..delivery
        }));
        assert!(snapshots.borrow().stale_sources.contains(&SourceKey::Categories));
        assert!(!coordinator.subs.is_registered(SourceKey::Categories, delivery.subscription));
    }
}
