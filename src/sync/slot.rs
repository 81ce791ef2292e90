use chrono::{DateTime, NaiveDate, Utc};

use super::SourceKey;
use crate::models::{Booking, Category, Service};

#[derive(Debug, Clone, PartialEq)]
pub enum SlotState<T> {
    Empty,
    Loading,
    Populated(Populated<T>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Populated<T> {
    pub records: Vec<T>,
    /// Arrival ticket of the update that produced these records.
    pub arrival: u64,
    /// Calendar day the records were scoped to, for date-filtered sources.
    pub scope: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

/// Holder for the latest snapshot of one source.
///
/// `Empty -> Loading -> Populated`, then `Populated -> Populated` on every
/// accepted update. Only [`Slot::reset`] returns a slot to `Empty`.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot<T> {
    key: SourceKey,
    state: SlotState<T>,
}

impl<T> Slot<T> {
    pub fn new(key: SourceKey) -> Self {
        Self {
            key,
            state: SlotState::Empty,
        }
    }

    pub fn key(&self) -> SourceKey {
        self.key
    }

    pub fn state(&self) -> &SlotState<T> {
        &self.state
    }

    pub fn begin_loading(&mut self) {
        if matches!(self.state, SlotState::Empty) {
            tracing::debug!(source = %self.key, "slot loading");
            self.state = SlotState::Loading;
        }
    }

    /// Replaces the records wholesale. Updates carrying an older arrival
    /// ticket than the current contents are rejected.
    pub fn populate(&mut self, records: Vec<T>, arrival: u64, scope: Option<NaiveDate>) -> bool {
        if let SlotState::Populated(current) = &self.state {
            if arrival < current.arrival {
                tracing::debug!(
                    source = %self.key,
                    arrival,
                    current = current.arrival,
                    "dropping out-of-order update"
                );
                return false;
            }
        }
        tracing::debug!(source = %self.key, count = records.len(), arrival, "slot populated");
        self.state = SlotState::Populated(Populated {
            records,
            arrival,
            scope,
            updated_at: Utc::now(),
        });
        true
    }

    pub fn reset(&mut self) {
        self.state = SlotState::Empty;
    }

    pub fn is_populated(&self) -> bool {
        matches!(self.state, SlotState::Populated(_))
    }

    pub fn records(&self) -> &[T] {
        match &self.state {
            SlotState::Populated(p) => &p.records,
            _ => &[],
        }
    }

    pub fn scope(&self) -> Option<NaiveDate> {
        match &self.state {
            SlotState::Populated(p) => p.scope,
            _ => None,
        }
    }
}

/// Every slot the coordinator owns.
#[derive(Debug, Clone, PartialEq)]
pub struct Slots {
    pub all_bookings: Slot<Booking>,
    pub today_bookings: Slot<Booking>,
    pub active_services: Slot<Service>,
    pub categories: Slot<Category>,
}

impl Slots {
    pub fn new() -> Self {
        Self {
            all_bookings: Slot::new(SourceKey::AllBookings),
            today_bookings: Slot::new(SourceKey::TodayBookings),
            active_services: Slot::new(SourceKey::ActiveServices),
            categories: Slot::new(SourceKey::Categories),
        }
    }

    /// `AllServices` has no slot: its pushes only re-trigger category
    /// enrichment, so it is never loading and never populated.
    pub fn begin_loading(&mut self, key: SourceKey) {
        match key {
            SourceKey::AllBookings => self.all_bookings.begin_loading(),
            SourceKey::TodayBookings => self.today_bookings.begin_loading(),
            SourceKey::ActiveServices => self.active_services.begin_loading(),
            SourceKey::Categories => self.categories.begin_loading(),
            SourceKey::AllServices => {}
        }
    }

    pub fn is_populated(&self, key: SourceKey) -> bool {
        match key {
            SourceKey::AllBookings => self.all_bookings.is_populated(),
            SourceKey::TodayBookings => self.today_bookings.is_populated(),
            SourceKey::ActiveServices => self.active_services.is_populated(),
            SourceKey::Categories => self.categories.is_populated(),
            SourceKey::AllServices => false,
        }
    }

    /// True until every baseline source has been populated once.
    pub fn loading(&self) -> bool {
        SourceKey::BASELINE.iter().any(|key| !self.is_populated(*key))
    }

    pub fn reset(&mut self) {
        self.all_bookings.reset();
        self.today_bookings.reset();
        self.active_services.reset();
        self.categories.reset();
    }
}

impl Default for Slots {
    fn default() -> Self {
        Self::new()
    }
}
