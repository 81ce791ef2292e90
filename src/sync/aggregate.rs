//! Pure projections from slot contents to the dashboard view. Everything is
//! recomputed from the full record sets on each call.

use chrono::NaiveDate;

use super::slot::Slots;
use crate::models::{Booking, BookingStatus, Category, DashboardStats, Service};

pub fn aggregate(slots: &Slots, today: NaiveDate) -> DashboardStats {
    let scoped = today_scope(slots, today);

    DashboardStats {
        total_bookings: slots.all_bookings.records().len(),
        pending_bookings: scoped
            .iter()
            .filter(|b| b.status == BookingStatus::Pending)
            .count(),
        today_revenue: scoped.iter().map(|b| b.price).sum(),
        active_services: slots.active_services.records().len(),
    }
}

/// Bookings for `today`. The today stream wins when it is populated for
/// this exact day, even if it holds no records; otherwise all-bookings is
/// filtered by date.
pub fn today_scope(slots: &Slots, today: NaiveDate) -> Vec<&Booking> {
    let today_slot = &slots.today_bookings;
    if today_slot.is_populated() && today_slot.scope() == Some(today) {
        today_slot.records().iter().collect()
    } else {
        slots
            .all_bookings
            .records()
            .iter()
            .filter(|b| b.is_on(today))
            .collect()
    }
}

/// Today's schedule ordered by time of day. Ties keep source order;
/// unparseable times go last.
pub fn today_schedule(slots: &Slots, today: NaiveDate) -> Vec<Booking> {
    let mut bookings: Vec<Booking> = today_scope(slots, today).into_iter().cloned().collect();
    sort_by_time(&mut bookings);
    bookings
}

pub fn sort_by_time(bookings: &mut [Booking]) {
    // sort_by_key is stable
    bookings.sort_by_key(|b| b.minutes_of_day().unwrap_or(u32::MAX));
}

/// Sets `service_count` on each category from the services whose category
/// reference resolves to it.
pub fn count_services(mut categories: Vec<Category>, services: &[Service]) -> Vec<Category> {
    for category in &mut categories {
        category.service_count = services
            .iter()
            .filter_map(|s| s.category.as_ref())
            .filter(|r| r.resolves_to(&category.id, &category.name))
            .count();
    }
    categories
}
