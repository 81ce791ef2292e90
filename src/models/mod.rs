pub mod booking;
pub mod category;
pub mod dashboard;
pub mod document;
pub mod service;

pub use booking::{Booking, BookingStatus};
pub use category::Category;
pub use dashboard::{DashboardSnapshot, DashboardStats};
pub use document::{Document, Filter};
pub use service::{CategoryRef, Service};
