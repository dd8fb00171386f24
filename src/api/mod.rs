pub mod bookings;
pub mod budgets;
pub mod catalog;
pub mod client;
pub mod events;
pub mod models;

pub use client::{ApiClient, RequestContext};
