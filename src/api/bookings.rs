use chrono::Utc;
use reqwest::Method;
use serde_json::Value;

use crate::api::client::{ApiClient, RequestContext};
use crate::api::models::{Booking, BookingStatus, NewBooking};
use crate::error::{ClientError, Result};

impl ApiClient {
    pub async fn bookings(&self, ctx: &RequestContext) -> Result<Vec<Booking>> {
        ctx.require_auth()?;
        self.get_list(ctx, "bookings", &[], "bookings").await
    }

    pub async fn create_booking(&self, ctx: &RequestContext, booking: &NewBooking) -> Result<Booking> {
        ctx.require_auth()?;
        if booking.scheduled_at <= Utc::now() {
            return Err(ClientError::Config("booking must be scheduled in the future".into()));
        }
        self.send(ctx, Method::POST, "bookings", Some(booking), "booking").await
    }

    pub async fn cancel_booking(&self, ctx: &RequestContext, id: &str) -> Result<()> {
        ctx.require_auth()?;
        self.send_unit(ctx, Method::PATCH, &format!("bookings/{id}/cancel"), None::<&Value>)
            .await
    }
}

/// Bookings still ahead of `now`, soonest first.
pub fn upcoming(bookings: &[Booking]) -> Vec<&Booking> {
    let now = Utc::now();
    let mut out: Vec<&Booking> = bookings
        .iter()
        .filter(|b| b.scheduled_at > now)
        .filter(|b| matches!(b.status, BookingStatus::Pending | BookingStatus::Confirmed))
        .collect();
    out.sort_by_key(|b| b.scheduled_at);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn booking(id: &str, hours: i64, status: BookingStatus) -> Booking {
        Booking {
            id: id.into(),
            client_id: None,
            professional_id: "p1".into(),
            service_id: "s1".into(),
            scheduled_at: Utc::now() + Duration::hours(hours),
            status,
            price: None,
            address: None,
        }
    }

    #[test]
    fn upcoming_filters_and_sorts() {
        let list = vec![
            booking("late", 48, BookingStatus::Confirmed),
            booking("past", -2, BookingStatus::Confirmed),
            booking("soon", 1, BookingStatus::Pending),
            booking("cancelled", 5, BookingStatus::Cancelled),
        ];
        let ids: Vec<&str> = upcoming(&list).iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["soon", "late"]);
    }

    #[test]
    fn past_booking_rejected_locally() {
        let client = ApiClient::new("http://localhost").unwrap();
        let new = NewBooking {
            professional_id: "p1".into(),
            service_id: "s1".into(),
            scheduled_at: Utc::now() - Duration::hours(1),
            address: None,
            budget_id: None,
        };
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let err = rt.block_on(client.create_booking(&RequestContext::bearer("t"), &new)).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
