//! Read-mostly catalog endpoints: professionals, services, categories,
//! reviews and availability.

use chrono::NaiveDate;
use reqwest::Method;

use crate::api::client::{ApiClient, RequestContext};
use crate::api::models::{
    NewReview, Professional, ProfessionCategory, ProfessionalQuery, Review, Service, TimeSlot,
};
use crate::error::{ClientError, Result};

impl ApiClient {
    pub async fn search_professionals(&self, ctx: &RequestContext, query: &ProfessionalQuery) -> Result<Vec<Professional>> {
        self.get_list(ctx, "professionals", &query.to_pairs(), "professionals").await
    }

    pub async fn professional(&self, ctx: &RequestContext, id: &str) -> Result<Professional> {
        self.get_one(ctx, &format!("professionals/{id}"), "professional").await
    }

    pub async fn services(
        &self,
        ctx: &RequestContext,
        professional_id: Option<&str>,
        category_id: Option<&str>,
    ) -> Result<Vec<Service>> {
        let mut query = Vec::new();
        if let Some(p) = professional_id {
            query.push(("professionalId", p.to_string()));
        }
        if let Some(c) = category_id {
            query.push(("categoryId", c.to_string()));
        }
        self.get_list(ctx, "services", &query, "services").await
    }

    pub async fn service(&self, ctx: &RequestContext, id: &str) -> Result<Service> {
        self.get_one(ctx, &format!("services/{id}"), "service").await
    }

    pub async fn profession_categories(&self, ctx: &RequestContext) -> Result<Vec<ProfessionCategory>> {
        self.get_list(ctx, "profession-categories", &[], "categories").await
    }

    pub async fn reviews(&self, ctx: &RequestContext, professional_id: &str) -> Result<Vec<Review>> {
        let query = [("professionalId", professional_id.to_string())];
        self.get_list(ctx, "reviews", &query, "reviews").await
    }

    pub async fn create_review(&self, ctx: &RequestContext, review: &NewReview) -> Result<Review> {
        ctx.require_auth()?;
        if !(1..=5).contains(&review.rating) {
            return Err(ClientError::Config(format!("rating must be 1..=5, got {}", review.rating)));
        }
        self.send(ctx, Method::POST, "reviews", Some(review), "review").await
    }

    pub async fn availability(&self, ctx: &RequestContext, professional_id: &str, date: NaiveDate) -> Result<Vec<TimeSlot>> {
        let query = [("date", date.format("%Y-%m-%d").to_string())];
        let path = format!("professionals/{professional_id}/availability");
        self.get_list(ctx, &path, &query, "slots").await
    }
}

/// Slots a client can still pick.
pub fn open_slots(slots: &[TimeSlot]) -> impl Iterator<Item = &TimeSlot> {
    slots.iter().filter(|s| s.available)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::decode_items;
    use serde_json::json;

    #[test]
    fn slots_decode_and_filter() {
        let slots: Vec<TimeSlot> = decode_items(
            json!({"slots": [
                {"start": "09:00", "end": "10:00"},
                {"start": "10:00", "end": "11:00", "available": false}
            ]}),
            "slots",
        );
        let open: Vec<&str> = open_slots(&slots).map(|s| s.start.as_str()).collect();
        assert_eq!(open, vec!["09:00"]);
    }

    #[test]
    fn invalid_rating_rejected_before_request() {
        let client = ApiClient::new("http://localhost").unwrap();
        let review = NewReview { professional_id: "p1".into(), rating: 6, comment: None, booking_id: None };
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let err = rt.block_on(client.create_review(&RequestContext::bearer("t"), &review)).unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
