use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Prices arrive as JSON numbers, numeric strings, or null.
pub(crate) fn deserialize_price<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => crate::utils::parse_price(&s),
        _ => None,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    #[serde(alias = "accessToken")]
    pub token: String,
    pub user: User,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Professional {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub profession: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub review_count: u32,
}

/// Locally persisted copy of a professional. Never refreshed from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteProfessional {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub profession: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    pub saved_at: DateTime<Utc>,
}

impl From<&Professional> for FavoriteProfessional {
    fn from(p: &Professional) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            profession: p.profession.clone(),
            avatar_url: p.avatar_url.clone(),
            rating: p.rating,
            saved_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProfessionalQuery {
    pub text: Option<String>,
    pub category_id: Option<String>,
    pub city: Option<String>,
}

impl ProfessionalQuery {
    pub(crate) fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(q) = self.text.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            pairs.push(("q", q.to_string()));
        }
        if let Some(c) = &self.category_id {
            pairs.push(("categoryId", c.clone()));
        }
        if let Some(c) = &self.city {
            pairs.push(("city", c.clone()));
        }
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub professional_id: Option<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "deserialize_price")]
    pub price: Option<f64>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfessionCategory {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    pub professional_id: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReview {
    pub professional_id: String,
    pub rating: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlot {
    /// Local wall-clock start, "HH:MM".
    pub start: String,
    pub end: String,
    #[serde(default = "default_true")]
    pub available: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookingStatus {
    #[serde(alias = "pending")]
    Pending,
    #[serde(alias = "confirmed")]
    Confirmed,
    #[serde(alias = "completed")]
    Completed,
    #[serde(alias = "cancelled", alias = "CANCELED", alias = "canceled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    #[serde(default)]
    pub client_id: Option<String>,
    pub professional_id: String,
    pub service_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub status: BookingStatus,
    #[serde(default, deserialize_with = "deserialize_price")]
    pub price: Option<f64>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBooking {
    pub professional_id: String,
    pub service_id: String,
    pub scheduled_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BudgetStatus {
    #[serde(alias = "pending")]
    Pending,
    #[serde(alias = "quoted")]
    Quoted,
    #[serde(alias = "accepted")]
    Accepted,
    #[serde(alias = "rejected")]
    Rejected,
    #[serde(alias = "expired")]
    Expired,
}

impl BudgetStatus {
    pub fn as_query(&self) -> &'static str {
        match self {
            BudgetStatus::Pending => "PENDING",
            BudgetStatus::Quoted => "QUOTED",
            BudgetStatus::Accepted => "ACCEPTED",
            BudgetStatus::Rejected => "REJECTED",
            BudgetStatus::Expired => "EXPIRED",
        }
    }

    /// The quote is no longer actionable by either side.
    pub fn is_closed(&self) -> bool {
        matches!(self, BudgetStatus::Rejected | BudgetStatus::Expired)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    pub id: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    pub service_id: String,
    #[serde(default)]
    pub professional_id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_price")]
    pub price: Option<f64>,
    pub status: BudgetStatus,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Budget {
    /// Price the professional actually quoted; zero means "not quoted yet".
    pub fn quoted_price(&self) -> Option<f64> {
        self.price.filter(|p| *p > 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub client_id: String,
    pub professional_id: String,
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub professional_name: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_id: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub budget: Option<Budget>,
}

impl Chat {
    pub fn display_name(&self) -> &str {
        self.professional_name
            .as_deref()
            .or(self.service_name.as_deref())
            .unwrap_or("Chat")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    pub sender_id: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn budget_accepts_string_price_and_lowercase_status() {
        let b: Budget = serde_json::from_value(json!({
            "id": "b1", "serviceId": "s1", "price": "25.00", "status": "quoted"
        }))
        .unwrap();
        assert_eq!(b.price, Some(25.0));
        assert_eq!(b.status, BudgetStatus::Quoted);
        assert_eq!(b.quoted_price(), Some(25.0));
    }

    #[test]
    fn budget_rejects_unknown_status() {
        let res = serde_json::from_value::<Budget>(json!({
            "id": "b1", "serviceId": "s1", "status": "NEGOTIATING"
        }));
        assert!(res.is_err());
    }

    #[test]
    fn zero_price_is_not_a_quote() {
        let b: Budget = serde_json::from_value(json!({
            "id": "b1", "serviceId": "s1", "price": 0, "status": "PENDING"
        }))
        .unwrap();
        assert_eq!(b.quoted_price(), None);
    }

    #[test]
    fn chat_defaults_unread_to_zero() {
        let c: Chat = serde_json::from_value(json!({
            "id": "c1", "clientId": "u1", "professionalId": "p1"
        }))
        .unwrap();
        assert_eq!(c.unread_count, 0);
        assert_eq!(c.display_name(), "Chat");
    }

    #[test]
    fn query_skips_blank_text() {
        let q = ProfessionalQuery { text: Some("  ".into()), city: Some("Recife".into()), ..Default::default() };
        assert_eq!(q.to_pairs(), vec![("city", "Recife".to_string())]);
    }
}
