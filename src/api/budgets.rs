//! Budget (quote) and chat endpoints under `/api`.

use futures_util::future::try_join_all;
use reqwest::Method;
use serde_json::{json, Value};

use crate::api::client::{ApiClient, RequestContext};
use crate::api::models::{Budget, BudgetStatus, Chat};
use crate::error::Result;
use crate::store::BudgetBoard;

impl ApiClient {
    /// Ask a professional for a quote. The backend opens the chat and pushes `new-chat`.
    pub async fn request_budget(&self, ctx: &RequestContext, service_id: &str, professional_id: &str) -> Result<Budget> {
        ctx.require_auth()?;
        let body = json!({ "serviceId": service_id, "professionalId": professional_id });
        self.send(ctx, Method::POST, "api/budgets/request", Some(&body), "budget").await
    }

    pub async fn cancel_budget(&self, ctx: &RequestContext, budget_id: &str) -> Result<()> {
        self.budget_transition(ctx, budget_id, "cancel").await
    }

    pub async fn accept_budget(&self, ctx: &RequestContext, budget_id: &str) -> Result<()> {
        self.budget_transition(ctx, budget_id, "accept").await
    }

    pub async fn reject_budget(&self, ctx: &RequestContext, budget_id: &str) -> Result<()> {
        self.budget_transition(ctx, budget_id, "reject").await
    }

    async fn budget_transition(&self, ctx: &RequestContext, budget_id: &str, action: &str) -> Result<()> {
        ctx.require_auth()?;
        let path = format!("api/budgets/{budget_id}/{action}");
        self.send_unit(ctx, Method::PATCH, &path, None::<&Value>).await
    }

    pub async fn service_budgets(
        &self,
        ctx: &RequestContext,
        service_id: &str,
        status: Option<BudgetStatus>,
    ) -> Result<Vec<Budget>> {
        ctx.require_auth()?;
        let query: Vec<(&str, String)> = status
            .map(|s| vec![("status", s.as_query().to_string())])
            .unwrap_or_default();
        self.get_list(ctx, &format!("api/budgets/service/{service_id}"), &query, "budgets")
            .await
    }

    /// Accepted, pending and quoted budgets for every service, fetched
    /// concurrently and folded into one board once all have returned.
    pub async fn budget_board(&self, ctx: &RequestContext, service_ids: &[String]) -> Result<BudgetBoard> {
        let per_service = service_ids.iter().map(|service_id| async move {
            let (accepted, pending, quoted) = tokio::try_join!(
                self.service_budgets(ctx, service_id, Some(BudgetStatus::Accepted)),
                self.service_budgets(ctx, service_id, Some(BudgetStatus::Pending)),
                self.service_budgets(ctx, service_id, Some(BudgetStatus::Quoted)),
            )?;
            Ok::<_, crate::error::ClientError>([pending, quoted, accepted].concat())
        });
        let budgets: Vec<Budget> = try_join_all(per_service).await?.into_iter().flatten().collect();
        Ok(BudgetBoard::from_budgets(&budgets))
    }

    pub async fn chats(&self, ctx: &RequestContext, user_id: &str) -> Result<Vec<Chat>> {
        ctx.require_auth()?;
        self.get_list(ctx, &format!("api/chats/user/{user_id}"), &[], "chats").await
    }

    pub async fn mark_chat_read(&self, ctx: &RequestContext, chat_id: &str) -> Result<()> {
        ctx.require_auth()?;
        self.send_unit(ctx, Method::PATCH, &format!("api/chats/{chat_id}/read"), None::<&Value>)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::decode_items;
    use crate::store::QuoteState;

    #[test]
    fn board_from_mixed_budget_lists() {
        let budgets: Vec<Budget> = decode_items(
            json!({"budgets": [
                {"id": "b1", "serviceId": "s1", "status": "PENDING", "price": 0},
                {"id": "b2", "serviceId": "s2", "status": "QUOTED", "price": "120.50"},
                {"id": "b3", "serviceId": "s3", "status": "ACCEPTED", "price": 99}
            ]}),
            "budgets",
        );
        let board = BudgetBoard::from_budgets(&budgets);
        assert_eq!(board.quote_state("s1"), QuoteState::Awaiting);
        assert_eq!(board.quote_state("s2"), QuoteState::Quoted(120.5));
        assert_eq!(board.quote_state("s3"), QuoteState::Quoted(99.0));
        assert_eq!(board.quote_state("s4"), QuoteState::NotRequested);
    }

    #[test]
    fn empty_board_needs_no_requests() {
        let client = ApiClient::new("http://localhost").unwrap();
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let board = rt.block_on(client.budget_board(&RequestContext::bearer("t"), &[])).unwrap();
        assert_eq!(board, BudgetBoard::default());
    }
}
