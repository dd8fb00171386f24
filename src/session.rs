use chrono::Utc;
use log::{debug, error, info, warn};

use crate::api::events::RealtimeEvent;
use crate::api::models::{Budget, ChatMessage, User};
use crate::api::{ApiClient, RequestContext};
use crate::app::AppState;
use crate::error::{ClientError, Result};
use crate::realtime::{RealtimeConfig, RealtimeConnection};
use crate::storage::LocalStore;
use crate::store::{ChatStore, Outcome, SharedStore};

const CACHED_CHAT_LIMIT: usize = 200;

/// A logged-in client: API access, the shared store and device storage.
#[derive(Clone)]
pub struct Session {
    api: ApiClient,
    ctx: RequestContext,
    user: User,
    store: SharedStore,
    local: LocalStore,
    state: AppState,
}

impl Session {
    fn from_parts(api: ApiClient, token: String, user: User, local: LocalStore, state: AppState) -> Self {
        let store = SharedStore::new(ChatStore::new(user.id.clone()));
        Self { api, ctx: RequestContext::bearer(token), user, store, local, state }
    }

    pub async fn login(state: AppState, local: LocalStore, email: &str, password: &str) -> Result<Self> {
        let api = ApiClient::from_state(&state)?;
        let auth = api.login(email, password).await?;
        local.save_auth(&auth.token, &auth.user)?;
        info!("Logged in as {}", auth.user.id);
        Ok(Self::from_parts(api, auth.token, auth.user, local, state))
    }

    /// Resume from a stored token. `Ok(None)` when there is nothing usable.
    pub async fn restore(state: AppState, local: LocalStore) -> Result<Option<Self>> {
        let Some(token) = local.auth_token()?.or_else(|| state.token.clone()) else {
            return Ok(None);
        };
        let api = ApiClient::from_state(&state)?;
        let ctx = RequestContext::bearer(token.clone());
        let user = match api.me(&ctx).await {
            Ok(user) => {
                local.save_auth(&token, &user)?;
                user
            }
            Err(ClientError::Unauthorized) => {
                warn!("Stored token rejected; clearing it");
                local.clear_auth()?;
                return Ok(None);
            }
            Err(e) if e.is_transient() => match local.auth_user()? {
                Some(user) => {
                    warn!("Could not verify session ({e}); continuing offline as {}", user.id);
                    user
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        };
        Ok(Some(Self::from_parts(api, token, user, local, state)))
    }

    pub fn logout(self) -> Result<()> {
        self.local.clear_auth()?;
        self.local.clear_chat_cache()
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// Show the cached list right away, then replace it with a fresh copy.
    pub async fn load_chats(&self) -> Result<()> {
        match self.local.cached_chats(Some(CACHED_CHAT_LIMIT)) {
            Ok(cached) if !cached.is_empty() => self.store.write().await.replace_chats(cached),
            Ok(_) => {}
            Err(e) => warn!("Chat cache unreadable: {e}"),
        }
        let chats = self.api.chats(&self.ctx, &self.user.id).await?;
        if let Err(e) = self.local.upsert_chats(&chats) {
            warn!("Could not cache chats: {e}");
        }
        self.store.write().await.replace_chats(chats);
        Ok(())
    }

    /// Fetch the chat list behind a reload ticket. Failures are logged and
    /// leave the last-known list in place.
    pub async fn reload_chats(&self) {
        let Some(ticket) = self.store.write().await.begin_reload() else {
            debug!("Reload already in flight");
            return;
        };
        match self.api.chats(&self.ctx, &self.user.id).await {
            Ok(chats) => {
                if let Err(e) = self.local.upsert_chats(&chats) {
                    warn!("Could not cache chats: {e}");
                }
                self.store.write().await.complete_reload(ticket, chats);
            }
            Err(e) => {
                error!("Chat reload failed: {e}");
                self.store.write().await.abort_reload(ticket);
            }
        }
    }

    /// Apply a pushed event; unknown chats trigger a background reload.
    pub async fn handle_event(&self, event: RealtimeEvent) -> Outcome {
        let pushed = match &event {
            RealtimeEvent::NewMessage(m) => Some(ChatMessage {
                id: m.message_id.clone(),
                chat_id: Some(m.chat_id.clone()),
                sender_id: m.sender_id.clone(),
                content: m.content.clone(),
                sent_at: m.created_at.unwrap_or_else(Utc::now),
            }),
            _ => None,
        };

        let outcome = self.store.apply(event).await;
        match outcome {
            Outcome::NeedsReload => {
                let session = self.clone();
                tokio::spawn(async move { session.reload_chats().await });
            }
            Outcome::Applied => {
                if let Some(message) = pushed {
                    self.remember_message(&message).await;
                }
            }
            _ => {}
        }
        outcome
    }

    async fn remember_message(&self, message: &ChatMessage) {
        let Some(chat_id) = message.chat_id.as_deref() else { return };
        let key = {
            let store = self.store.read().await;
            store
                .chat(chat_id)
                .and_then(|c| c.service_id.clone().map(|s| (c.professional_id.clone(), s)))
        };
        if let Some((professional_id, service_id)) = key {
            if let Err(e) = self.local.append_chat_message(&professional_id, &service_id, message) {
                warn!("Could not store message for chat {chat_id}: {e}");
            }
        }
    }

    /// Record a message typed locally; delivery happens through the backend.
    pub fn send_local_message(&self, professional_id: &str, service_id: &str, content: &str) -> Result<ChatMessage> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::Config("message is empty".into()));
        }
        let message = ChatMessage {
            id: None,
            chat_id: None,
            sender_id: self.user.id.clone(),
            content: content.to_string(),
            sent_at: Utc::now(),
        };
        self.local.append_chat_message(professional_id, service_id, &message)?;
        Ok(message)
    }

    pub async fn refresh_budget_board(&self, service_ids: &[String]) -> Result<()> {
        let board = self.api.budget_board(&self.ctx, service_ids).await?;
        self.store.write().await.replace_board(board);
        Ok(())
    }

    pub async fn request_budget(&self, service_id: &str, professional_id: &str) -> Result<Budget> {
        let budget = self.api.request_budget(&self.ctx, service_id, professional_id).await?;
        self.store.write().await.mark_pending(service_id);
        Ok(budget)
    }

    pub async fn cancel_budget(&self, budget_id: &str, service_id: &str) -> Result<()> {
        self.api.cancel_budget(&self.ctx, budget_id).await?;
        self.store.write().await.clear_budget(service_id);
        Ok(())
    }

    /// The user opened a chat: clear its badge locally and tell the server.
    pub async fn open_chat(&self, chat_id: &str) -> Result<()> {
        self.store.write().await.mark_read_locally(chat_id);
        self.api.mark_chat_read(&self.ctx, chat_id).await
    }

    pub fn realtime_config(&self) -> Result<RealtimeConfig> {
        Ok(RealtimeConfig {
            url: self.state.socket_endpoint()?,
            user_id: self.user.id.clone(),
            join_event: self.state.join_event.clone(),
            token: self.ctx.token().map(str::to_string),
        })
    }

    /// Stream pushed events into the store until the server closes the channel.
    pub async fn run_realtime(&self) -> Result<()> {
        let cfg = self.realtime_config()?;
        let mut conn = RealtimeConnection::connect(&cfg).await?;
        while let Some(event) = conn.next_event().await? {
            let name = event.name().to_string();
            let outcome = self.handle_event(event).await;
            debug!("{name}: {outcome:?}");
        }
        info!("Realtime channel closed by server");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::events::NewMessage;
    use crate::api::models::Chat;

    fn session(dir: &tempfile::TempDir) -> Session {
        let state = AppState { base_url: "http://127.0.0.1:9".into(), ..AppState::default() };
        let api = ApiClient::from_state(&state).unwrap();
        let local = LocalStore::open(dir.path().join("local.sqlite")).unwrap();
        let user = User {
            id: "u1".into(),
            name: "Ana".into(),
            email: None,
            phone: None,
            role: None,
            avatar_url: None,
        };
        Session::from_parts(api, "tok".into(), user, local, state)
    }

    fn chat(id: &str) -> Chat {
        serde_json::from_value(serde_json::json!({
            "id": id, "clientId": "u1", "professionalId": "p1", "serviceId": "s1"
        }))
        .unwrap()
    }

    fn pushed(chat_id: &str, sender: &str, text: &str) -> RealtimeEvent {
        RealtimeEvent::NewMessage(NewMessage {
            chat_id: chat_id.into(),
            message_id: None,
            sender_id: sender.into(),
            content: text.into(),
            created_at: None,
        })
    }

    #[tokio::test]
    async fn pushed_messages_land_in_local_history() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(&dir);
        s.store().write().await.replace_chats(vec![chat("c1")]);
        assert_eq!(s.handle_event(pushed("c1", "p1", "Posso às 10h")).await, Outcome::Applied);
        let history = s.local().chat_history("p1", "s1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Posso às 10h");
        assert_eq!(s.store().read().await.chat("c1").unwrap().unread_count, 1);
    }

    #[tokio::test]
    async fn local_send_appends_and_rejects_blank() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(&dir);
        let msg = s.send_local_message("p1", "s1", " Oi! ").unwrap();
        assert_eq!(msg.sender_id, "u1");
        assert_eq!(s.local().chat_history("p1", "s1").unwrap()[0].content, "Oi!");
        assert!(s.send_local_message("p1", "s1", "   ").is_err());
    }

    #[tokio::test]
    async fn failed_reload_keeps_last_known_list() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(&dir);
        s.store().write().await.replace_chats(vec![chat("c1")]);
        s.reload_chats().await;
        let store = s.store().read().await;
        assert!(!store.is_reloading());
        assert_eq!(store.chats().len(), 1);
    }

    #[tokio::test]
    async fn realtime_config_uses_session_identity() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(&dir);
        let cfg = s.realtime_config().unwrap();
        assert_eq!(cfg.user_id, "u1");
        assert_eq!(cfg.token.as_deref(), Some("tok"));
        assert_eq!(cfg.url.scheme(), "ws");
    }
}
