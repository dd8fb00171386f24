//! Shared chat and budget state, reconciled from real-time events.
//!
//! One `ChatStore` owns the chat list and the budget board for the whole
//! client; screens subscribe to `StoreUpdate`s instead of keeping their own
//! copies. Events carrying a server timestamp are applied last-write-wins
//! against what the store already holds, so a late event cannot overwrite
//! newer state.
//!
//! An event that references a chat the store has never seen asks for a
//! reload (`Outcome::NeedsReload`). Only one reload runs at a time; chat
//! events arriving while it is in flight are queued and replayed on top of
//! the reloaded list.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::sync::{broadcast, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::api::events::{ChatListUpdate, MessageRead, NewBudget, NewMessage, RealtimeEvent};
use crate::api::models::{Budget, BudgetStatus, Chat};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreUpdate {
    ChatsReplaced,
    ChatInserted { chat_id: String },
    ChatUpdated { chat_id: String, moved_to_head: bool },
    BudgetBoardChanged { service_id: String },
}

/// What applying an event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Already reflected (same chat id or same message id).
    Duplicate,
    /// Older than the state already held.
    Stale,
    /// Not relevant to this client.
    Ignored,
    /// Queued behind an in-flight reload.
    Deferred,
    /// References an unknown chat; the caller should reload the list.
    NeedsReload,
}

/// Button affordance for a service on profile and detail screens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QuoteState {
    NotRequested,
    Awaiting,
    Quoted(f64),
}

/// Per-service quote progress: requested, received, and the quoted price.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BudgetBoard {
    pending: HashSet<String>,
    received: HashSet<String>,
    accepted: HashMap<String, f64>,
    versions: HashMap<String, DateTime<Utc>>,
}

impl BudgetBoard {
    pub fn from_budgets<'a>(budgets: impl IntoIterator<Item = &'a Budget>) -> Self {
        let mut board = Self::default();
        for b in budgets {
            board.fold(&b.service_id, b.price, Some(b.status), b.updated_at);
        }
        board
    }

    pub fn pending(&self) -> &HashSet<String> {
        &self.pending
    }

    pub fn received(&self) -> &HashSet<String> {
        &self.received
    }

    pub fn accepted(&self) -> &HashMap<String, f64> {
        &self.accepted
    }

    pub fn price(&self, service_id: &str) -> Option<f64> {
        self.accepted.get(service_id).copied()
    }

    pub fn quote_state(&self, service_id: &str) -> QuoteState {
        if let Some(price) = self.price(service_id) {
            QuoteState::Quoted(price)
        } else if self.pending.contains(service_id) {
            QuoteState::Awaiting
        } else {
            QuoteState::NotRequested
        }
    }

    pub fn mark_pending(&mut self, service_id: &str) -> bool {
        if self.received.contains(service_id) {
            return false;
        }
        self.pending.insert(service_id.to_string())
    }

    pub fn clear(&mut self, service_id: &str) -> bool {
        let a = self.pending.remove(service_id);
        let b = self.received.remove(service_id);
        let c = self.accepted.remove(service_id).is_some();
        a || b || c
    }

    /// Fold a quote for `service_id` into the board. Returns `Stale` when an
    /// older version than the one held arrives, `Ignored` when nothing moved.
    fn fold(
        &mut self,
        service_id: &str,
        price: Option<f64>,
        status: Option<BudgetStatus>,
        version: Option<DateTime<Utc>>,
    ) -> Outcome {
        if is_older(version, self.versions.get(service_id).copied()) {
            return Outcome::Stale;
        }
        if let Some(v) = version {
            self.versions.insert(service_id.to_string(), v);
        }

        let changed = match (status, price.filter(|p| *p > 0.0)) {
            (Some(s), _) if s.is_closed() => self.clear(service_id),
            (_, Some(price)) => {
                let was_pending = self.pending.remove(service_id);
                let newly_received = self.received.insert(service_id.to_string());
                let repriced = self.accepted.insert(service_id.to_string(), price) != Some(price);
                was_pending || newly_received || repriced
            }
            (Some(BudgetStatus::Pending), None) => self.mark_pending(service_id),
            _ => false,
        };
        if changed { Outcome::Applied } else { Outcome::Ignored }
    }
}

fn is_older(incoming: Option<DateTime<Utc>>, held: Option<DateTime<Utc>>) -> bool {
    matches!((incoming, held), (Some(i), Some(h)) if i < h)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnknownChat {
    Reload,
    Drop,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ReloadTicket {
    generation: u64,
}

#[derive(Debug, Default)]
struct ReloadState {
    generation: u64,
    in_flight: Option<u64>,
    queued: VecDeque<RealtimeEvent>,
}

pub struct ChatStore {
    local_user_id: String,
    chats: Vec<Chat>,
    /// Server timestamp of the newest message seen per chat.
    message_versions: HashMap<String, DateTime<Utc>>,
    board: BudgetBoard,
    reload: ReloadState,
    notifier: broadcast::Sender<StoreUpdate>,
}

impl ChatStore {
    pub fn new(local_user_id: impl Into<String>) -> Self {
        let (notifier, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            local_user_id: local_user_id.into(),
            chats: Vec::new(),
            message_versions: HashMap::new(),
            board: BudgetBoard::default(),
            reload: ReloadState::default(),
            notifier,
        }
    }

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    pub fn chat(&self, id: &str) -> Option<&Chat> {
        self.chats.iter().find(|c| c.id == id)
    }

    pub fn board(&self) -> &BudgetBoard {
        &self.board
    }

    pub fn total_unread(&self) -> u32 {
        self.chats.iter().map(|c| c.unread_count).sum()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreUpdate> {
        self.notifier.subscribe()
    }

    fn notify(&self, update: StoreUpdate) {
        // no subscribers is fine
        let _ = self.notifier.send(update);
    }

    fn position(&self, chat_id: &str) -> Option<usize> {
        self.chats.iter().position(|c| c.id == chat_id)
    }

    /// Replace the chat list with a fresh server copy.
    pub fn replace_chats(&mut self, chats: Vec<Chat>) {
        let mut seen = HashSet::new();
        self.chats = chats.into_iter().filter(|c| seen.insert(c.id.clone())).collect();
        self.message_versions = self
            .chats
            .iter()
            .filter_map(|c| c.last_message_at.map(|t| (c.id.clone(), t)))
            .collect();
        for chat in &self.chats {
            if let Some(budget) = &chat.budget {
                self.board.fold(&budget.service_id, budget.price, Some(budget.status), budget.updated_at);
            }
        }
        self.notify(StoreUpdate::ChatsReplaced);
    }

    pub fn replace_board(&mut self, board: BudgetBoard) {
        let services: HashSet<String> = board
            .pending
            .iter()
            .chain(board.received.iter())
            .chain(self.board.pending.iter())
            .chain(self.board.received.iter())
            .cloned()
            .collect();
        self.board = board;
        for service_id in services {
            self.notify(StoreUpdate::BudgetBoardChanged { service_id });
        }
    }

    pub fn mark_pending(&mut self, service_id: &str) {
        if self.board.mark_pending(service_id) {
            self.notify(StoreUpdate::BudgetBoardChanged { service_id: service_id.to_string() });
        }
    }

    pub fn clear_budget(&mut self, service_id: &str) {
        if self.board.clear(service_id) {
            self.notify(StoreUpdate::BudgetBoardChanged { service_id: service_id.to_string() });
        }
    }

    /// The local user opened the chat.
    pub fn mark_read_locally(&mut self, chat_id: &str) {
        if let Some(idx) = self.position(chat_id) {
            let chat = &mut self.chats[idx];
            if chat.unread_count != 0 {
                chat.unread_count = 0;
                chat.last_read_at = Some(Utc::now());
                self.notify(StoreUpdate::ChatUpdated { chat_id: chat_id.to_string(), moved_to_head: false });
            }
        }
    }

    pub fn apply(&mut self, event: RealtimeEvent) -> Outcome {
        let touches_chat_list = !matches!(event, RealtimeEvent::NewBudget(_) | RealtimeEvent::Unknown { .. });
        if touches_chat_list && self.reload.in_flight.is_some() {
            debug!("Deferring {} until reload completes", event.name());
            self.reload.queued.push_back(event);
            return Outcome::Deferred;
        }
        self.apply_now(event, UnknownChat::Reload)
    }

    /// A replayed message the reload snapshot already covers.
    fn covered_by_snapshot(&self, event: &RealtimeEvent) -> bool {
        let RealtimeEvent::NewMessage(_) = event else {
            return false;
        };
        let held = event.chat_id().and_then(|id| self.message_versions.get(id)).copied();
        matches!((event.version(), held), (Some(v), Some(h)) if v <= h)
    }

    fn apply_now(&mut self, event: RealtimeEvent, unknown: UnknownChat) -> Outcome {
        let name = event.name().to_string();
        if unknown == UnknownChat::Drop && self.covered_by_snapshot(&event) {
            debug!("{name} already included in reloaded list");
            return Outcome::Duplicate;
        }
        let outcome = match event {
            RealtimeEvent::NewChat(chat) => self.on_new_chat(chat),
            RealtimeEvent::NewMessage(msg) => self.on_new_message(msg, unknown),
            RealtimeEvent::MessageRead(read) => self.on_message_read(read),
            RealtimeEvent::ChatListUpdate(update) => self.on_chat_list_update(update, unknown),
            RealtimeEvent::NewBudget(budget) => self.on_new_budget(budget),
            RealtimeEvent::Unknown { .. } => Outcome::Ignored,
        };
        match outcome {
            Outcome::Stale => warn!("Dropping stale {name} event"),
            Outcome::Ignored if unknown == UnknownChat::Drop => {
                debug!("{name} still targets an unknown chat after reload; dropped")
            }
            _ => debug!("{name} -> {outcome:?}"),
        }
        outcome
    }

    fn on_new_chat(&mut self, chat: Chat) -> Outcome {
        if self.position(&chat.id).is_some() {
            return Outcome::Duplicate;
        }
        if let Some(t) = chat.last_message_at {
            self.message_versions.insert(chat.id.clone(), t);
        }
        if let Some(budget) = chat.budget.clone() {
            self.fold_budget(&budget);
        }
        let chat_id = chat.id.clone();
        self.chats.insert(0, chat);
        self.notify(StoreUpdate::ChatInserted { chat_id });
        Outcome::Applied
    }

    fn on_new_message(&mut self, msg: NewMessage, unknown: UnknownChat) -> Outcome {
        let Some(idx) = self.position(&msg.chat_id) else {
            return match unknown {
                UnknownChat::Reload => Outcome::NeedsReload,
                UnknownChat::Drop => Outcome::Ignored,
            };
        };
        let chat = &self.chats[idx];
        if msg.message_id.is_some() && msg.message_id == chat.last_message_id {
            return Outcome::Duplicate;
        }
        if is_older(msg.created_at, self.message_versions.get(&msg.chat_id).copied()) {
            return Outcome::Stale;
        }
        if let Some(t) = msg.created_at {
            self.message_versions.insert(msg.chat_id.clone(), t);
        }

        let mut chat = self.chats.remove(idx);
        chat.last_message = Some(msg.content);
        chat.last_message_id = msg.message_id;
        chat.last_message_at = Some(msg.created_at.unwrap_or_else(Utc::now));
        if msg.sender_id != self.local_user_id {
            chat.unread_count = chat.unread_count.saturating_add(1);
        }
        self.chats.insert(0, chat);
        self.notify(StoreUpdate::ChatUpdated { chat_id: msg.chat_id, moved_to_head: idx != 0 });
        Outcome::Applied
    }

    fn on_message_read(&mut self, read: MessageRead) -> Outcome {
        if read.user_id != self.local_user_id {
            return Outcome::Ignored;
        }
        let Some(idx) = self.position(&read.chat_id) else {
            return Outcome::Ignored;
        };
        // a read receipt from before the newest message does not clear it
        if is_older(read.read_at, self.message_versions.get(&read.chat_id).copied()) {
            return Outcome::Stale;
        }
        let chat = &mut self.chats[idx];
        let was_unread = chat.unread_count != 0;
        chat.unread_count = 0;
        chat.last_read_at = Some(read.read_at.unwrap_or_else(Utc::now));
        if was_unread {
            self.notify(StoreUpdate::ChatUpdated { chat_id: read.chat_id, moved_to_head: false });
        }
        Outcome::Applied
    }

    fn on_chat_list_update(&mut self, update: ChatListUpdate, unknown: UnknownChat) -> Outcome {
        let board_outcome = self.fold_budget(&update.budget);
        let Some(chat_id) = update.chat_id().map(str::to_string) else {
            return board_outcome;
        };
        let Some(idx) = self.position(&chat_id) else {
            return match unknown {
                UnknownChat::Reload => Outcome::NeedsReload,
                UnknownChat::Drop => Outcome::Ignored,
            };
        };

        let chat = &mut self.chats[idx];
        if let Some(held) = chat.budget.as_mut() {
            if is_older(update.budget.updated_at, held.updated_at) {
                return Outcome::Stale;
            }
            patch_budget(held, update.budget);
        } else {
            chat.budget = Some(update.budget);
        }
        self.notify(StoreUpdate::ChatUpdated { chat_id, moved_to_head: false });
        Outcome::Applied
    }

    fn on_new_budget(&mut self, budget: NewBudget) -> Outcome {
        if budget.price.filter(|p| *p > 0.0).is_none() && budget.status.is_none() {
            return Outcome::Ignored;
        }
        let outcome = self.board.fold(&budget.service_id, budget.price, budget.status, budget.created_at);
        if outcome == Outcome::Applied {
            self.notify(StoreUpdate::BudgetBoardChanged { service_id: budget.service_id });
        }
        outcome
    }

    fn fold_budget(&mut self, budget: &Budget) -> Outcome {
        let outcome = self.board.fold(&budget.service_id, budget.price, Some(budget.status), budget.updated_at);
        if outcome == Outcome::Applied {
            self.notify(StoreUpdate::BudgetBoardChanged { service_id: budget.service_id.clone() });
        }
        outcome
    }

    /// Start a reload unless one is already running.
    pub fn begin_reload(&mut self) -> Option<ReloadTicket> {
        if self.reload.in_flight.is_some() {
            return None;
        }
        self.reload.generation += 1;
        self.reload.in_flight = Some(self.reload.generation);
        Some(ReloadTicket { generation: self.reload.generation })
    }

    pub fn is_reloading(&self) -> bool {
        self.reload.in_flight.is_some()
    }

    /// Commit a reload and replay the events queued behind it.
    /// Returns false when the ticket is not the one in flight.
    pub fn complete_reload(&mut self, ticket: ReloadTicket, chats: Vec<Chat>) -> bool {
        if self.reload.in_flight != Some(ticket.generation) {
            warn!("Ignoring result of superseded reload #{}", ticket.generation);
            return false;
        }
        self.replace_chats(chats);
        self.finish_reload();
        true
    }

    /// The reload failed; keep the last-known list and replay the queue on it.
    pub fn abort_reload(&mut self, ticket: ReloadTicket) {
        if self.reload.in_flight == Some(ticket.generation) {
            self.finish_reload();
        }
    }

    fn finish_reload(&mut self) {
        self.reload.in_flight = None;
        let queued: Vec<RealtimeEvent> = self.reload.queued.drain(..).collect();
        for event in queued {
            self.apply_now(event, UnknownChat::Drop);
        }
    }
}

fn patch_budget(held: &mut Budget, incoming: Budget) {
    if held.id != incoming.id {
        *held = incoming;
        return;
    }
    held.status = incoming.status;
    if incoming.price.is_some() {
        held.price = incoming.price;
    }
    if incoming.expires_at.is_some() {
        held.expires_at = incoming.expires_at;
    }
    if incoming.updated_at.is_some() {
        held.updated_at = incoming.updated_at;
    }
}

/// `ChatStore` behind a lock, shared between the socket loop and screens.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<RwLock<ChatStore>>,
    notifier: broadcast::Sender<StoreUpdate>,
}

impl SharedStore {
    pub fn new(store: ChatStore) -> Self {
        let notifier = store.notifier.clone();
        Self { inner: Arc::new(RwLock::new(store)), notifier }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreUpdate> {
        self.notifier.subscribe()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, ChatStore> {
        self.inner.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, ChatStore> {
        self.inner.write().await
    }

    pub async fn apply(&self, event: RealtimeEvent) -> Outcome {
        self.inner.write().await.apply(event)
    }

    pub async fn chats(&self) -> Vec<Chat> {
        self.inner.read().await.chats().to_vec()
    }

    pub async fn board(&self) -> BudgetBoard {
        self.inner.read().await.board().clone()
    }
}
