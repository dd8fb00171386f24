use crate::api::models::{Chat, ChatMessage, FavoriteProfessional, Professional, User};
use crate::error::{ClientError, Result};
use directories::ProjectDirs;
use log::warn;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const KEY_AUTH_TOKEN: &str = "auth_token";
const KEY_AUTH_USER: &str = "auth_user";
const KEY_FAVORITES: &str = "favorites";
const KEY_LAST_SEARCH: &str = "last_search";
const KEY_ADDRESS: &str = "address";
const KEY_ADDRESS_HISTORY: &str = "address_history";

const CHAT_HISTORY_LIMIT: usize = 200;
const ADDRESS_HISTORY_LIMIT: usize = 10;

fn default_db_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("com", "marketplace", "MarketplaceClient")?;
    Some(proj.data_dir().join("local.sqlite"))
}

fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn chat_history_key(professional_id: &str, service_id: &str) -> String {
    format!("chat:{professional_id}:{service_id}")
}

/// Device-local key-value state plus a cache of the last fetched chat list.
/// Values are JSON; anything that no longer parses reads as absent.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { path: path.into() };
        store.init()?;
        Ok(store)
    }

    pub fn open_default() -> Result<Self> {
        let path = default_db_path().ok_or_else(|| ClientError::Config("no data dir".into()))?;
        Self::open(path)
    }

    fn conn(&self) -> Result<Connection> {
        if let Err(e) = ensure_dir(&self.path) {
            warn!("Could not create {}: {e}", self.path.display());
        }
        Ok(Connection::open(&self.path)?)
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                updated_at INTEGER NOT NULL,
                raw_json TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value=excluded.value,
                updated_at=excluded.updated_at
            "#,
            params![key, value, now_secs()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get_raw(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Discarding unreadable value under {key:?}: {e}");
                Ok(None)
            }
        }
    }

    fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.put_raw(key, &serde_json::to_string(value)?)
    }

    pub fn save_auth(&self, token: &str, user: &User) -> Result<()> {
        self.put_raw(KEY_AUTH_TOKEN, token)?;
        self.put_json(KEY_AUTH_USER, user)
    }

    pub fn auth_token(&self) -> Result<Option<String>> {
        Ok(self.get_raw(KEY_AUTH_TOKEN)?.filter(|t| !t.is_empty()))
    }

    pub fn auth_user(&self) -> Result<Option<User>> {
        self.get_json(KEY_AUTH_USER)
    }

    pub fn clear_auth(&self) -> Result<()> {
        self.remove(KEY_AUTH_TOKEN)?;
        self.remove(KEY_AUTH_USER)
    }

    pub fn favorites(&self) -> Result<Vec<FavoriteProfessional>> {
        Ok(self.get_json(KEY_FAVORITES)?.unwrap_or_default())
    }

    pub fn is_favorite(&self, professional_id: &str) -> Result<bool> {
        Ok(self.favorites()?.iter().any(|f| f.id == professional_id))
    }

    /// Add or remove a professional; returns whether it is a favorite afterwards.
    pub fn toggle_favorite(&self, professional: &Professional) -> Result<bool> {
        let mut favorites = self.favorites()?;
        let before = favorites.len();
        favorites.retain(|f| f.id != professional.id);
        let now_favorite = favorites.len() == before;
        if now_favorite {
            favorites.insert(0, FavoriteProfessional::from(professional));
        }
        self.put_json(KEY_FAVORITES, &favorites)?;
        Ok(now_favorite)
    }

    pub fn last_search(&self) -> Result<Option<String>> {
        self.get_raw(KEY_LAST_SEARCH)
    }

    pub fn set_last_search(&self, query: &str) -> Result<()> {
        let query = query.trim();
        if query.is_empty() {
            self.remove(KEY_LAST_SEARCH)
        } else {
            self.put_raw(KEY_LAST_SEARCH, query)
        }
    }

    pub fn chat_history(&self, professional_id: &str, service_id: &str) -> Result<Vec<ChatMessage>> {
        Ok(self
            .get_json(&chat_history_key(professional_id, service_id))?
            .unwrap_or_default())
    }

    /// Append to the local history for (professional, service), keeping the newest messages.
    pub fn append_chat_message(&self, professional_id: &str, service_id: &str, message: &ChatMessage) -> Result<()> {
        let key = chat_history_key(professional_id, service_id);
        let mut history: Vec<ChatMessage> = self.get_json(&key)?.unwrap_or_default();
        if message.id.is_some() && history.iter().any(|m| m.id == message.id) {
            return Ok(());
        }
        history.push(message.clone());
        if history.len() > CHAT_HISTORY_LIMIT {
            let excess = history.len() - CHAT_HISTORY_LIMIT;
            history.drain(..excess);
        }
        self.put_json(&key, &history)
    }

    pub fn address(&self) -> Result<Option<String>> {
        self.get_raw(KEY_ADDRESS)
    }

    pub fn set_address(&self, address: &str) -> Result<()> {
        let address = address.trim();
        if address.is_empty() {
            return Ok(());
        }
        self.put_raw(KEY_ADDRESS, address)?;
        let mut history = self.address_history()?;
        history.retain(|a| !a.eq_ignore_ascii_case(address));
        history.insert(0, address.to_string());
        history.truncate(ADDRESS_HISTORY_LIMIT);
        self.put_json(KEY_ADDRESS_HISTORY, &history)
    }

    pub fn address_history(&self) -> Result<Vec<String>> {
        Ok(self.get_json(KEY_ADDRESS_HISTORY)?.unwrap_or_default())
    }

    // Caching chats to show the list before the first fetch completes
    pub fn upsert_chats(&self, chats: &[Chat]) -> Result<()> {
        let now = now_secs();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for (idx, c) in chats.iter().enumerate() {
            let raw = serde_json::to_string(c)?;
            // keep server order: earlier entries get the larger sort key
            let order_key = now * 10_000 + (chats.len() - idx) as i64;
            tx.execute(
                r#"
                INSERT INTO chats (id, updated_at, raw_json)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(id) DO UPDATE SET
                    updated_at=excluded.updated_at,
                    raw_json=excluded.raw_json
                "#,
                params![c.id, order_key, raw],
            )?;
        }
        // the list is authoritative: chats gone on the server leave the cache
        let keep: HashSet<&str> = chats.iter().map(|c| c.id.as_str()).collect();
        let cached: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM chats")?;
            let ids = stmt.query_map([], |row| row.get::<_, String>(0))?;
            ids.collect::<std::result::Result<_, _>>()?
        };
        for id in cached.iter().filter(|id| !keep.contains(id.as_str())) {
            tx.execute("DELETE FROM chats WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn cached_chats(&self, limit: Option<usize>) -> Result<Vec<Chat>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, raw_json FROM chats ORDER BY updated_at DESC, id ASC LIMIT ?1")?;
        let lim = limit.unwrap_or(500) as i64;
        let rows = stmt.query_map(params![lim], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let mut out = Vec::new();
        for r in rows {
            let (id, raw) = r?;
            match serde_json::from_str::<Chat>(&raw) {
                Ok(chat) => out.push(chat),
                Err(e) => warn!("Skipping unreadable cached chat {id}: {e}"),
            }
        }
        Ok(out)
    }

    pub fn clear_chat_cache(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM chats", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path().join("nested").join("local.sqlite")).unwrap();
        (dir, store)
    }

    fn pro(id: &str) -> Professional {
        Professional {
            id: id.into(),
            name: format!("Pro {id}"),
            profession: Some("Manicure".into()),
            category_id: None,
            city: None,
            bio: None,
            avatar_url: None,
            rating: Some(4.8),
            review_count: 12,
        }
    }

    fn chat(id: &str) -> Chat {
        serde_json::from_value(serde_json::json!({
            "id": id, "clientId": "u1", "professionalId": "p1", "unreadCount": 2
        }))
        .unwrap()
    }

    #[test]
    fn auth_roundtrip_and_clear() {
        let (_dir, store) = store();
        assert_eq!(store.auth_token().unwrap(), None);
        let user = User {
            id: "u1".into(),
            name: "Ana".into(),
            email: None,
            phone: None,
            role: Some("client".into()),
            avatar_url: None,
        };
        store.save_auth("tok", &user).unwrap();
        assert_eq!(store.auth_token().unwrap().as_deref(), Some("tok"));
        assert_eq!(store.auth_user().unwrap(), Some(user));
        store.clear_auth().unwrap();
        assert_eq!(store.auth_user().unwrap(), None);
    }

    #[test]
    fn unparseable_value_reads_as_absent() {
        let (_dir, store) = store();
        store.put_raw(KEY_FAVORITES, "{not json").unwrap();
        assert!(store.favorites().unwrap().is_empty());
    }

    #[test]
    fn toggle_favorite_adds_then_removes() {
        let (_dir, store) = store();
        assert!(store.toggle_favorite(&pro("p1")).unwrap());
        assert!(store.toggle_favorite(&pro("p2")).unwrap());
        assert!(store.is_favorite("p1").unwrap());
        let favs = store.favorites().unwrap();
        assert_eq!(favs[0].id, "p2");
        assert!(!store.toggle_favorite(&pro("p1")).unwrap());
        assert!(!store.is_favorite("p1").unwrap());
    }

    #[test]
    fn chat_history_is_keyed_by_professional_and_service() {
        let (_dir, store) = store();
        let msg = ChatMessage {
            id: Some("m1".into()),
            chat_id: None,
            sender_id: "u1".into(),
            content: "Oi".into(),
            sent_at: Utc::now(),
        };
        store.append_chat_message("p1", "s1", &msg).unwrap();
        store.append_chat_message("p1", "s1", &msg).unwrap();
        assert_eq!(store.chat_history("p1", "s1").unwrap().len(), 1);
        assert!(store.chat_history("p1", "s2").unwrap().is_empty());
    }

    #[test]
    fn chat_history_keeps_newest() {
        let (_dir, store) = store();
        for i in 0..(CHAT_HISTORY_LIMIT + 5) {
            let msg = ChatMessage {
                id: None,
                chat_id: None,
                sender_id: "u1".into(),
                content: format!("msg {i}"),
                sent_at: Utc::now(),
            };
            store.append_chat_message("p1", "s1", &msg).unwrap();
        }
        let history = store.chat_history("p1", "s1").unwrap();
        assert_eq!(history.len(), CHAT_HISTORY_LIMIT);
        assert_eq!(history[0].content, "msg 5");
    }

    #[test]
    fn address_history_dedupes_most_recent_first() {
        let (_dir, store) = store();
        store.set_address("Rua A, 10").unwrap();
        store.set_address("Rua B, 20").unwrap();
        store.set_address("rua a, 10").unwrap();
        assert_eq!(store.address().unwrap().as_deref(), Some("rua a, 10"));
        assert_eq!(store.address_history().unwrap(), vec!["rua a, 10", "Rua B, 20"]);
    }

    #[test]
    fn last_search_blank_clears() {
        let (_dir, store) = store();
        store.set_last_search(" eletricista ").unwrap();
        assert_eq!(store.last_search().unwrap().as_deref(), Some("eletricista"));
        store.set_last_search("").unwrap();
        assert_eq!(store.last_search().unwrap(), None);
    }

    #[test]
    fn cached_chats_preserve_order() {
        let (_dir, store) = store();
        store.upsert_chats(&[chat("b"), chat("a"), chat("c")]).unwrap();
        let ids: Vec<String> = store.cached_chats(None).unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert_eq!(store.cached_chats(Some(1)).unwrap()[0].unread_count, 2);
    }

    #[test]
    fn chats_missing_from_fresh_list_leave_cache() {
        let (_dir, store) = store();
        store.upsert_chats(&[chat("a"), chat("b")]).unwrap();
        store.upsert_chats(&[chat("b")]).unwrap();
        let ids: Vec<String> = store.cached_chats(None).unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["b"]);

        store.upsert_chats(&[]).unwrap();
        assert!(store.cached_chats(None).unwrap().is_empty());
    }
}
