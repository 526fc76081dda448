use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};

use crate::api::models::{Conversation, ConversationPage};
use crate::error::Result;
use crate::inbox::InboxSnapshot;

pub fn default_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("com", "example", "InboxSync")?;
    Some(proj.data_dir().join("cache.sqlite"))
}

fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

// Last applied page, shown on start before the first refresh answers.
// Never authoritative: the next refresh replaces it.
pub struct SnapshotStore {
    conn: Connection,
}

impl SnapshotStore {
    pub fn open(path: &Path) -> Result<Self> {
        ensure_dir(path)?;
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                position INTEGER NOT NULL,
                raw_json TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS page_meta (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                total_pages INTEGER NOT NULL,
                current_page INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    pub fn save_snapshot(&mut self, snapshot: &InboxSnapshot) -> Result<()> {
        let now = Utc::now().timestamp();
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM conversations", [])?;
        for (position, conv) in snapshot.conversations.iter().enumerate() {
            let raw = serde_json::to_string(conv)?;
            tx.execute(
                "INSERT INTO conversations (id, position, raw_json, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![conv.id, position as i64, raw, now],
            )?;
        }
        tx.execute(
            r#"
            INSERT INTO page_meta (id, total_pages, current_page, updated_at)
            VALUES (0, ?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                total_pages=excluded.total_pages,
                current_page=excluded.current_page,
                updated_at=excluded.updated_at
            "#,
            params![snapshot.total_pages, snapshot.current_page, now],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn load_page(&self) -> Result<Option<ConversationPage>> {
        let meta: Option<(u32, u32)> = self
            .conn
            .query_row("SELECT total_pages, current_page FROM page_meta WHERE id = 0", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;
        let Some((total_pages, current_page)) = meta else { return Ok(None) };

        let mut stmt = self.conn.prepare("SELECT raw_json FROM conversations ORDER BY position ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut conversations = Vec::new();
        for raw in rows {
            let conv: Conversation = serde_json::from_str(&raw?)?;
            conversations.push(conv);
        }
        Ok(Some(ConversationPage { conversations, total_pages, current_page }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{Channel, Customer, CustomerStatus};
    use chrono::NaiveDate;

    fn conv(id: &str) -> Conversation {
        Conversation {
            id: id.into(),
            customer: Customer {
                id: format!("cust_{id}"),
                name: "Sofia Davis".into(),
                email: "sofia@example.com".into(),
                phone: String::new(),
                avatar_url: String::new(),
                joined: NaiveDate::from_ymd_opt(2024, 2, 20).unwrap(),
                tags: vec!["returning".into()],
                channel: Channel::Instagram,
                status: CustomerStatus::Demo,
                deal_history: vec![],
            },
            channel: Channel::Instagram,
            messages: vec![],
            unread_count: 1,
        }
    }

    #[test]
    fn empty_store_has_no_page() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::open(&dir.path().join("nested/cache.sqlite")).unwrap();
        assert!(store.load_page().unwrap().is_none());
    }

    #[test]
    fn saved_snapshot_loads_in_order_and_replaces_previous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.sqlite");
        let mut store = SnapshotStore::open(&path).unwrap();

        let mut snapshot = InboxSnapshot {
            conversations: vec![conv("c2"), conv("c1"), conv("c3")],
            selected_conversation_id: Some("c1".into()),
            loading: false,
            total_pages: 4,
            current_page: 2,
        };
        store.save_snapshot(&snapshot).unwrap();
        snapshot.conversations = vec![conv("c9"), conv("c2")];
        store.save_snapshot(&snapshot).unwrap();
        drop(store);

        let page = SnapshotStore::open(&path).unwrap().load_page().unwrap().unwrap();
        let ids: Vec<_> = page.conversations.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["c9", "c2"]);
        assert_eq!((page.total_pages, page.current_page), (4, 2));
        assert_eq!(page.conversations[1], conv("c2"));
    }
}
