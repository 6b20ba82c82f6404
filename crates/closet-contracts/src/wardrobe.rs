use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::analysis::garment_type;
use crate::events::now_utc_iso;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS wardrobe (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    image_info TEXT,
    analysis TEXT,
    favorite INTEGER DEFAULT 0,
    added_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_wardrobe_user ON wardrobe(user_id);
"#;

const ITEM_COLUMNS: &str = "id, user_id, image_info, analysis, favorite, added_at";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WardrobeItem {
    pub id: i64,
    pub user_id: String,
    pub image_info: Map<String, Value>,
    pub analysis: Map<String, Value>,
    pub favorite: bool,
    pub added_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WardrobeStatistics {
    pub total_items: u64,
    pub favorite_count: u64,
    pub by_type: BTreeMap<String, u64>,
}

/// Per-user wardrobe persisted in SQLite.
///
/// Every operation is scoped by `user_id`; an item owned by someone else
/// behaves exactly like a missing one.
pub struct WardrobeStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl WardrobeStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open wardrobe database {}", path.display()))?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory wardrobe")?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("failed to create wardrobe schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn add_item(
        &self,
        user_id: &str,
        image_info: Map<String, Value>,
        analysis: Map<String, Value>,
    ) -> Result<WardrobeItem> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO wardrobe (user_id, image_info, analysis, favorite, added_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![
                user_id,
                serde_json::to_string(&Value::Object(image_info))?,
                serde_json::to_string(&Value::Object(analysis))?,
                now_utc_iso(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        fetch_item(&conn, user_id, id)?
            .with_context(|| format!("wardrobe item {id} vanished after insert"))
    }

    pub fn get_all_items(&self, user_id: &str) -> Result<Vec<WardrobeItem>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM wardrobe WHERE user_id = ?1 ORDER BY id"
        ))?;
        let items = stmt
            .query_map(params![user_id], item_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    pub fn get_item(&self, user_id: &str, item_id: i64) -> Result<Option<WardrobeItem>> {
        let conn = self.lock()?;
        fetch_item(&conn, user_id, item_id)
    }

    /// Flips the favorite flag; `None` when the item does not exist for this user.
    pub fn toggle_favorite(&self, user_id: &str, item_id: i64) -> Result<Option<WardrobeItem>> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE wardrobe SET favorite = CASE WHEN favorite = 1 THEN 0 ELSE 1 END
             WHERE id = ?1 AND user_id = ?2",
            params![item_id, user_id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        fetch_item(&conn, user_id, item_id)
    }

    pub fn delete_item(&self, user_id: &str, item_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM wardrobe WHERE id = ?1 AND user_id = ?2",
            params![item_id, user_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn clear_wardrobe(&self, user_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM wardrobe WHERE user_id = ?1", params![user_id])?;
        Ok(deleted)
    }

    pub fn get_statistics(&self, user_id: &str) -> Result<WardrobeStatistics> {
        let items = self.get_all_items(user_id)?;
        let mut by_type = BTreeMap::new();
        for item in &items {
            let key = garment_type(&item.analysis).unwrap_or("unknown").to_string();
            *by_type.entry(key).or_insert(0u64) += 1;
        }
        Ok(WardrobeStatistics {
            total_items: items.len() as u64,
            favorite_count: items.iter().filter(|item| item.favorite).count() as u64,
            by_type,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("wardrobe connection lock poisoned"))
    }
}

fn fetch_item(conn: &Connection, user_id: &str, item_id: i64) -> Result<Option<WardrobeItem>> {
    let item = conn
        .query_row(
            &format!("SELECT {ITEM_COLUMNS} FROM wardrobe WHERE id = ?1 AND user_id = ?2"),
            params![item_id, user_id],
            item_from_row,
        )
        .optional()?;
    Ok(item)
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<WardrobeItem> {
    Ok(WardrobeItem {
        id: row.get(0)?,
        user_id: row.get(1)?,
        image_info: json_column(row.get::<_, Option<String>>(2)?),
        analysis: json_column(row.get::<_, Option<String>>(3)?),
        favorite: row.get::<_, Option<i64>>(4)?.unwrap_or(0) != 0,
        added_at: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
    })
}

// Rows written by older builds may hold a bare string instead of an object.
fn json_column(raw: Option<String>) -> Map<String, Value> {
    let Some(raw) = raw else {
        return Map::new();
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => map,
        Ok(Value::String(text)) => type_only(text),
        Ok(_) => Map::new(),
        Err(_) => type_only(trimmed.to_string()),
    }
}

fn type_only(text: String) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("type".to_string(), Value::String(text));
    map
}
