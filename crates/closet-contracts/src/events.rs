use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Where a wardrobe item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSource {
    Analysis,
    Manual,
}

/// Wardrobe activity worth keeping a trail of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClosetEvent {
    RunStarted {
        command: String,
        db: String,
    },
    AnalysisCompleted {
        user_id: String,
        filename: String,
        media_type: String,
        garment_type: Option<String>,
    },
    ItemAdded {
        user_id: String,
        item_id: i64,
        source: ItemSource,
    },
    FavoriteToggled {
        user_id: String,
        item_id: i64,
        favorite: bool,
    },
    ItemDeleted {
        user_id: String,
        item_id: i64,
    },
    WardrobeCleared {
        user_id: String,
        removed: usize,
    },
    ProfileGenerated {
        user_id: String,
        item_count: usize,
    },
    MatchesGenerated {
        user_id: String,
        item_id: i64,
        count: usize,
    },
}

impl ClosetEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::AnalysisCompleted { .. } => "analysis_completed",
            Self::ItemAdded { .. } => "item_added",
            Self::FavoriteToggled { .. } => "favorite_toggled",
            Self::ItemDeleted { .. } => "item_deleted",
            Self::WardrobeCleared { .. } => "wardrobe_cleared",
            Self::ProfileGenerated { .. } => "profile_generated",
            Self::MatchesGenerated { .. } => "matches_generated",
        }
    }

    /// Owner of the wardrobe the event touched; `None` for session events.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::RunStarted { .. } => None,
            Self::AnalysisCompleted { user_id, .. }
            | Self::ItemAdded { user_id, .. }
            | Self::FavoriteToggled { user_id, .. }
            | Self::ItemDeleted { user_id, .. }
            | Self::WardrobeCleared { user_id, .. }
            | Self::ProfileGenerated { user_id, .. }
            | Self::MatchesGenerated { user_id, .. } => Some(user_id.as_str()),
        }
    }
}

/// One line of the activity log: the event fields plus `session_id` and `ts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub session_id: String,
    pub ts: String,
    #[serde(flatten)]
    pub event: ClosetEvent,
}

/// Append-only JSON Lines trail of wardrobe activity for one CLI session.
///
/// The file is opened on the first write and kept open; clones share it.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    inner: Arc<ActivityLogInner>,
}

#[derive(Debug)]
struct ActivityLogInner {
    path: PathBuf,
    session_id: String,
    file: Mutex<Option<File>>,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ActivityLogInner {
                path: path.into(),
                session_id: session_id.into(),
                file: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn record(&self, event: ClosetEvent) -> Result<EventRecord> {
        let record = EventRecord {
            session_id: self.inner.session_id.clone(),
            ts: now_utc_iso(),
            event,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = self
            .inner
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("activity log lock poisoned"))?;
        if file.is_none() {
            *file = Some(self.open()?);
        }
        if let Some(handle) = file.as_mut() {
            handle
                .write_all(line.as_bytes())
                .with_context(|| format!("failed to append to {}", self.inner.path.display()))?;
        }
        Ok(record)
    }

    fn open(&self) -> Result<File> {
        let path = &self.inner.path;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open activity log {}", path.display()))
    }
}

/// Reads a whole activity log. A missing file is an empty history.
pub fn read_activity(path: &Path) -> Result<Vec<EventRecord>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(anyhow::Error::new(err).context(format!("failed to read {}", path.display())))
        }
    };
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str::<EventRecord>(line)
                .with_context(|| format!("{}:{}: invalid activity row", path.display(), idx + 1))
        })
        .collect()
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
