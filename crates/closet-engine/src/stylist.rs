use std::path::Path;

use base64::Engine;
use closet_contracts::analysis::{garment_type, match_summary, profile_summary};
use closet_contracts::events::{now_utc_iso, ActivityLog, ClosetEvent, ItemSource};
use closet_contracts::shopping::{search_query, shopping_links};
use closet_contracts::wardrobe::{WardrobeItem, WardrobeStatistics, WardrobeStore};
use image::ImageFormat;
use serde_json::{json, Map, Value};

use crate::client::GeminiClient;
use crate::error::StylistError;

pub const MIN_PROFILE_ITEMS: usize = 3;
pub const MIN_MATCH_ITEMS: usize = 2;

/// Wardrobe workflows on top of the classification client and the store.
///
/// Activity is recorded after the store change it describes. A failed write
/// to the activity log is logged and never turns a committed change into an
/// error.
pub struct Stylist {
    client: GeminiClient,
    store: WardrobeStore,
    activity: Option<ActivityLog>,
}

impl Stylist {
    pub fn new(client: GeminiClient, store: WardrobeStore) -> Self {
        Self {
            client,
            store,
            activity: None,
        }
    }

    pub fn with_activity(mut self, activity: ActivityLog) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn client(&self) -> &GeminiClient {
        &self.client
    }

    pub fn store(&self) -> &WardrobeStore {
        &self.store
    }

    pub fn analyze_path(&self, user_id: &str, path: &Path) -> Result<Value, StylistError> {
        let bytes = std::fs::read(path).map_err(|source| StylistError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        self.analyze_image(user_id, &bytes, &filename)
    }

    /// Classifies an image, stores it in the user's wardrobe and returns
    /// `{analysis, wardrobeItem, analyzedAt}`.
    pub fn analyze_image(
        &self,
        user_id: &str,
        bytes: &[u8],
        filename: &str,
    ) -> Result<Value, StylistError> {
        let media_type = detect_media_type(bytes, filename)?;
        let analysis = self.client.analyze(bytes, media_type)?;

        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        let image_info = object(json!({
            "filename": filename,
            "size": bytes.len(),
            "mimetype": media_type,
            "data": format!("data:{media_type};base64,{data}"),
        }));
        let item = self
            .store
            .add_item(user_id, image_info, analysis.clone())?;
        tracing::info!(user_id, item_id = item.id, media_type, "wardrobe item added");

        self.record(ClosetEvent::AnalysisCompleted {
            user_id: user_id.to_string(),
            filename: filename.to_string(),
            media_type: media_type.to_string(),
            garment_type: garment_type(&analysis).map(str::to_string),
        });
        self.record(ClosetEvent::ItemAdded {
            user_id: user_id.to_string(),
            item_id: item.id,
            source: ItemSource::Analysis,
        });

        Ok(json!({
            "analysis": analysis,
            "wardrobeItem": item,
            "analyzedAt": now_utc_iso(),
        }))
    }

    /// Stores an item whose analysis is already known, skipping the model.
    pub fn add_item(
        &self,
        user_id: &str,
        image_info: Map<String, Value>,
        analysis: Map<String, Value>,
    ) -> Result<WardrobeItem, StylistError> {
        let item = self.store.add_item(user_id, image_info, analysis)?;
        tracing::info!(user_id, item_id = item.id, "wardrobe item added manually");
        self.record(ClosetEvent::ItemAdded {
            user_id: user_id.to_string(),
            item_id: item.id,
            source: ItemSource::Manual,
        });
        Ok(item)
    }

    pub fn list_items(&self, user_id: &str) -> Result<Vec<WardrobeItem>, StylistError> {
        Ok(self.store.get_all_items(user_id)?)
    }

    pub fn toggle_favorite(&self, user_id: &str, item_id: i64) -> Result<WardrobeItem, StylistError> {
        let item = self
            .store
            .toggle_favorite(user_id, item_id)?
            .ok_or(StylistError::ItemNotFound(item_id))?;
        self.record(ClosetEvent::FavoriteToggled {
            user_id: user_id.to_string(),
            item_id,
            favorite: item.favorite,
        });
        Ok(item)
    }

    pub fn delete_item(&self, user_id: &str, item_id: i64) -> Result<(), StylistError> {
        if !self.store.delete_item(user_id, item_id)? {
            return Err(StylistError::ItemNotFound(item_id));
        }
        self.record(ClosetEvent::ItemDeleted {
            user_id: user_id.to_string(),
            item_id,
        });
        Ok(())
    }

    pub fn clear_wardrobe(&self, user_id: &str) -> Result<usize, StylistError> {
        let removed = self.store.clear_wardrobe(user_id)?;
        tracing::info!(user_id, removed, "wardrobe cleared");
        self.record(ClosetEvent::WardrobeCleared {
            user_id: user_id.to_string(),
            removed,
        });
        Ok(removed)
    }

    pub fn statistics(&self, user_id: &str) -> Result<WardrobeStatistics, StylistError> {
        Ok(self.store.get_statistics(user_id)?)
    }

    /// `{profile, statistics, itemCount, generatedAt}`; needs at least three
    /// items.
    pub fn generate_style_profile(&self, user_id: &str) -> Result<Value, StylistError> {
        let items = self.store.get_all_items(user_id)?;
        if items.len() < MIN_PROFILE_ITEMS {
            return Err(StylistError::NotEnoughItems {
                required: MIN_PROFILE_ITEMS,
                found: items.len(),
            });
        }
        let summaries: Vec<Value> = items
            .iter()
            .map(|item| profile_summary(&item.analysis))
            .collect();
        let profile = self.client.generate_profile(&summaries)?;
        let statistics = self.store.get_statistics(user_id)?;

        self.record(ClosetEvent::ProfileGenerated {
            user_id: user_id.to_string(),
            item_count: items.len(),
        });
        Ok(json!({
            "profile": profile,
            "statistics": statistics,
            "itemCount": items.len(),
            "generatedAt": now_utc_iso(),
        }))
    }

    /// `{referenceItem, recommendations, generatedAt}` for one stored item.
    pub fn recommend_matches(&self, user_id: &str, item_id: i64) -> Result<Value, StylistError> {
        let reference = self
            .store
            .get_item(user_id, item_id)?
            .ok_or(StylistError::ItemNotFound(item_id))?;
        let items = self.store.get_all_items(user_id)?;
        if items.len() < MIN_MATCH_ITEMS {
            return Err(StylistError::NotEnoughItems {
                required: MIN_MATCH_ITEMS,
                found: items.len(),
            });
        }
        let candidates: Vec<Value> = items
            .iter()
            .filter(|item| item.id != reference.id)
            .map(|item| match_summary(item.id, &item.analysis))
            .collect();
        let recommendations = self
            .client
            .find_similar_items(&reference.analysis, &candidates)?;

        self.record(ClosetEvent::MatchesGenerated {
            user_id: user_id.to_string(),
            item_id,
            count: recommendations.len(),
        });
        Ok(json!({
            "referenceItem": reference,
            "recommendations": recommendations,
            "generatedAt": now_utc_iso(),
        }))
    }

    pub fn shopping_for_item(&self, user_id: &str, item_id: i64) -> Result<Value, StylistError> {
        let item = self
            .store
            .get_item(user_id, item_id)?
            .ok_or(StylistError::ItemNotFound(item_id))?;
        Ok(shopping_for_analysis(&item.analysis))
    }

    fn record(&self, event: ClosetEvent) {
        let Some(activity) = &self.activity else {
            return;
        };
        let name = event.name();
        if let Err(err) = activity.record(event) {
            tracing::warn!(
                event = name,
                path = %activity.path().display(),
                "failed to record activity: {err:#}"
            );
        }
    }
}

/// `{search_query, recommendations}` with one link per partner store.
pub fn shopping_for_analysis(analysis: &Map<String, Value>) -> Value {
    json!({
        "search_query": search_query(analysis),
        "recommendations": shopping_links(analysis),
    })
}

/// Sniffs the image content first; the extension only decides when the bytes
/// are not recognised.
pub fn detect_media_type(bytes: &[u8], filename: &str) -> Result<&'static str, StylistError> {
    let format = match image::guess_format(bytes) {
        Ok(format) => Some(format),
        Err(_) => Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(ImageFormat::from_extension),
    };
    match format {
        Some(ImageFormat::Png) => Ok("image/png"),
        Some(ImageFormat::Jpeg) => Ok("image/jpeg"),
        Some(ImageFormat::WebP) => Ok("image/webp"),
        Some(ImageFormat::Gif) => Ok("image/gif"),
        _ => Err(StylistError::UnsupportedImage(filename.to_string())),
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
