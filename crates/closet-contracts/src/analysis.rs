use serde_json::{json, Map, Value};

/// Structured classification for one clothing image, as returned by the model.
///
/// Open-ended on purpose: the only key every consumer relies on is `type`.
pub type AnalysisResult = Map<String, Value>;

/// Free-form style profile generated from a whole wardrobe.
pub type StyleProfile = Map<String, Value>;

/// Keys accepted as the garment type, in priority order.
pub const GARMENT_TYPE_KEYS: [&str; 3] = ["type", "clothing_type", "itemType"];

pub fn garment_type(analysis: &Map<String, Value>) -> Option<&str> {
    GARMENT_TYPE_KEYS.iter().find_map(|key| {
        analysis
            .get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    })
}

/// Compact view of an item used when asking for a style profile.
pub fn profile_summary(analysis: &Map<String, Value>) -> Value {
    json!({
        "type": garment_type(analysis).unwrap_or("unknown"),
        "colors": colors_of(analysis),
        "style": text_or_unknown(analysis, "style"),
        "pattern": text_or_unknown(analysis, "pattern"),
    })
}

/// Compact view of a candidate item used when asking for matching pieces.
pub fn match_summary(item_id: i64, analysis: &Map<String, Value>) -> Value {
    json!({
        "id": item_id,
        "type": garment_type(analysis).unwrap_or("unknown"),
        "colors": colors_of(analysis),
        "style": text_or_unknown(analysis, "style"),
    })
}

pub fn colors_of(analysis: &Map<String, Value>) -> Vec<String> {
    match analysis.get("colors") {
        Some(Value::Array(rows)) => rows
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|color| !color.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(text)) => text
            .split(',')
            .map(str::trim)
            .filter(|color| !color.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn text_or_unknown<'a>(analysis: &'a Map<String, Value>, key: &str) -> &'a str {
    analysis
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("unknown")
}
