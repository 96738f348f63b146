//! Normalization of Catalog GraphQL payloads into the local data model.
//!
//! All access goes through `serde_json::Value` so unknown fields are
//! ignored rather than rejected. Identifiers become strings, the 0-100
//! rating scale becomes 0-5, and fingerprint arrays are flattened onto
//! the file record.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use curator_model::{EntityRef, RemoteFile, RemoteMarker, RemotePerformer, RemoteScene, RemoteStudio, RemoteTag};

pub fn parse_datetime(raw: Option<&Value>) -> Option<DateTime<Utc>> {
    let text = raw?.as_str()?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    // Timestamps sometimes arrive without an offset.
    if let Ok(parsed) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(parsed.and_utc());
    }
    // Scene dates are plain calendar dates.
    if let Ok(parsed) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return parsed.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    None
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn id_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// The Catalog reports ratings 0-100; internally we keep 0-5.
pub fn normalize_rating(value: &Value) -> Option<i32> {
    value
        .get("rating100")
        .and_then(Value::as_i64)
        .map(|r| (r / 20) as i32)
        .or_else(|| value.get("rating").and_then(Value::as_i64).map(|r| r as i32))
}

fn entity_ref(value: &Value) -> Option<EntityRef> {
    let id = id_field(value, "id")?;
    let name = string_field(value, "name").unwrap_or_default();
    Some(EntityRef { id, name })
}

fn entity_refs(value: &Value, key: &str) -> Vec<EntityRef> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(entity_ref).collect())
        .unwrap_or_default()
}

pub fn transform_file(value: &Value) -> Option<RemoteFile> {
    let id = id_field(value, "id")?;
    let path = string_field(value, "path")?;

    let mut file = RemoteFile {
        id,
        path,
        size: value.get("size").and_then(Value::as_i64),
        width: value.get("width").and_then(Value::as_i64).map(|w| w as i32),
        height: value.get("height").and_then(Value::as_i64).map(|h| h as i32),
        duration: value.get("duration").and_then(Value::as_f64),
        frame_rate: value.get("frame_rate").and_then(Value::as_f64),
        bit_rate: value.get("bit_rate").and_then(Value::as_i64),
        video_codec: string_field(value, "video_codec"),
        phash: None,
        oshash: None,
    };

    if let Some(fingerprints) = value.get("fingerprints").and_then(Value::as_array) {
        for print in fingerprints {
            let kind = print.get("type").and_then(Value::as_str);
            let fingerprint = string_field(print, "value");
            match kind {
                Some("phash") => file.phash = fingerprint,
                Some("oshash") => file.oshash = fingerprint,
                _ => {}
            }
        }
    }

    Some(file)
}

fn transform_marker(value: &Value) -> Option<RemoteMarker> {
    let id = id_field(value, "id")?;
    Some(RemoteMarker {
        id,
        seconds: value.get("seconds").and_then(Value::as_f64).unwrap_or(0.0),
        end_seconds: value.get("end_seconds").and_then(Value::as_f64),
        title: string_field(value, "title").unwrap_or_default(),
        primary_tag_id: value
            .get("primary_tag")
            .and_then(|tag| id_field(tag, "id")),
        tag_ids: value
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| tags.iter().filter_map(|t| id_field(t, "id")).collect())
            .unwrap_or_default(),
    })
}

pub fn transform_scene(value: &Value) -> Option<RemoteScene> {
    let id = id_field(value, "id")?;

    Some(RemoteScene {
        id,
        title: string_field(value, "title").unwrap_or_default(),
        details: string_field(value, "details"),
        url: string_field(value, "url"),
        date: parse_datetime(value.get("date")),
        rating: normalize_rating(value),
        organized: value
            .get("organized")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        created_at: parse_datetime(value.get("created_at")),
        updated_at: parse_datetime(value.get("updated_at")),
        files: value
            .get("files")
            .and_then(Value::as_array)
            .map(|files| files.iter().filter_map(transform_file).collect())
            .unwrap_or_default(),
        performers: entity_refs(value, "performers"),
        tags: entity_refs(value, "tags"),
        studio: value.get("studio").and_then(entity_ref),
        markers: value
            .get("scene_markers")
            .and_then(Value::as_array)
            .map(|markers| markers.iter().filter_map(transform_marker).collect())
            .unwrap_or_default(),
    })
}

pub fn transform_performer(value: &Value) -> Option<RemotePerformer> {
    let id = id_field(value, "id")?;
    let aliases = match value.get("alias_list") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        // Older Catalog versions report a comma-separated string.
        Some(Value::String(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    Some(RemotePerformer {
        id,
        name: string_field(value, "name").unwrap_or_default(),
        aliases,
        url: string_field(value, "url"),
        details: string_field(value, "details"),
        rating: normalize_rating(value),
        favorite: value
            .get("favorite")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        updated_at: parse_datetime(value.get("updated_at")),
    })
}

fn first_parent_id(value: &Value, key: &str) -> Option<String> {
    match value.get(key) {
        Some(Value::Array(items)) => items.first().and_then(|p| id_field(p, "id")),
        Some(parent @ Value::Object(_)) => id_field(parent, "id"),
        _ => None,
    }
}

pub fn transform_tag(value: &Value) -> Option<RemoteTag> {
    let id = id_field(value, "id")?;
    Some(RemoteTag {
        id,
        name: string_field(value, "name").unwrap_or_default(),
        description: string_field(value, "description"),
        parent_id: first_parent_id(value, "parent_id"),
        updated_at: parse_datetime(value.get("updated_at")),
    })
}

pub fn transform_studio(value: &Value) -> Option<RemoteStudio> {
    let id = id_field(value, "id")?;
    Some(RemoteStudio {
        id,
        name: string_field(value, "name").unwrap_or_default(),
        url: string_field(value, "url"),
        details: string_field(value, "details"),
        rating: normalize_rating(value),
        parent_id: first_parent_id(value, "parent_studio"),
        updated_at: parse_datetime(value.get("updated_at")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scene_normalization_flattens_files_and_scales_rating() {
        let raw = json!({
            "id": 42,
            "title": "Test Scene",
            "rating100": 80,
            "organized": true,
            "updated_at": "2024-03-01T12:00:00Z",
            "files": [{
                "id": "9",
                "path": "/videos/test.mp4",
                "width": 3840,
                "height": 2160,
                "duration": 1800.5,
                "frame_rate": 59.94,
                "fingerprints": [
                    {"type": "phash", "value": "abc"},
                    {"type": "oshash", "value": "def"},
                    {"type": "md5", "value": "ignored"}
                ]
            }],
            "performers": [{"id": "1", "name": "John Smith"}],
            "studio": {"id": "7", "name": "Example"},
            "unknown_future_field": {"nested": true}
        });

        let scene = transform_scene(&raw).unwrap();
        assert_eq!(scene.id, "42");
        assert_eq!(scene.rating, Some(4));
        let file = scene.primary_file().unwrap();
        assert_eq!(file.phash.as_deref(), Some("abc"));
        assert_eq!(file.oshash.as_deref(), Some("def"));
        assert_eq!(scene.performers[0].name, "John Smith");
        assert_eq!(scene.studio.as_ref().unwrap().id, "7");
    }

    #[test]
    fn date_only_timestamps_parse() {
        let parsed = parse_datetime(Some(&json!("2024-03-01"))).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-03-01T00:00:00+00:00");
    }

    #[test]
    fn performer_aliases_accept_both_wire_shapes() {
        let from_list = transform_performer(&json!({
            "id": "1", "name": "A", "alias_list": ["B", "C"]
        }))
        .unwrap();
        assert_eq!(from_list.aliases, vec!["B", "C"]);

        let from_string = transform_performer(&json!({
            "id": "1", "name": "A", "alias_list": "B, C"
        }))
        .unwrap();
        assert_eq!(from_string.aliases, vec!["B", "C"]);
    }

    #[test]
    fn missing_id_is_rejected() {
        assert!(transform_scene(&json!({"title": "no id"})).is_none());
    }
}
