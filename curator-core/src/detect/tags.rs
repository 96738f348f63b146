//! Tag detection: deterministic technical tags, AI suggestions, and
//! redundancy filtering against a parent/child hierarchy.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::json;

use curator_model::{DetectionResult, DetectionSource, SceneData};

use crate::ai::{AiClient, Usage, prompts};
use crate::error::Result;

/// Parent tag -> more specific child spellings. A proposed child is
/// redundant when its parent is present, and a proposed parent is
/// redundant when any of its children already is.
static TAG_HIERARCHY: Lazy<HashMap<&'static str, Vec<&'static str>>> = Lazy::new(|| {
    HashMap::from([
        ("bareback", vec!["raw", "no condom"]),
        ("threesome", vec!["3way", "three way"]),
        ("foursome", vec!["4way", "four way"]),
        ("group", vec!["orgy", "gangbang"]),
        ("amateur", vec!["homemade", "self made"]),
        ("muscle", vec!["muscular", "jock", "bodybuilder"]),
        ("outdoor", vec!["outdoors", "public"]),
        ("fetish", vec!["kink", "bdsm"]),
    ])
});

/// Minimum resolution (width, height) -> tags, checked highest first.
const RESOLUTION_TAGS: [((i32, i32), &[&str]); 5] = [
    ((3840, 2160), &["4K", "UHD", "2160p"]),
    ((2560, 1440), &["2K", "1440p", "QHD"]),
    ((1920, 1080), &["1080p", "Full HD", "FHD"]),
    ((1280, 720), &["720p", "HD"]),
    ((854, 480), &["480p", "SD"]),
];

/// Duration buckets in seconds, half-open `[min, max)`.
const DURATION_TAGS: [((f64, f64), &[&str]); 5] = [
    ((0.0, 300.0), &["short", "quickie"]),
    ((300.0, 900.0), &["medium length"]),
    ((900.0, 1800.0), &["standard length"]),
    ((1800.0, 3600.0), &["long", "full scene"]),
    ((3600.0, f64::INFINITY), &["feature length", "compilation"]),
];

const RESOLUTION_CONFIDENCE: f64 = 0.95;
const DURATION_CONFIDENCE: f64 = 0.9;
const FRAMERATE_CONFIDENCE: f64 = 0.95;

#[derive(Debug, Deserialize)]
struct TagsAnswer {
    #[serde(default)]
    tags: Vec<TagItem>,
}

#[derive(Debug, Deserialize)]
struct TagItem {
    #[serde(default)]
    name: String,
    #[serde(default = "default_ai_confidence")]
    confidence: f64,
}

fn default_ai_confidence() -> f64 {
    0.8
}

static TAGS_SCHEMA: Lazy<serde_json::Value> = Lazy::new(|| {
    json!({
        "name": "tag_suggestions",
        "schema": {
            "type": "object",
            "properties": {
                "tags": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "confidence": { "type": "number" }
                        },
                        "required": ["name"]
                    }
                }
            },
            "required": ["tags"]
        }
    })
});

#[derive(Debug, Default)]
pub struct TagDetector;

impl TagDetector {
    pub fn new() -> Self {
        Self
    }

    /// Deterministic tags derived from the primary file's technical
    /// properties.
    pub fn detect_technical_tags(
        &self,
        scene: &SceneData,
        existing_tags: &[String],
    ) -> Vec<DetectionResult> {
        let existing: HashSet<String> = existing_tags.iter().map(|t| t.to_lowercase()).collect();
        let mut results = Vec::new();

        let width = scene.width.unwrap_or(0);
        let height = scene.height.unwrap_or(0);
        for ((min_width, min_height), tags) in RESOLUTION_TAGS {
            if width >= min_width && height >= min_height {
                for tag in tags {
                    if !existing.contains(&tag.to_lowercase()) {
                        results.push(
                            DetectionResult::new(
                                *tag,
                                RESOLUTION_CONFIDENCE,
                                DetectionSource::Technical,
                            )
                            .with_metadata(json!({
                                "type": "resolution",
                                "width": width,
                                "height": height,
                            })),
                        );
                    }
                }
                break; // highest matching bucket only
            }
        }

        let duration = scene.duration.unwrap_or(0.0);
        if duration > 0.0 {
            for ((min, max), tags) in DURATION_TAGS {
                if duration >= min && duration < max {
                    for tag in tags {
                        if !existing.contains(&tag.to_lowercase()) {
                            results.push(
                                DetectionResult::new(
                                    *tag,
                                    DURATION_CONFIDENCE,
                                    DetectionSource::Technical,
                                )
                                .with_metadata(json!({
                                    "type": "duration",
                                    "seconds": duration,
                                })),
                            );
                        }
                    }
                    break;
                }
            }
        }

        let frame_rate = scene.frame_rate.unwrap_or(0.0);
        if frame_rate >= 60.0 && !existing.contains("60fps") {
            results.push(
                DetectionResult::new("60fps", FRAMERATE_CONFIDENCE, DetectionSource::Technical)
                    .with_metadata(json!({ "type": "framerate", "fps": frame_rate })),
            );
        }

        results
    }

    /// Drop proposals that duplicate or are made redundant by existing
    /// tags: an existing parent absorbs proposed children, and existing
    /// children absorb a proposed parent.
    pub fn filter_redundant_tags(&self, proposed: &[String], existing: &[String]) -> Vec<String> {
        let existing_lower: HashSet<String> = existing.iter().map(|t| t.to_lowercase()).collect();
        let mut filtered = Vec::new();

        for tag in proposed {
            let tag_lower = tag.to_lowercase();

            if existing_lower.contains(&tag_lower) {
                continue;
            }

            let child_of_existing = existing_lower.iter().any(|present| {
                TAG_HIERARCHY
                    .get(present.as_str())
                    .is_some_and(|children| children.iter().any(|c| c.eq_ignore_ascii_case(&tag_lower)))
            });
            if child_of_existing {
                continue;
            }

            let parent_of_existing = TAG_HIERARCHY
                .get(tag_lower.as_str())
                .is_some_and(|children| {
                    children
                        .iter()
                        .any(|c| existing_lower.contains(&c.to_lowercase()))
                });
            if parent_of_existing {
                continue;
            }

            filtered.push(tag.clone());
        }

        filtered
    }

    fn filter_redundant_results(
        &self,
        results: Vec<DetectionResult>,
        existing_tags: &[String],
    ) -> Vec<DetectionResult> {
        let proposed: Vec<String> = results.iter().map(|r| r.value.clone()).collect();
        let kept: HashSet<String> = self
            .filter_redundant_tags(&proposed, existing_tags)
            .into_iter()
            .collect();
        results.into_iter().filter(|r| kept.contains(&r.value)).collect()
    }

    /// AI suggestions constrained to the available-tag set, already
    /// de-duplicated against the scene's existing tags and the hierarchy.
    pub async fn detect_with_ai(
        &self,
        scene: &SceneData,
        existing_tags: &[String],
        available_tags: &[String],
        ai: &AiClient,
    ) -> Result<(Vec<DetectionResult>, Usage)> {
        let extras = [
            (
                "tags",
                if existing_tags.is_empty() {
                    "None".to_string()
                } else {
                    existing_tags.join(", ")
                },
            ),
            ("available_tags", available_tags.join(", ")),
        ];

        let (answer, usage): (TagsAnswer, Usage) = ai
            .analyze_scene_structured(prompts::TAG_SUGGESTION_PROMPT, scene, &extras, &TAGS_SCHEMA)
            .await?;

        let existing_lower: HashSet<String> =
            existing_tags.iter().map(|t| t.to_lowercase()).collect();

        let results: Vec<DetectionResult> = answer
            .tags
            .into_iter()
            .filter(|item| {
                let name = item.name.trim();
                !name.is_empty() && !existing_lower.contains(&name.to_lowercase())
            })
            .map(|item| {
                DetectionResult::new(item.name.trim(), item.confidence, DetectionSource::Ai)
                    .with_metadata(json!({ "model": ai.model() }))
            })
            .collect();

        Ok((self.filter_redundant_results(results, existing_tags), usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn technical_scene() -> SceneData {
        SceneData {
            id: "1".into(),
            width: Some(3840),
            height: Some(2160),
            duration: Some(2100.0),
            frame_rate: Some(60.0),
            ..SceneData::default()
        }
    }

    #[test]
    fn four_k_scene_gets_resolution_duration_and_framerate_tags() {
        let detector = TagDetector::new();
        let results = detector.detect_technical_tags(&technical_scene(), &[]);
        let names: Vec<&str> = results.iter().map(|r| r.value.as_str()).collect();

        for expected in ["4K", "UHD", "2160p", "long", "full scene", "60fps"] {
            assert!(names.contains(&expected), "missing {expected} in {names:?}");
        }
        for result in &results {
            assert!(result.confidence >= 0.9);
        }
    }

    #[test]
    fn only_highest_resolution_bucket_applies() {
        let detector = TagDetector::new();
        let results = detector.detect_technical_tags(&technical_scene(), &[]);
        let names: Vec<&str> = results.iter().map(|r| r.value.as_str()).collect();
        assert!(!names.contains(&"1080p"));
        assert!(!names.contains(&"720p"));
    }

    #[test]
    fn existing_tags_are_not_reproposed() {
        let detector = TagDetector::new();
        let results =
            detector.detect_technical_tags(&technical_scene(), &["4k".into(), "60FPS".into()]);
        let names: Vec<&str> = results.iter().map(|r| r.value.as_str()).collect();
        assert!(!names.contains(&"4K"));
        assert!(!names.contains(&"60fps"));
        assert!(names.contains(&"UHD"));
    }

    #[test]
    fn child_of_existing_parent_is_redundant() {
        let detector = TagDetector::new();
        let filtered = detector.filter_redundant_tags(
            &["bareback".into(), "raw".into()],
            &["bareback".into()],
        );
        assert!(filtered.is_empty());
    }

    #[test]
    fn parent_with_existing_child_is_redundant() {
        let detector = TagDetector::new();
        let filtered =
            detector.filter_redundant_tags(&["group".into()], &["orgy".into(), "4K".into()]);
        assert!(filtered.is_empty());
    }

    #[test]
    fn unrelated_tags_pass_the_filter() {
        let detector = TagDetector::new();
        let filtered = detector.filter_redundant_tags(
            &["outdoor".into(), "60fps".into()],
            &["amateur".into()],
        );
        assert_eq!(filtered, vec!["outdoor".to_string(), "60fps".to_string()]);
    }

    #[test]
    fn zero_duration_produces_no_duration_tag() {
        let detector = TagDetector::new();
        let scene = SceneData {
            id: "1".into(),
            width: Some(1280),
            height: Some(720),
            duration: Some(0.0),
            ..SceneData::default()
        };
        let results = detector.detect_technical_tags(&scene, &[]);
        assert!(results.iter().all(|r| r.value != "short"));
    }
}
