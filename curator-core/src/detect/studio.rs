//! Studio detection from file paths and scene metadata.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use curator_model::{DetectionResult, DetectionSource, SceneData};

use crate::ai::{AiClient, Usage, prompts};
use crate::error::{CuratorError, Result};

/// Pattern table carried over from years of scraper heuristics. Custom
/// entries can be registered at runtime.
static DEFAULT_PATTERNS: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("Sean Cody", r"sean[\s_-]?cody|sc\d{4}"),
        ("Men.com", r"men\.com|men\s+\-|^\s*men\s+"),
        ("Lucas Entertainment", r"lucas[\s_-]?entertainment"),
        ("Corbin Fisher", r"corbin[\s_-]?fisher|cf[\s_-]?\d+"),
        ("Bel Ami", r"bel[\s_-]?ami|belami"),
        ("Falcon Studios", r"falcon[\s_-]?studios?"),
        ("Raging Stallion", r"raging[\s_-]?stallion"),
        ("Hot House", r"hot[\s_-]?house"),
        ("Naked Sword", r"naked[\s_-]?sword|nakedsword"),
        ("Treasure Island Media", r"treasure[\s_-]?island|tim[\s_-]?\d+"),
        ("OnlyFans", r"onlyfans|only[\s_-]?fans"),
        ("JustForFans", r"justforfans|just[\s_-]?for[\s_-]?fans|jff"),
        ("FanCentro", r"fancentro|fan[\s_-]?centro"),
        ("Amateur", r"amateur|homemade|self[\s_-]?made"),
        ("Independent", r"independent|indie"),
    ]
});

const AI_PROPOSAL_THRESHOLD: f64 = 0.85;

#[derive(Debug, Deserialize)]
struct StudioAnswer {
    #[serde(default)]
    studio: String,
    #[serde(default = "default_ai_confidence")]
    confidence: f64,
}

fn default_ai_confidence() -> f64 {
    0.5
}

static STUDIO_SCHEMA: Lazy<serde_json::Value> = Lazy::new(|| {
    json!({
        "name": "studio_detection",
        "schema": {
            "type": "object",
            "properties": {
                "studio": { "type": "string" },
                "confidence": { "type": "number" }
            },
            "required": ["studio"]
        }
    })
});

#[derive(Debug)]
pub struct StudioDetector {
    patterns: Vec<(String, Regex)>,
}

impl Default for StudioDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl StudioDetector {
    pub fn new() -> Self {
        let patterns = DEFAULT_PATTERNS
            .iter()
            .map(|(studio, pattern)| {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .unwrap_or_else(|_| unreachable!("built-in pattern {pattern} is valid"));
                (studio.to_string(), regex)
            })
            .collect();
        Self { patterns }
    }

    /// Register an additional pattern. Invalid expressions fail fast.
    pub fn add_custom_pattern(&mut self, studio: impl Into<String>, pattern: &str) -> Result<()> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| CuratorError::Validation(format!("invalid studio pattern: {e}")))?;
        self.patterns.push((studio.into(), regex));
        Ok(())
    }

    fn pattern_match(&self, file_path: &str, known_studios: &[String]) -> Option<DetectionResult> {
        let (directories, filename) = split_path(file_path);

        for (studio, pattern) in &self.patterns {
            let known = known_studios.iter().any(|k| k.eq_ignore_ascii_case(studio));

            if pattern.is_match(&filename) {
                let confidence = if known { 0.9 } else { 0.8 };
                return Some(
                    DetectionResult::new(studio.clone(), confidence, DetectionSource::Pattern)
                        .with_metadata(json!({ "pattern": pattern.as_str() })),
                );
            }

            for part in &directories {
                if pattern.is_match(part) {
                    let confidence = if known { 0.85 } else { 0.75 };
                    return Some(
                        DetectionResult::new(studio.clone(), confidence, DetectionSource::Pattern)
                            .with_metadata(json!({
                                "pattern": pattern.as_str(),
                                "matched_in": "directory",
                            })),
                    );
                }
            }
        }

        None
    }

    fn known_studio_match(
        &self,
        file_path: &str,
        known_studios: &[String],
    ) -> Option<DetectionResult> {
        let (directories, filename) = split_path(file_path);
        let path_norm = normalize(file_path);
        let filename_norm = normalize(&filename);

        for studio in known_studios {
            let studio_norm = normalize(studio);
            if studio_norm.is_empty() {
                continue;
            }

            // Punctuation-insensitive comparison so "Sean Cody" matches a
            // "SeanCody" directory component.
            let confidence = if directories.iter().any(|d| normalize(d) == studio_norm) {
                0.95
            } else if filename_norm.contains(&studio_norm) {
                0.85
            } else if path_norm.contains(&studio_norm) {
                0.75
            } else {
                continue;
            };

            return Some(
                DetectionResult::new(studio.clone(), confidence, DetectionSource::Path)
                    .with_metadata(json!({ "match_type": "exact" })),
            );
        }

        None
    }

    /// Heuristic detection only: patterns and known-studio path matching,
    /// best confidence wins.
    pub fn detect_from_path(
        &self,
        file_path: &str,
        known_studios: &[String],
    ) -> Option<DetectionResult> {
        if file_path.is_empty() {
            return None;
        }

        let pattern = self.pattern_match(file_path, known_studios);
        let known = self.known_studio_match(file_path, known_studios);

        match (pattern, known) {
            (Some(a), Some(b)) => Some(if b.confidence >= a.confidence { b } else { a }),
            (a, b) => a.or(b),
        }
    }

    /// Delegate to the AI service, constrained to the known-studio list.
    pub async fn detect_with_ai(
        &self,
        scene: &SceneData,
        known_studios: &[String],
        ai: &AiClient,
    ) -> Result<(Option<DetectionResult>, Usage)> {
        let extras = [("available_studios", known_studios.join("\n"))];
        let (answer, usage): (StudioAnswer, Usage) = ai
            .analyze_scene_structured(
                prompts::STUDIO_DETECTION_PROMPT,
                scene,
                &extras,
                &STUDIO_SCHEMA,
            )
            .await?;

        let studio = answer.studio.trim();
        if studio.is_empty() || studio.eq_ignore_ascii_case("unknown") {
            return Ok((None, usage));
        }

        let result = DetectionResult::new(studio, answer.confidence, DetectionSource::Ai)
            .with_metadata(json!({ "model": ai.model() }));
        Ok((Some(result), usage))
    }

    /// Full detection pass: heuristics first, AI only when the heuristic
    /// answer is missing or weak, higher confidence wins.
    pub async fn detect(
        &self,
        scene: &SceneData,
        known_studios: &[String],
        ai: Option<&AiClient>,
    ) -> Result<(Option<DetectionResult>, Usage)> {
        let heuristic = self.detect_from_path(&scene.file_path, known_studios);

        if let Some(result) = &heuristic
            && result.confidence >= AI_PROPOSAL_THRESHOLD
        {
            return Ok((heuristic, Usage::default()));
        }

        let Some(ai) = ai else {
            return Ok((heuristic, Usage::default()));
        };

        let (ai_result, usage) = self.detect_with_ai(scene, known_studios, ai).await?;
        debug!(
            "studio detection: heuristic={:?} ai={:?}",
            heuristic.as_ref().map(|r| &r.value),
            ai_result.as_ref().map(|r| &r.value)
        );

        let best = match (heuristic, ai_result) {
            (Some(h), Some(a)) => Some(if a.confidence > h.confidence { a } else { h }),
            (h, a) => h.or(a),
        };
        Ok((best, usage))
    }
}

fn split_path(file_path: &str) -> (Vec<String>, String) {
    let parts: Vec<&str> = file_path
        .split(['/', '\\'])
        .filter(|p| !p.is_empty())
        .collect();
    let filename = parts
        .last()
        .map(|name| {
            name.rsplit_once('.')
                .map(|(stem, _)| stem.to_string())
                .unwrap_or_else(|| name.to_string())
        })
        .unwrap_or_default();
    let directories = parts
        .iter()
        .take(parts.len().saturating_sub(1))
        .map(|p| p.to_string())
        .collect();
    (directories, filename)
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_studio_directory_component_wins() {
        let detector = StudioDetector::new();
        let result = detector
            .detect_from_path("/videos/SeanCody/SC1234_Test.mp4", &["Sean Cody".into()])
            .unwrap();
        assert_eq!(result.value, "Sean Cody");
        assert_eq!(result.confidence, 0.95);
        assert_eq!(result.source, DetectionSource::Path);
    }

    #[test]
    fn filename_pattern_matches_unknown_studio_lower() {
        let detector = StudioDetector::new();
        let result = detector
            .detect_from_path("/videos/misc/cf_0412.mp4", &[])
            .unwrap();
        assert_eq!(result.value, "Corbin Fisher");
        assert_eq!(result.confidence, 0.8);
        assert_eq!(result.source, DetectionSource::Pattern);
    }

    #[test]
    fn directory_pattern_is_lower_confidence_than_filename() {
        let detector = StudioDetector::new();
        let result = detector
            .detect_from_path("/videos/Falcon Studios/scene_one.mp4", &["Falcon Studios".into()])
            .unwrap();
        // Normalized directory component matches the known studio exactly.
        assert_eq!(result.confidence, 0.95);
    }

    #[test]
    fn no_match_returns_none() {
        let detector = StudioDetector::new();
        assert!(
            detector
                .detect_from_path("/videos/untitled/clip.mp4", &["Sean Cody".into()])
                .is_none()
        );
    }

    #[test]
    fn invalid_custom_pattern_fails_fast() {
        let mut detector = StudioDetector::new();
        let result = detector.add_custom_pattern("Broken", "([unclosed");
        assert!(matches!(result, Err(CuratorError::Validation(_))));
    }

    #[test]
    fn custom_pattern_participates_in_detection() {
        let mut detector = StudioDetector::new();
        detector
            .add_custom_pattern("Example Films", r"exfi[\s_-]?\d+")
            .unwrap();
        let result = detector
            .detect_from_path("/library/exfi_77.mp4", &[])
            .unwrap();
        assert_eq!(result.value, "Example Films");
    }
}
