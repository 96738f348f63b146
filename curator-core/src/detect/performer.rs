//! Performer detection from file paths and scene metadata.
//!
//! Two phases: candidate extraction (separator splitting with an
//! ignore-word list, falling back to capitalized-run extraction) and
//! matching against known performers (exact name, exact alias, then a
//! sequence-ratio score with first/last-name bonuses).

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use curator_model::{DetectionResult, DetectionSource, SceneData};

use crate::ai::{AiClient, Usage, prompts};
use crate::error::Result;

/// Separators commonly used between names in filenames.
const SEPARATORS: [&str; 9] = [
    " and ", " & ", ", ", " - ", "_", " with ", " feat ", " ft ", " featuring ",
];

/// Format/quality noise and generic words that never belong in a name.
static IGNORE_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "scene",
        "part",
        "episode",
        "ep",
        "video",
        "clip",
        "raw",
        "hd",
        "fhd",
        "uhd",
        "4k",
        "1080p",
        "720p",
        "480p",
        "mp4",
        "avi",
        "mkv",
        "wmv",
        "mov",
        "webm",
        "compilation",
        "remastered",
        "final",
        "trailer",
        "preview",
    ]
    .into_iter()
    .collect()
});

static BRACKETS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[.*?\]").unwrap());
static PARENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(.*?\)").unwrap());
static LONG_NUMBERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{3,}").unwrap());
static DASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-_]+").unwrap());
static CAMEL_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z])([A-Z])").unwrap());

const MATCH_FLOOR: f64 = 0.6;
const UNMATCHED_CONFIDENCE: f64 = 0.5;

/// Reference data for matching: canonical name plus aliases.
#[derive(Clone, Debug, Default)]
pub struct KnownPerformer {
    pub name: String,
    pub aliases: Vec<String>,
}

impl KnownPerformer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
        }
    }

    pub fn with_aliases(name: impl Into<String>, aliases: Vec<String>) -> Self {
        Self {
            name: name.into(),
            aliases,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PerformersAnswer {
    #[serde(default)]
    performers: Vec<PerformerItem>,
}

#[derive(Debug, Deserialize)]
struct PerformerItem {
    #[serde(default)]
    name: String,
    #[serde(default = "default_ai_confidence")]
    confidence: f64,
}

fn default_ai_confidence() -> f64 {
    0.7
}

static PERFORMERS_SCHEMA: Lazy<serde_json::Value> = Lazy::new(|| {
    json!({
        "name": "performer_detection",
        "schema": {
            "type": "object",
            "properties": {
                "performers": {
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
            "required": ["performers"]
        }
    })
});

#[derive(Debug, Default)]
pub struct PerformerDetector;

impl PerformerDetector {
    pub fn new() -> Self {
        Self
    }

    /// Extract candidates from the filename and parent directory and
    /// match them against known performers.
    pub fn detect_from_path(
        &self,
        file_path: &str,
        known_performers: &[KnownPerformer],
    ) -> Vec<DetectionResult> {
        let (parent, stem) = parent_and_stem(file_path);

        let mut candidates = extract_names(&stem);
        if let Some(parent) = parent {
            candidates.extend(extract_names(&parent));
        }

        let mut seen = HashSet::new();
        let mut results = Vec::new();

        for candidate in candidates {
            if !seen.insert(candidate.to_lowercase()) {
                continue;
            }

            match self.find_full_name(&candidate, known_performers) {
                Some((full_name, confidence)) => {
                    results.push(
                        DetectionResult::new(full_name, confidence, DetectionSource::Path)
                            .with_metadata(json!({ "extracted_as": candidate })),
                    );
                }
                None if is_valid_name(&candidate) => {
                    results.push(
                        DetectionResult::new(
                            candidate,
                            UNMATCHED_CONFIDENCE,
                            DetectionSource::Path,
                        )
                        .with_metadata(json!({ "unmatched": true })),
                    );
                }
                None => {}
            }
        }

        results
    }

    /// Match a partial/alias/misspelled name against the known list.
    /// Exact name 1.0, exact alias 0.95, otherwise the best fuzzy score
    /// at or above the floor.
    pub fn find_full_name(
        &self,
        partial: &str,
        known_performers: &[KnownPerformer],
    ) -> Option<(String, f64)> {
        let partial = partial.trim();
        let partial_lower = partial.to_lowercase();

        for performer in known_performers {
            if performer.name.to_lowercase() == partial_lower {
                return Some((performer.name.clone(), 1.0));
            }
            if performer
                .aliases
                .iter()
                .any(|alias| alias.to_lowercase() == partial_lower)
            {
                return Some((performer.name.clone(), 0.95));
            }
        }

        let mut best: Option<(String, f64)> = None;
        for performer in known_performers {
            let score = score_name_match(partial, &partial_lower, &performer.name);
            if score >= MATCH_FLOOR && best.as_ref().map(|(_, s)| score > *s).unwrap_or(true) {
                best = Some((performer.name.clone(), score));
            }
        }
        best
    }

    /// Normalize a raw name: strip marketing suffixes, fix shouty or
    /// all-lowercase casing, optionally split CamelCase compounds.
    pub fn normalize_name(&self, name: &str, split_names: bool) -> String {
        let mut normalized = name.trim().to_string();

        for suffix in ["xxx", "official", "real", "model", "actor"] {
            let cut = normalized.len().saturating_sub(suffix.len());
            if normalized.to_lowercase().ends_with(suffix) && normalized.is_char_boundary(cut) {
                normalized = normalized[..cut].trim().to_string();
            }
        }

        let has_lower = normalized.chars().any(|c| c.is_lowercase());
        let has_upper = normalized.chars().any(|c| c.is_uppercase());
        if !(has_lower && has_upper) {
            normalized = title_case(&normalized);
        }

        if split_names && !normalized.contains(' ') {
            normalized = CAMEL_BOUNDARY
                .replace_all(&normalized, "$1 $2")
                .to_string();
        }

        normalized
    }

    /// AI-backed detection constrained to the known-performer list.
    pub async fn detect_with_ai(
        &self,
        scene: &SceneData,
        known_performers: &[KnownPerformer],
        ai: &AiClient,
    ) -> Result<(Vec<DetectionResult>, Usage)> {
        let roster = known_performers
            .iter()
            .map(|p| {
                if p.aliases.is_empty() {
                    p.name.clone()
                } else {
                    format!("{} (aliases: {})", p.name, p.aliases.join(", "))
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        let extras = [("available_performers", roster)];

        let (answer, usage): (PerformersAnswer, Usage) = ai
            .analyze_scene_structured(
                prompts::PERFORMER_DETECTION_PROMPT,
                scene,
                &extras,
                &PERFORMERS_SCHEMA,
            )
            .await?;

        let results = answer
            .performers
            .into_iter()
            .filter(|item| !item.name.trim().is_empty())
            .map(|item| {
                DetectionResult::new(item.name.trim(), item.confidence, DetectionSource::Ai)
                    .with_metadata(json!({ "model": ai.model() }))
            })
            .collect();

        Ok((results, usage))
    }
}

fn parent_and_stem(file_path: &str) -> (Option<String>, String) {
    let parts: Vec<&str> = file_path
        .split(['/', '\\'])
        .filter(|p| !p.is_empty())
        .collect();
    let stem = parts
        .last()
        .map(|name| {
            name.rsplit_once('.')
                .map(|(stem, _)| stem.to_string())
                .unwrap_or_else(|| name.to_string())
        })
        .unwrap_or_default();
    let parent = parts
        .len()
        .checked_sub(2)
        .and_then(|idx| parts.get(idx))
        .map(|p| p.to_string());
    (parent, stem)
}

fn clean_for_extraction(text: &str) -> String {
    let text = BRACKETS.replace_all(text, "");
    let text = PARENS.replace_all(&text, "");
    let text = LONG_NUMBERS.replace_all(&text, "");
    DASHES.replace_all(&text, " ").to_string()
}

fn extract_names(text: &str) -> Vec<String> {
    let cleaned = clean_for_extraction(text);

    let with_separators = extract_with_separators(&cleaned);
    if !with_separators.is_empty() {
        return with_separators;
    }
    extract_capitalized(&cleaned)
}

fn split_case_insensitive<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if !text.is_ascii() {
        // Lowercasing can change byte offsets outside ASCII; fall back
        // to an exact split.
        return text.split(separator).collect();
    }
    let lower = text.to_lowercase();
    let sep = separator.to_lowercase();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut search = 0;
    while let Some(found) = lower[search..].find(&sep) {
        let at = search + found;
        parts.push(&text[start..at]);
        start = at + sep.len();
        search = start;
    }
    parts.push(&text[start..]);
    parts
}

fn extract_with_separators(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut names = Vec::new();
    for separator in SEPARATORS {
        if !lower.contains(separator) {
            continue;
        }
        for part in split_case_insensitive(text, separator) {
            if let Some(name) = clean_name(part) {
                names.push(name);
            }
        }
    }
    names
}

fn extract_capitalized(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut run: Vec<&str> = Vec::new();

    for word in text.split_whitespace() {
        let capitalized = word.chars().next().is_some_and(|c| c.is_uppercase());
        if capitalized && !IGNORE_WORDS.contains(word.to_lowercase().as_str()) {
            run.push(word);
        } else if !run.is_empty() {
            let name = run.join(" ");
            if is_valid_name(&name) {
                names.push(name);
            }
            run.clear();
        }
    }

    if !run.is_empty() {
        let name = run.join(" ");
        if is_valid_name(&name) {
            names.push(name);
        }
    }

    names
}

fn clean_name(name: &str) -> Option<String> {
    let filtered: Vec<&str> = name
        .split_whitespace()
        .filter(|word| !IGNORE_WORDS.contains(word.to_lowercase().as_str()))
        .collect();

    if filtered.is_empty() {
        return None;
    }

    let cleaned = filtered.join(" ");
    is_valid_name(&cleaned).then_some(cleaned)
}

fn is_valid_name(name: &str) -> bool {
    if name.len() < 2 || name.len() > 50 {
        return false;
    }
    if !name.chars().any(|c| c.is_alphabetic()) {
        return false;
    }
    let digits = name.chars().filter(|c| c.is_ascii_digit()).count();
    digits <= name.len() / 2
}

fn score_name_match(partial: &str, partial_lower: &str, name: &str) -> f64 {
    let name_lower = name.to_lowercase();
    let mut score = strsim::normalized_levenshtein(partial_lower, &name_lower);

    if partial_lower.contains(&name_lower) || name_lower.contains(partial_lower) {
        score = score.max(0.8);
    }

    let name_parts: Vec<&str> = name.split_whitespace().collect();
    let partial_parts: Vec<&str> = partial.split_whitespace().collect();
    if let (Some(first_name), Some(first_partial)) = (name_parts.first(), partial_parts.first())
        && first_name.eq_ignore_ascii_case(first_partial)
    {
        score = score.max(0.7);
    }
    if name_parts.len() > 1
        && partial_parts.len() > 1
        && name_parts
            .last()
            .zip(partial_parts.last())
            .is_some_and(|(a, b)| a.eq_ignore_ascii_case(b))
    {
        score = score.max(0.75);
    }

    score
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known() -> Vec<KnownPerformer> {
        vec![
            KnownPerformer::new("John Smith"),
            KnownPerformer::with_aliases("Jane Doe", vec!["JD".into(), "Janie".into()]),
        ]
    }

    #[test]
    fn directory_names_split_on_and() {
        let detector = PerformerDetector::new();
        let results =
            detector.detect_from_path("/Videos/John Smith and Jane Doe/scene.mp4", &known());

        let names: Vec<&str> = results.iter().map(|r| r.value.as_str()).collect();
        assert!(names.contains(&"John Smith"));
        assert!(names.contains(&"Jane Doe"));
        for result in &results {
            assert!(result.confidence >= 0.8, "{result:?}");
        }
    }

    #[test]
    fn alias_match_scores_just_below_exact() {
        let detector = PerformerDetector::new();
        let (name, confidence) = detector.find_full_name("janie", &known()).unwrap();
        assert_eq!(name, "Jane Doe");
        assert_eq!(confidence, 0.95);
    }

    #[test]
    fn fuzzy_match_requires_floor() {
        let detector = PerformerDetector::new();
        assert!(detector.find_full_name("Zxq Wvu", &known()).is_none());

        let (name, confidence) = detector.find_full_name("Jon Smith", &known()).unwrap();
        assert_eq!(name, "John Smith");
        assert!(confidence >= 0.6);
    }

    #[test]
    fn unmatched_valid_candidates_kept_at_half_confidence() {
        let detector = PerformerDetector::new();
        let results = detector.detect_from_path("/clips/Alex Turner and Sam Reed.mp4", &[]);
        assert_eq!(results.len(), 2);
        for result in results {
            assert_eq!(result.confidence, 0.5);
        }
    }

    #[test]
    fn ignore_words_and_numbers_are_stripped() {
        let detector = PerformerDetector::new();
        let results = detector.detect_from_path("/x/John Smith scene 1080p.mp4", &known());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].value, "John Smith");
    }

    #[test]
    fn name_validation_bounds() {
        assert!(!is_valid_name("a"));
        assert!(!is_valid_name("12345"));
        assert!(!is_valid_name(&"x".repeat(51)));
        assert!(is_valid_name("Jane Doe"));
    }

    #[test]
    fn normalize_handles_case_and_camel_case() {
        let detector = PerformerDetector::new();
        assert_eq!(detector.normalize_name("JANE DOE", false), "Jane Doe");
        assert_eq!(detector.normalize_name("JaneDoe", true), "Jane Doe");
        assert_eq!(detector.normalize_name("Jane Doe xxx", false), "Jane Doe");
    }
}
