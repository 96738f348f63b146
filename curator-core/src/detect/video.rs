//! Video content analysis through the remote frame-sampling service.
//!
//! The service accepts a file path plus sampling parameters and returns
//! detected tags and per-tag timespans. Two response shapes exist: the
//! canonical `video_tag_info` layout and a legacy `json_result` layout
//! whose payload may itself arrive as a JSON-encoded string. Both parse
//! into the same internal records.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, warn};

use curator_model::{ChangeAction, ChangeField, ProposedChange, SceneData, SceneMarker};

use crate::ai::{AiClient, Usage};
use crate::config::VideoAnalysisSettings;
use crate::detect::with_ai_suffix;
use crate::error::{CuratorError, Result};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeSpan {
    pub start: f64,
    pub end: f64,
    pub confidence: f64,
}

#[derive(Clone, Debug, Default)]
pub struct VideoAnalysis {
    /// Flattened tag detections across categories.
    pub tags: Vec<(String, f64)>,
    /// Per-tag occurrence spans, already merged.
    pub timespans: Vec<(String, Vec<TimeSpan>)>,
}

#[derive(Debug)]
pub struct VideoTagDetector {
    http: reqwest::Client,
    settings: VideoAnalysisSettings,
}

impl VideoTagDetector {
    pub fn new(settings: VideoAnalysisSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.server_timeout_secs))
            .build()
            .map_err(|e| CuratorError::Config(format!("failed to build video HTTP client: {e}")))?;
        Ok(Self { http, settings })
    }

    pub async fn process_video(&self, video_path: &str) -> Result<(VideoAnalysis, Usage)> {
        let payload = json!({
            "path": video_path,
            "frame_interval": self.settings.frame_interval,
            "threshold": self.settings.threshold,
            "return_confidence": true,
            "vr_video": self.settings.vr_video,
        });

        let url = format!(
            "{}/process_video/",
            self.settings.api_base_url.trim_end_matches('/')
        );
        let response = self.http.post(&url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CuratorError::Connection(format!(
                "video analysis service returned {status}"
            )));
        }

        let body = response.text().await?;
        let usage = Usage {
            prompt_tokens: AiClient::estimate_tokens(&payload.to_string()),
            completion_tokens: AiClient::estimate_tokens(&body),
        };

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|e| CuratorError::Protocol(format!("video analysis response not JSON: {e}")))?;
        let analysis = parse_response(&parsed, self.settings.frame_interval)?;
        Ok((analysis, usage))
    }

    /// Full per-scene pass: tags plus marker reconciliation against the
    /// scene's existing markers.
    pub async fn detect(
        &self,
        scene: &SceneData,
        existing_tags: &[String],
        existing_markers: &[SceneMarker],
    ) -> Result<(Vec<ProposedChange>, Usage)> {
        if scene.file_path.is_empty() {
            return Err(CuratorError::Validation(format!(
                "scene {} has no file path for video analysis",
                scene.id
            )));
        }

        let (analysis, usage) = self.process_video(&scene.file_path).await?;

        let mut changes = self.tag_changes(&analysis, existing_tags);
        if self.settings.create_markers {
            changes.extend(self.marker_changes(&analysis, existing_markers));
        }

        debug!(
            "video analysis for scene {} produced {} changes",
            scene.id,
            changes.len()
        );
        Ok((changes, usage))
    }

    fn tag_changes(&self, analysis: &VideoAnalysis, existing_tags: &[String]) -> Vec<ProposedChange> {
        analysis
            .tags
            .iter()
            .filter(|(name, _)| !name.trim().is_empty())
            .map(|(name, confidence)| ProposedChange {
                field: ChangeField::Tags,
                action: ChangeAction::Add,
                current_value: json!(existing_tags),
                proposed_value: json!(with_ai_suffix(name)),
                confidence: *confidence,
                reason: Some("Detected from video content analysis".into()),
            })
            .collect()
    }

    fn marker_changes(
        &self,
        analysis: &VideoAnalysis,
        existing_markers: &[SceneMarker],
    ) -> Vec<ProposedChange> {
        let mut changes = Vec::new();

        let mut proposed: Vec<(f64, String, TimeSpan)> = Vec::new();
        for (tag, spans) in &analysis.timespans {
            let title = with_ai_suffix(tag);
            for span in spans {
                if span.start > 0.0 {
                    proposed.push((span.start, title.clone(), *span));
                }
            }
        }

        let new_set: HashSet<(u64, &str)> = proposed
            .iter()
            .map(|(start, title, _)| (seconds_key(*start), title.as_str()))
            .collect();

        // Existing markers the new detection no longer supports.
        for marker in existing_markers {
            if !new_set.contains(&(seconds_key(marker.seconds), marker.title.as_str())) {
                changes.push(ProposedChange {
                    field: ChangeField::Markers,
                    action: ChangeAction::Remove,
                    current_value: json!({
                        "id": marker.id,
                        "seconds": marker.seconds,
                        "title": marker.title,
                    }),
                    proposed_value: Value::Null,
                    confidence: 1.0,
                    reason: Some("Superseded by new video detection".into()),
                });
            }
        }

        let existing_set: HashSet<(u64, &str)> = existing_markers
            .iter()
            .map(|m| (seconds_key(m.seconds), m.title.as_str()))
            .collect();

        for (start, title, span) in &proposed {
            if existing_set.contains(&(seconds_key(*start), title.as_str())) {
                continue;
            }
            changes.push(ProposedChange {
                field: ChangeField::Markers,
                action: ChangeAction::Add,
                current_value: Value::Null,
                proposed_value: json!({
                    "seconds": span.start,
                    "end_seconds": span.end,
                    "title": title,
                    "tags": [title],
                }),
                confidence: span.confidence,
                reason: Some("Detected from video content analysis".into()),
            });
        }

        changes
    }
}

fn seconds_key(seconds: f64) -> u64 {
    (seconds * 1000.0).round() as u64
}

/// Merge consecutive occurrences of the same detection into continuous
/// spans. Two occurrences merge when their confidences differ by less
/// than 0.01 and the gap is within `frame_interval * 1.1`. Stable:
/// merging a merged list changes nothing.
pub fn merge_consecutive_occurrences(
    occurrences: &[TimeSpan],
    frame_interval: f64,
) -> Vec<TimeSpan> {
    if occurrences.is_empty() {
        return Vec::new();
    }

    let mut sorted = occurrences.to_vec();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut merged: Vec<TimeSpan> = Vec::new();
    for span in sorted {
        if let Some(last) = merged.last_mut() {
            let gap = span.start - last.end;
            if (last.confidence - span.confidence).abs() < 0.01
                && gap >= 0.0
                && gap <= frame_interval * 1.1
            {
                last.end = last.end.max(span.end);
                continue;
            }
        }
        merged.push(span);
    }

    merged
}

fn parse_response(body: &Value, frame_interval: f64) -> Result<VideoAnalysis> {
    let result = body
        .get("result")
        .ok_or_else(|| CuratorError::Protocol("video analysis response missing result".into()))?;

    if let Some(info) = result.get("video_tag_info") {
        return Ok(parse_video_tag_info(info, frame_interval));
    }

    if let Some(json_result) = result.get("json_result") {
        warn!("video_tag_info absent, falling back to legacy json_result shape");
        let owned;
        let json_result = match json_result {
            // The legacy shape sometimes double-encodes its payload.
            Value::String(raw) => {
                owned = serde_json::from_str::<Value>(raw).map_err(|e| {
                    CuratorError::Protocol(format!("nested json_result failed to parse: {e}"))
                })?;
                &owned
            }
            other => other,
        };
        return Ok(parse_legacy_timespans(json_result, frame_interval));
    }

    Err(CuratorError::Protocol(
        "video analysis response carries neither video_tag_info nor json_result".into(),
    ))
}

fn parse_video_tag_info(info: &Value, frame_interval: f64) -> VideoAnalysis {
    let mut analysis = VideoAnalysis::default();

    if let Some(categories) = info.get("video_tags").and_then(Value::as_object) {
        for tag_set in categories.values() {
            if let Some(names) = tag_set.as_array() {
                for name in names.iter().filter_map(Value::as_str) {
                    analysis.tags.push((name.to_string(), 0.7));
                }
            }
        }
    }

    if let Some(categories) = info.get("tag_timespans").and_then(Value::as_object) {
        for tags in categories.values() {
            let Some(tags) = tags.as_object() else {
                continue;
            };
            for (tag, frames) in tags {
                let spans = parse_spans(frames, 0.7);
                if !spans.is_empty() {
                    analysis
                        .timespans
                        .push((tag.clone(), merge_consecutive_occurrences(&spans, frame_interval)));
                }
            }
        }
    }

    analysis
}

fn parse_legacy_timespans(json_result: &Value, frame_interval: f64) -> VideoAnalysis {
    let mut analysis = VideoAnalysis::default();

    let Some(categories) = json_result.get("timespans").and_then(Value::as_object) else {
        return analysis;
    };

    for actions in categories.values() {
        let Some(actions) = actions.as_object() else {
            continue;
        };
        for (action, occurrences) in actions {
            let spans = parse_spans(occurrences, 0.5);
            if spans.is_empty() {
                continue;
            }
            let merged = merge_consecutive_occurrences(&spans, frame_interval);

            let avg_confidence =
                merged.iter().map(|s| s.confidence).sum::<f64>() / merged.len() as f64;
            analysis.tags.push((action.clone(), avg_confidence));
            analysis.timespans.push((action.clone(), merged));
        }
    }

    analysis
}

fn parse_spans(raw: &Value, default_confidence: f64) -> Vec<TimeSpan> {
    raw.as_array()
        .map(|spans| {
            spans
                .iter()
                .filter_map(|span| {
                    let start = span.get("start").and_then(Value::as_f64)?;
                    let end = span.get("end").and_then(Value::as_f64).unwrap_or(start);
                    let confidence = span
                        .get("confidence")
                        .and_then(Value::as_f64)
                        .unwrap_or(default_confidence);
                    Some(TimeSpan {
                        start,
                        end,
                        confidence,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use curator_model::{MarkerId, SceneId, TagId};

    fn span(start: f64, end: f64, confidence: f64) -> TimeSpan {
        TimeSpan {
            start,
            end,
            confidence,
        }
    }

    #[test]
    fn merge_joins_adjacent_same_confidence_spans() {
        let merged = merge_consecutive_occurrences(
            &[span(0.0, 2.0, 0.8), span(4.0, 6.0, 0.8), span(20.0, 22.0, 0.8)],
            2.0,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].start, 0.0);
        assert_eq!(merged[0].end, 6.0);
        assert_eq!(merged[1].start, 20.0);
    }

    #[test]
    fn merge_keeps_spans_with_differing_confidence() {
        let merged =
            merge_consecutive_occurrences(&[span(0.0, 2.0, 0.8), span(4.0, 6.0, 0.9)], 2.0);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn merge_is_stable() {
        let spans = [
            span(0.0, 2.0, 0.8),
            span(4.0, 6.0, 0.8),
            span(6.5, 8.0, 0.8),
            span(30.0, 31.0, 0.6),
        ];
        let once = merge_consecutive_occurrences(&spans, 2.0);
        let twice = merge_consecutive_occurrences(&once, 2.0);
        assert_eq!(once, twice);
    }

    #[test]
    fn parses_canonical_video_tag_info_shape() {
        let body = serde_json::json!({
            "result": {
                "video_tag_info": {
                    "video_tags": { "actions": ["kissing", "dancing"] },
                    "tag_timespans": {
                        "actions": {
                            "kissing": [
                                { "start": 10.0, "end": 12.0 },
                                { "start": 14.0, "end": 16.0 }
                            ]
                        }
                    }
                }
            }
        });
        let analysis = parse_response(&body, 2.0).unwrap();
        assert_eq!(analysis.tags.len(), 2);
        assert_eq!(analysis.timespans.len(), 1);
        // Both occurrences share the default confidence and sit one
        // frame apart, so they merge into a single span.
        assert_eq!(analysis.timespans[0].1.len(), 1);
        assert_eq!(analysis.timespans[0].1[0].end, 16.0);
    }

    #[test]
    fn parses_legacy_string_encoded_json_result() {
        let nested = serde_json::json!({
            "timespans": {
                "actions": {
                    "dancing": [
                        { "start": 5.0, "end": 7.0, "confidence": 0.9 }
                    ]
                }
            }
        })
        .to_string();
        let body = serde_json::json!({ "result": { "json_result": nested } });

        let analysis = parse_response(&body, 2.0).unwrap();
        assert_eq!(analysis.tags, vec![("dancing".to_string(), 0.9)]);
        assert_eq!(analysis.timespans[0].1[0].start, 5.0);
    }

    #[test]
    fn unknown_shape_is_a_protocol_error() {
        let body = serde_json::json!({ "result": { "something_else": {} } });
        assert!(matches!(
            parse_response(&body, 2.0),
            Err(CuratorError::Protocol(_))
        ));
    }

    fn detector() -> VideoTagDetector {
        VideoTagDetector::new(VideoAnalysisSettings::default()).unwrap()
    }

    #[test]
    fn tag_changes_carry_the_ai_suffix() {
        let analysis = VideoAnalysis {
            tags: vec![("kissing".into(), 0.8), ("dancing_AI".into(), 0.9)],
            timespans: vec![],
        };
        let changes = detector().tag_changes(&analysis, &["existing".into()]);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].proposed_value, "kissing_AI");
        assert_eq!(changes[1].proposed_value, "dancing_AI");
    }

    #[test]
    fn marker_diff_proposes_additions_and_removals() {
        let analysis = VideoAnalysis {
            tags: vec![],
            timespans: vec![("kissing".into(), vec![span(10.0, 14.0, 0.8)])],
        };
        let stale = SceneMarker {
            id: MarkerId::new("m1"),
            scene_id: SceneId::new("s1"),
            seconds: 99.0,
            end_seconds: None,
            title: "waving_AI".into(),
            primary_tag_id: TagId::new("t1"),
            tag_ids: vec![],
        };

        let changes = detector().marker_changes(&analysis, &[stale]);
        assert_eq!(changes.len(), 2);

        let removal = changes
            .iter()
            .find(|c| c.action == ChangeAction::Remove)
            .unwrap();
        assert_eq!(removal.current_value["title"], "waving_AI");

        let addition = changes
            .iter()
            .find(|c| c.action == ChangeAction::Add)
            .unwrap();
        assert_eq!(addition.proposed_value["title"], "kissing_AI");
        assert_eq!(addition.proposed_value["end_seconds"], 14.0);
        assert!(
            addition.proposed_value["tags"][0]
                .as_str()
                .unwrap()
                .ends_with("_AI")
        );
    }

    #[test]
    fn existing_marker_matching_detection_is_not_reproposed() {
        let analysis = VideoAnalysis {
            tags: vec![],
            timespans: vec![("kissing".into(), vec![span(10.0, 14.0, 0.8)])],
        };
        let current = SceneMarker {
            id: MarkerId::new("m1"),
            scene_id: SceneId::new("s1"),
            seconds: 10.0,
            end_seconds: Some(14.0),
            title: "kissing_AI".into(),
            primary_tag_id: TagId::new("t1"),
            tag_ids: vec![],
        };
        let changes = detector().marker_changes(&analysis, &[current]);
        assert!(changes.is_empty());
    }
}
