//! Prompt templates and placeholder substitution.
//!
//! Substitution never fails: placeholders with no value render as empty
//! strings, and unrecognized placeholders pass through untouched.

use curator_model::SceneData;

pub const STUDIO_DETECTION_PROMPT: &str = r#"
Analyze the following scene information and identify the production studio.

File path: {file_path}
Title: {title}
Details: {details}
Current studio: {studio}

Available Studios:
{available_studios}

Based on the file path, title, and scene details, determine the studio
(the production company that created this content).

IMPORTANT: You MUST only select a studio from the "Available Studios" list above.
If you cannot confidently match to any studio in the list, return "Unknown".

Consider common studio naming patterns in file paths and titles.
Match variations like abbreviations, domains, or partial names to the full
studio names in the list.

Format your response as JSON:
{
  "studio": "Studio Name",
  "confidence": 0.9
}
"#;

pub const PERFORMER_DETECTION_PROMPT: &str = r#"
Extract performer names from the following scene information.

File path: {file_path}
Title: {title}
Details: {details}
Current performers: {performers}

Available Performers:
{available_performers}

Identify all performers in this scene. Look for:
1. Names in the file path (often separated by dashes, underscores, or "and")
2. Names mentioned in the title
3. Names in the description/details

IMPORTANT: Match detected names against the "Available Performers" list above.
The list includes performer names and their aliases in the format:
"Name (aliases: alias1, alias2)". Match any variation, nickname, or alias
to the official performer name.

Return a JSON list of performers with confidence scores:
{
  "performers": [
    {"name": "Performer Name 1", "confidence": 0.95},
    {"name": "Performer Name 2", "confidence": 0.85}
  ]
}

Note: Use the official performer name from the list, not the detected variation.
"#;

pub const TAG_SUGGESTION_PROMPT: &str = r#"
Suggest relevant tags for this scene.

File path: {file_path}
Title: {title}
Details: {details}
Current studio: {studio}
Current tags: {tags}
Duration: {duration} seconds
Resolution: {resolution}

Available Tags:
{available_tags}

Suggest appropriate content tags based on:
1. Technical aspects (resolution, duration)
2. Content type inferred from title/path/details
3. Studio style and typical content

IMPORTANT: You MUST only suggest tags from the "Available Tags" list above.
Do NOT create new tags or suggest tags not in the list.

Avoid:
- Tags already present in "Current tags"
- Tags that don't match the scene content
- Generic tags when more specific ones apply

Return a JSON list of suggested tags with confidence:
{
  "tags": [
    {"name": "tag1", "confidence": 0.9},
    {"name": "tag2", "confidence": 0.85}
  ]
}
"#;

/// Fill scene placeholders in a template. Extra placeholders (e.g. the
/// available-entity lists) are supplied by the caller.
pub fn render_prompt(template: &str, scene: &SceneData, extras: &[(&str, String)]) -> String {
    let mut rendered = template
        .replace("{file_path}", &scene.file_path)
        .replace("{title}", &scene.title)
        .replace("{details}", scene.details.as_deref().unwrap_or(""))
        .replace(
            "{studio}",
            scene
                .studio
                .as_ref()
                .map(|s| s.name.as_str())
                .unwrap_or(""),
        )
        .replace("{performers}", &scene.performer_names().join(", "))
        .replace("{tags}", &scene.tag_names().join(", "))
        .replace(
            "{duration}",
            &scene
                .duration
                .map(|d| format!("{d:.0}"))
                .unwrap_or_default(),
        )
        .replace("{resolution}", &scene.resolution_label());

    for (key, value) in extras {
        rendered = rendered.replace(&format!("{{{key}}}"), value);
    }

    rendered
}

/// Compose one prompt covering several scenes; the response is expected
/// to be a JSON object keyed by scene identifier.
pub fn render_batch_prompt(
    template: &str,
    scenes: &[SceneData],
    extras: &[(&str, String)],
) -> String {
    let mut parts = vec![
        "Analyze the following scenes and provide results in JSON format. \
         Return a JSON object with scene IDs as keys."
            .to_string(),
        String::new(),
    ];

    for (idx, scene) in scenes.iter().enumerate() {
        parts.push(format!("Scene {} (ID: {}):", idx + 1, scene.id));
        parts.push(render_prompt(template, scene, extras));
        parts.push(String::new());
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use curator_model::EntityRef;

    fn scene() -> SceneData {
        SceneData {
            id: "1".into(),
            title: "Title".into(),
            file_path: "/videos/a.mp4".into(),
            width: Some(1920),
            height: Some(1080),
            duration: Some(600.0),
            studio: Some(EntityRef::new("9", "Example Studio")),
            ..SceneData::default()
        }
    }

    #[test]
    fn missing_fields_render_empty() {
        let rendered = render_prompt("d={details} p={performers}", &scene(), &[]);
        assert_eq!(rendered, "d= p=");
    }

    #[test]
    fn extras_and_scene_fields_substitute() {
        let rendered = render_prompt(
            "{file_path} {resolution} {available_tags}",
            &scene(),
            &[("available_tags", "4K, HD".to_string())],
        );
        assert_eq!(rendered, "/videos/a.mp4 1920x1080 4K, HD");
    }

    #[test]
    fn unknown_placeholders_pass_through() {
        let rendered = render_prompt("{not_a_field}", &scene(), &[]);
        assert_eq!(rendered, "{not_a_field}");
    }

    #[test]
    fn batch_prompt_lists_scene_ids() {
        let rendered = render_batch_prompt("{title}", &[scene()], &[]);
        assert!(rendered.contains("Scene 1 (ID: 1):"));
        assert!(rendered.contains("Title"));
    }
}
