//! Scene description cleanup.
//!
//! Strips HTML while keeping paragraph breaks and inline links (rendered
//! `text (href)`), decodes entities, drops bare URLs and email
//! addresses, collapses whitespace, guarantees terminal punctuation, and
//! truncates to 500 characters at a sentence boundary. The whole pass is
//! idempotent: cleaning already-clean text is a no-op.

use once_cell::sync::Lazy;
use regex::Regex;

use curator_model::{DetectionResult, DetectionSource, SceneData};

pub const MAX_DESCRIPTION_CHARS: usize = 500;

static LINK_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#).unwrap()
});
static BREAK_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static PARAGRAPH_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</p\s*>").unwrap());
static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static LINKED_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((https?://[^\s()]+)\)").unwrap());
static BARE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").unwrap());
static EMAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S+@\S+").unwrap());
static PARAGRAPH_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]*\n[\s]*").unwrap());
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());

const PLACEHOLDER_OPEN: char = '\u{e000}';
const PLACEHOLDER_CLOSE: char = '\u{e001}';

#[derive(Debug, Default)]
pub struct DetailsCleaner;

impl DetailsCleaner {
    pub fn new() -> Self {
        Self
    }

    /// Propose a cleaned description when it differs from the current
    /// one. Clean text passes through silently.
    pub fn propose(&self, scene: &SceneData) -> Option<DetectionResult> {
        let current = scene.details.as_deref()?;
        if current.is_empty() {
            return None;
        }

        let cleaned = self.clean(current);
        if cleaned == current {
            return None;
        }

        Some(DetectionResult::new(
            cleaned,
            1.0,
            DetectionSource::Metadata,
        ))
    }

    pub fn clean(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        let text = strip_html(text);
        let text = decode_entities(&text);
        let text = remove_urls_and_emails(&text);
        let text = collapse_whitespace(&text);
        let text = ensure_terminal_punctuation(text);
        truncate_at_sentence(&text, MAX_DESCRIPTION_CHARS)
    }
}

fn strip_html(text: &str) -> String {
    let text = LINK_TAG.replace_all(text, "$2 ($1)");
    let text = BREAK_TAG.replace_all(&text, "\n");
    let text = PARAGRAPH_CLOSE.replace_all(&text, "\n\n");
    ANY_TAG.replace_all(&text, "").into_owned()
}

/// Decode to a fixpoint so double-encoded input cleans the same way
/// whether it arrives raw or already half-cleaned.
fn decode_entities(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let decoded = html_escape::decode_html_entities(&current).into_owned();
        if decoded == current {
            return current;
        }
        current = decoded;
    }
}

fn remove_urls_and_emails(text: &str) -> String {
    // Hrefs rendered as "text (url)" survive; everything else goes.
    let mut protected = Vec::new();
    let shielded = LINKED_URL
        .replace_all(text, |caps: &regex::Captures<'_>| {
            protected.push(caps[1].to_string());
            format!("{PLACEHOLDER_OPEN}{}{PLACEHOLDER_CLOSE}", protected.len() - 1)
        })
        .into_owned();

    let without_emails = EMAIL.replace_all(&shielded, "");
    let without_urls = BARE_URL.replace_all(&without_emails, "").into_owned();

    let mut restored = without_urls;
    for (idx, url) in protected.iter().enumerate() {
        restored = restored.replace(
            &format!("{PLACEHOLDER_OPEN}{idx}{PLACEHOLDER_CLOSE}"),
            &format!("({url})"),
        );
    }
    restored
}

fn collapse_whitespace(text: &str) -> String {
    let text = text.replace('\r', "\n");
    let text = PARAGRAPH_BREAK.replace_all(&text, "\n\n");
    let text = SPACES.replace_all(&text, " ");
    text.split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn ensure_terminal_punctuation(mut text: String) -> String {
    if let Some(last) = text.chars().last()
        && !matches!(last, '.' | '!' | '?')
    {
        text.push('.');
    }
    text
}

fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let mut kept: Vec<&str> = Vec::new();
    let mut length = 0;
    for sentence in text.split(". ") {
        let sentence_length = sentence.chars().count() + 2;
        if length + sentence_length > max_chars {
            break;
        }
        kept.push(sentence);
        length += sentence_length;
    }

    if kept.is_empty() {
        // Single over-long sentence: hard cut below the limit.
        let cut: String = text.chars().take(max_chars - 1).collect();
        return ensure_terminal_punctuation(cut.trim_end().to_string());
    }

    ensure_terminal_punctuation(kept.join(". "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(text: &str) -> String {
        DetailsCleaner::new().clean(text)
    }

    #[test]
    fn strips_tags_and_decodes_entities() {
        assert_eq!(
            clean("<b>Tom &amp; Jerry</b> go <i>wild</i>"),
            "Tom & Jerry go wild."
        );
    }

    #[test]
    fn preserves_paragraph_breaks() {
        let cleaned = clean("<p>First paragraph.</p><p>Second paragraph.</p>");
        assert_eq!(cleaned, "First paragraph.\n\nSecond paragraph.");
    }

    #[test]
    fn renders_inline_links() {
        let cleaned = clean(r#"See <a href="https://example.com/a">the site</a> today"#);
        assert_eq!(cleaned, "See the site (https://example.com/a) today.");
    }

    #[test]
    fn removes_bare_urls_and_emails() {
        let cleaned = clean("Contact me@example.com or visit https://spam.example now");
        assert_eq!(cleaned, "Contact or visit now.");
    }

    #[test]
    fn truncates_at_sentence_boundary() {
        let sentence = "This sentence is exactly forty characters".to_string();
        let text = vec![sentence; 20].join(". ");
        let cleaned = clean(&text);
        assert!(cleaned.chars().count() <= MAX_DESCRIPTION_CHARS);
        assert!(cleaned.ends_with('.'));
        assert!(cleaned.starts_with("This sentence"));
    }

    #[test]
    fn over_long_single_sentence_is_hard_cut() {
        let text = "word ".repeat(200);
        let cleaned = clean(&text);
        assert!(cleaned.chars().count() <= MAX_DESCRIPTION_CHARS);
        assert!(cleaned.ends_with('.'));
    }

    #[test]
    fn cleaning_is_idempotent() {
        let inputs = [
            "<p>First.</p><p>Second &amp; third.</p>",
            r#"Link <a href="https://example.com">here</a> and noise https://drop.me plus me@example.com"#,
            "Tom &amp;amp; Jerry",
            "plain already-clean text.",
            &"Long sentence here. ".repeat(60),
        ];
        let cleaner = DetailsCleaner::new();
        for input in inputs {
            let once = cleaner.clean(input);
            let twice = cleaner.clean(&once);
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn clean_text_yields_no_proposal() {
        let cleaner = DetailsCleaner::new();
        let scene = SceneData {
            id: "1".into(),
            details: Some("Already clean.".into()),
            ..SceneData::default()
        };
        assert!(cleaner.propose(&scene).is_none());
    }

    #[test]
    fn html_details_yield_proposal() {
        let cleaner = DetailsCleaner::new();
        let scene = SceneData {
            id: "1".into(),
            details: Some("<b>Needs</b> cleanup".into()),
            ..SceneData::default()
        };
        let result = cleaner.propose(&scene).unwrap();
        assert_eq!(result.value, "Needs cleanup.");
        assert_eq!(result.confidence, 1.0);
    }
}
