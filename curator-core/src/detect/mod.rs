//! Per-scene detection units.
//!
//! Every detector is a pure function over a [`SceneData`] record plus
//! caller-supplied reference data; AI-backed passes go through
//! [`crate::ai::AiClient`] and report token usage so the engine can
//! charge the cost accumulator. Detectors return results, never panic,
//! and accumulate nothing globally.

pub mod details;
pub mod performer;
pub mod studio;
pub mod tags;
pub mod video;

pub use details::DetailsCleaner;
pub use performer::{KnownPerformer, PerformerDetector};
pub use studio::StudioDetector;
pub use tags::TagDetector;
pub use video::VideoTagDetector;

/// Suffix marking tags and markers produced by video analysis.
pub const AI_TAG_SUFFIX: &str = "_AI";

/// Workflow tags driving the operator's video-analysis queue.
pub const AI_TAGME: &str = "AI_TagMe";
pub const AI_TAGGED: &str = "AI_Tagged";
pub const AI_ERRORED: &str = "AI_Errored";

/// Append the AI suffix unless the name already carries it.
pub fn with_ai_suffix(name: &str) -> String {
    if name.ends_with(AI_TAG_SUFFIX) {
        name.to_string()
    } else {
        format!("{name}{AI_TAG_SUFFIX}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ai_suffix_is_idempotent() {
        assert_eq!(with_ai_suffix("kissing"), "kissing_AI");
        assert_eq!(with_ai_suffix("kissing_AI"), "kissing_AI");
    }
}
