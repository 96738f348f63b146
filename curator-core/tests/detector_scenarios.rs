//! End-to-end detector scenarios over realistic scene records.

use curator_core::detect::{
    DetailsCleaner, KnownPerformer, PerformerDetector, StudioDetector, TagDetector,
};
use curator_model::{DetectionSource, SceneData};

fn scene(path: &str) -> SceneData {
    SceneData {
        id: "42".into(),
        title: "Test".into(),
        file_path: path.into(),
        ..SceneData::default()
    }
}

#[test]
fn studio_detected_from_directory_component() {
    let detector = StudioDetector::new();
    let result = detector
        .detect_from_path("/videos/SeanCody/SC1234_Test.mp4", &["Sean Cody".into()])
        .expect("studio should be detected");

    assert_eq!(result.value, "Sean Cody");
    assert_eq!(result.confidence, 0.95);
    assert_eq!(result.source, DetectionSource::Path);
}

#[test]
fn performers_extracted_from_directory_name() {
    let detector = PerformerDetector::new();
    let known = vec![
        KnownPerformer::new("John Smith"),
        KnownPerformer::new("Jane Doe"),
    ];

    let results = detector.detect_from_path("/Videos/John Smith and Jane Doe/scene.mp4", &known);

    let mut names: Vec<&str> = results.iter().map(|r| r.value.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["Jane Doe", "John Smith"]);
    for result in &results {
        assert!(
            result.confidence >= 0.8,
            "expected high confidence, got {}",
            result.confidence
        );
    }
}

#[test]
fn technical_tags_for_a_4k_hour_long_scene() {
    let detector = TagDetector::new();
    let scene = SceneData {
        id: "1".into(),
        width: Some(3840),
        height: Some(2160),
        duration: Some(2100.0),
        frame_rate: Some(60.0),
        ..SceneData::default()
    };

    let results = detector.detect_technical_tags(&scene, &[]);
    let names: Vec<&str> = results.iter().map(|r| r.value.as_str()).collect();

    for expected in ["4K", "UHD", "2160p", "long", "full scene", "60fps"] {
        assert!(names.contains(&expected), "missing {expected}");
    }
    assert!(results.iter().all(|r| r.confidence >= 0.9));
}

#[test]
fn redundant_child_tags_are_filtered() {
    let detector = TagDetector::new();
    let filtered = detector.filter_redundant_tags(
        &["bareback".into(), "raw".into()],
        &["bareback".into()],
    );
    assert!(filtered.is_empty());
}

#[test]
fn details_cleaning_is_idempotent_on_realistic_markup() {
    let cleaner = DetailsCleaner::new();
    let raw = r#"<p>An <b>extended</b> cut.</p><p>More at <a href="https://example.com/x">the site</a> or email info@example.com today</p>"#;

    let once = cleaner.clean(raw);
    let twice = cleaner.clean(&once);

    assert_eq!(once, twice);
    assert!(once.contains("the site (https://example.com/x)"));
    assert!(!once.contains("info@example.com"));
    assert!(!once.contains('<'));
}

#[test]
fn unmatched_candidates_stay_below_review_thresholds() {
    let detector = PerformerDetector::new();
    let results = detector.detect_from_path(&scene("/clips/Rob North and Wes Vale.mp4").file_path, &[]);
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.confidence == 0.5));
}
