//! Video detection wire-format and merge behavior across the public
//! surface.

use curator_core::detect::video::{TimeSpan, merge_consecutive_occurrences};
use curator_core::detect::with_ai_suffix;

fn span(start: f64, end: f64, confidence: f64) -> TimeSpan {
    TimeSpan {
        start,
        end,
        confidence,
    }
}

#[test]
fn merge_is_idempotent_over_noisy_detections() {
    let frame_interval = 2.0;
    let spans: Vec<TimeSpan> = (0..50)
        .map(|i| {
            let start = i as f64 * 2.0;
            // Two confidence plateaus produce exactly two merged spans.
            let confidence = if i < 25 { 0.8 } else { 0.6 };
            span(start, start + 2.0, confidence)
        })
        .collect();

    let once = merge_consecutive_occurrences(&spans, frame_interval);
    let twice = merge_consecutive_occurrences(&once, frame_interval);

    assert_eq!(once.len(), 2);
    assert_eq!(once, twice);
}

#[test]
fn merge_respects_the_gap_tolerance() {
    let frame_interval = 2.0;
    // Gap of 2.2 == frame_interval * 1.1: still merges.
    let merged = merge_consecutive_occurrences(
        &[span(0.0, 2.0, 0.8), span(4.2, 6.0, 0.8)],
        frame_interval,
    );
    assert_eq!(merged.len(), 1);

    // Just beyond the tolerance: stays split.
    let split = merge_consecutive_occurrences(
        &[span(0.0, 2.0, 0.8), span(4.3, 6.0, 0.8)],
        frame_interval,
    );
    assert_eq!(split.len(), 2);
}

#[test]
fn unsorted_input_merges_the_same_as_sorted() {
    let frame_interval = 2.0;
    let sorted = [span(0.0, 2.0, 0.8), span(4.0, 6.0, 0.8)];
    let reversed = [span(4.0, 6.0, 0.8), span(0.0, 2.0, 0.8)];

    assert_eq!(
        merge_consecutive_occurrences(&sorted, frame_interval),
        merge_consecutive_occurrences(&reversed, frame_interval)
    );
}

#[test]
fn ai_suffix_never_doubles() {
    let names = ["kissing", "kissing_AI", "_AI", "a"];
    for name in names {
        let suffixed = with_ai_suffix(name);
        assert!(suffixed.ends_with("_AI"));
        assert_eq!(with_ai_suffix(&suffixed), suffixed);
    }
}
