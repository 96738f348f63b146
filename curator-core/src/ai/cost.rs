//! Token and cost accounting for AI-backed detection.
//!
//! Counters are atomics so detector tasks can charge usage concurrently;
//! readers see an eventually-consistent total. Dollar amounts are stored
//! as integer micro-USD to stay atomic-friendly.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};
use tracing::debug;

use crate::config::ModelCost;

/// Logical operations usage is tagged with.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AiOperation {
    StudioDetection,
    PerformerDetection,
    TagDetection,
    DetailsGeneration,
    VideoTagDetection,
}

impl AiOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiOperation::StudioDetection => "studio_detection",
            AiOperation::PerformerDetection => "performer_detection",
            AiOperation::TagDetection => "tag_detection",
            AiOperation::DetailsGeneration => "details_generation",
            AiOperation::VideoTagDetection => "video_tag_detection",
        }
    }

    const ALL: [AiOperation; 5] = [
        AiOperation::StudioDetection,
        AiOperation::PerformerDetection,
        AiOperation::TagDetection,
        AiOperation::DetailsGeneration,
        AiOperation::VideoTagDetection,
    ];

    fn index(&self) -> usize {
        match self {
            AiOperation::StudioDetection => 0,
            AiOperation::PerformerDetection => 1,
            AiOperation::TagDetection => 2,
            AiOperation::DetailsGeneration => 3,
            AiOperation::VideoTagDetection => 4,
        }
    }
}

/// Reported (or estimated) token counts for one call.
#[derive(Clone, Copy, Debug, Default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Per-model pricing in USD per million tokens. Unknown models fall back
/// to the cheapest default so estimates stay conservative but non-zero.
#[derive(Clone, Debug)]
pub struct CostTable {
    models: HashMap<String, ModelCost>,
}

const FALLBACK_MODEL: &str = "gpt-4o-mini";

impl Default for CostTable {
    fn default() -> Self {
        let mut models = HashMap::new();
        models.insert("gpt-4o".into(), ModelCost { input: 2.50, output: 10.00 });
        models.insert(
            "gpt-4o-mini".into(),
            ModelCost { input: 0.15, output: 0.60 },
        );
        models.insert("gpt-4".into(), ModelCost { input: 30.00, output: 60.00 });
        models.insert(
            "gpt-3.5-turbo".into(),
            ModelCost { input: 0.50, output: 1.50 },
        );
        Self { models }
    }
}

impl CostTable {
    /// Built-in table with operator overrides merged on top.
    pub fn with_overrides(overrides: &HashMap<String, ModelCost>) -> Self {
        let mut table = Self::default();
        for (model, cost) in overrides {
            table.models.insert(model.clone(), *cost);
        }
        table
    }

    pub fn cost_for(&self, model: &str, usage: &Usage) -> f64 {
        let cost = self
            .models
            .get(model)
            .or_else(|| self.models.get(FALLBACK_MODEL))
            .copied()
            .unwrap_or(ModelCost { input: 0.0, output: 0.0 });

        (usage.prompt_tokens as f64 / 1_000_000.0) * cost.input
            + (usage.completion_tokens as f64 / 1_000_000.0) * cost.output
    }
}

#[derive(Debug, Default)]
struct OperationUsage {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    cost_micros: AtomicU64,
}

/// Cumulative usage for one analysis run.
#[derive(Debug, Default)]
pub struct CostTracker {
    operations: [OperationUsage; 5],
    scenes_analyzed: AtomicU64,
    model_used: Mutex<Option<String>>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, operation: AiOperation, cost_usd: f64, usage: Usage, model: &str) {
        let slot = &self.operations[operation.index()];
        slot.prompt_tokens
            .fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        slot.completion_tokens
            .fetch_add(usage.completion_tokens, Ordering::Relaxed);
        slot.cost_micros
            .fetch_add((cost_usd * 1_000_000.0).round() as u64, Ordering::Relaxed);

        if let Ok(mut used) = self.model_used.lock()
            && used.is_none()
        {
            *used = Some(model.to_string());
        }

        debug!(
            "tracked {}: ${cost_usd:.4} ({} + {} tokens)",
            operation.as_str(),
            usage.prompt_tokens,
            usage.completion_tokens
        );
    }

    pub fn increment_scenes(&self) {
        self.scenes_analyzed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_cost(&self) -> f64 {
        self.operations
            .iter()
            .map(|op| op.cost_micros.load(Ordering::Relaxed))
            .sum::<u64>() as f64
            / 1_000_000.0
    }

    pub fn total_tokens(&self) -> (u64, u64) {
        let prompt = self
            .operations
            .iter()
            .map(|op| op.prompt_tokens.load(Ordering::Relaxed))
            .sum();
        let completion = self
            .operations
            .iter()
            .map(|op| op.completion_tokens.load(Ordering::Relaxed))
            .sum();
        (prompt, completion)
    }

    pub fn scenes_analyzed(&self) -> u64 {
        self.scenes_analyzed.load(Ordering::Relaxed)
    }

    pub fn average_cost_per_scene(&self) -> f64 {
        let scenes = self.scenes_analyzed();
        if scenes == 0 {
            0.0
        } else {
            self.total_cost() / scenes as f64
        }
    }

    /// Snapshot for plan metadata and operator cost views.
    pub fn summary(&self) -> Value {
        let (prompt, completion) = self.total_tokens();

        let mut cost_breakdown = serde_json::Map::new();
        let mut token_breakdown = serde_json::Map::new();
        for op in AiOperation::ALL {
            let slot = &self.operations[op.index()];
            let op_prompt = slot.prompt_tokens.load(Ordering::Relaxed);
            let op_completion = slot.completion_tokens.load(Ordering::Relaxed);
            cost_breakdown.insert(
                op.as_str().into(),
                json!(slot.cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0),
            );
            token_breakdown.insert(
                op.as_str().into(),
                json!({
                    "prompt": op_prompt,
                    "completion": op_completion,
                    "total": op_prompt + op_completion,
                }),
            );
        }

        json!({
            "total_cost": self.total_cost(),
            "total_tokens": prompt + completion,
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "cost_breakdown": cost_breakdown,
            "token_breakdown": token_breakdown,
            "scenes_analyzed": self.scenes_analyzed(),
            "average_cost_per_scene": self.average_cost_per_scene(),
            "model": self.model_used.lock().ok().and_then(|m| m.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_math_per_million_tokens() {
        let table = CostTable::default();
        let usage = Usage {
            prompt_tokens: 1_000_000,
            completion_tokens: 500_000,
        };
        let cost = table.cost_for("gpt-4o", &usage);
        assert!((cost - 7.50).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_uses_fallback_pricing() {
        let table = CostTable::default();
        let usage = Usage {
            prompt_tokens: 1_000_000,
            completion_tokens: 0,
        };
        assert!((table.cost_for("some-new-model", &usage) - 0.15).abs() < 1e-9);
    }

    #[test]
    fn tracker_accumulates_per_operation() {
        let tracker = CostTracker::new();
        let usage = Usage {
            prompt_tokens: 100,
            completion_tokens: 50,
        };
        tracker.track(AiOperation::TagDetection, 0.01, usage, "gpt-4o-mini");
        tracker.track(AiOperation::TagDetection, 0.02, usage, "gpt-4o-mini");
        tracker.track(AiOperation::StudioDetection, 0.005, usage, "gpt-4o-mini");
        tracker.increment_scenes();

        assert!((tracker.total_cost() - 0.035).abs() < 1e-9);
        assert_eq!(tracker.total_tokens(), (300, 150));
        assert_eq!(
            tracker.summary()["cost_breakdown"]["tag_detection"]
                .as_f64()
                .unwrap(),
            0.03
        );
    }
}
