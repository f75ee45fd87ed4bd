// Critique output: score records, metric breakdowns, and hints.
//
// A `ScoreRecord` is what the critique collaborator returns for one variant.
// Scores live on a 0..=100 scale. `passed_hard_constraints` is advisory on
// the wire; the pipeline overwrites it with its own validator's verdict.
//
// `Hint`s flow the other way: the feedback synthesizer emits them and the
// generator receives them on retry. `code` carries the rule or metric name
// so a generator can react without parsing the message text.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{TrackId, VariantId};

/// Metric breakdown for one variant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Events per window step.
    pub density: f64,
    /// Share of repeated pitches, 0..=1.
    pub repetition: f64,
    /// Normalized onset entropy, 0..=1.
    pub rhythm_entropy: f64,
    pub range_violations: u32,
    #[serde(default)]
    pub polyphony_violations: u32,
    #[serde(default = "full_compliance")]
    pub style_compliance: f64,
}

impl Metrics {
    pub fn total_violations(&self) -> u32 {
        self.range_violations + self.polyphony_violations
    }
}

fn full_compliance() -> f64 {
    1.0
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub variant_id: VariantId,
    pub score: f64,
    pub passed_hard_constraints: bool,
    pub metrics: Metrics,
    #[serde(default)]
    pub reasons: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintPriority {
    Low,
    Medium,
    High,
}

impl fmt::Display for HintPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HintPriority::Low => "low",
            HintPriority::Medium => "medium",
            HintPriority::High => "high",
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintTarget {
    pub track: Option<TrackId>,
    pub bar_index: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
    pub priority: HintPriority,
    /// Rule or metric name the hint is about (`"range_violation"`,
    /// `"low_density"`, ...).
    pub code: String,
    pub message: String,
    pub target: Option<HintTarget>,
}

impl Hint {
    /// True if this hint targets `track` (or all tracks).
    pub fn applies_to(&self, track: &TrackId) -> bool {
        match self.target.as_ref().and_then(|t| t.track.as_ref()) {
            Some(t) => t == track,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(HintPriority::High > HintPriority::Medium);
        assert!(HintPriority::Medium > HintPriority::Low);
    }

    #[test]
    fn test_metrics_defaults_from_partial_json() {
        let m: Metrics = serde_json::from_str(
            r#"{"density":0.5,"repetition":0.25,"rhythm_entropy":0.9,"range_violations":0}"#,
        )
        .unwrap();
        assert_eq!(m.polyphony_violations, 0);
        assert_eq!(m.style_compliance, 1.0);
    }

    #[test]
    fn test_hint_applies_to() {
        let all = Hint {
            priority: HintPriority::Low,
            code: "low_density".into(),
            message: "add events".into(),
            target: None,
        };
        let pulse = Hint {
            target: Some(HintTarget {
                track: Some("pulse1".into()),
                bar_index: Some(2),
            }),
            ..all.clone()
        };
        assert!(all.applies_to(&"noise".into()));
        assert!(pulse.applies_to(&"pulse1".into()));
        assert!(!pulse.applies_to(&"noise".into()));
    }
}
