// Metric critic: a deterministic `Critic` that scores variants from simple
// statistics, so a run needs no external scoring service.
//
// Metrics (all over the variant's events, window-relative):
// - density:        events per window step.
// - repetition:     share of events whose pitch already occurred, 0..=1.
// - rhythm_entropy: Shannon entropy of onset steps, normalized by log2(n).
// - range / polyphony violation counts, as the validator defines them.
// - style_compliance: starts at 1 and loses up to 0.1 for off-level
//   velocities, up to 0.05 for off-grid onsets, and up to 0.1 for distance
//   from the target density. Empty variants get 0.5.
//
// Score (clamped to 0..=100):
//   50 - 10*range - 15*polyphony + 20*style + 10*entropy
//   + 10 if repetition is in [0.2, 0.4], - 5 if above 0.6
//   + 5 if density is within 0.2 of the target
//   + 3 per distinct track used.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chipforge_protocol::{CritiqueRequest, Metrics, ScoreRecord, Variant, Window};

use crate::collaborator::Critic;
use crate::constraints::ConstraintModel;
use crate::error::CollaboratorError;
use crate::validator::count_polyphony;

#[derive(Clone, Debug)]
pub struct MetricCritic {
    constraints: ConstraintModel,
}

impl MetricCritic {
    pub fn new(constraints: ConstraintModel) -> Self {
        MetricCritic { constraints }
    }

    /// Target density in events per step for a window.
    fn target_density(&self, window: &Window) -> f64 {
        if window.is_empty() {
            return 0.0;
        }
        self.constraints.soft().target_density_per_bar / window.len() as f64
    }

    pub fn compute_metrics(&self, variant: &Variant, window: &Window) -> Metrics {
        let events = &variant.events;
        let len = window.len();
        let density = if len > 0 {
            events.len() as f64 / len as f64
        } else {
            0.0
        };
        let range_violations = events
            .iter()
            .filter(|e| {
                self.constraints
                    .pitch_range(&e.track)
                    .is_some_and(|r| !r.contains(e.pitch))
            })
            .count() as u32;

        Metrics {
            density,
            repetition: repetition(variant),
            rhythm_entropy: rhythm_entropy(variant, len),
            range_violations,
            polyphony_violations: count_polyphony(events, &self.constraints),
            style_compliance: self.style_compliance(variant, window, density),
        }
    }

    fn style_compliance(&self, variant: &Variant, window: &Window, density: f64) -> f64 {
        let events = &variant.events;
        if events.is_empty() {
            return 0.5;
        }
        let n = events.len() as f64;
        let mut score = 1.0;

        let off_level = events
            .iter()
            .filter(|e| !self.constraints.is_allowed_velocity(e.velocity))
            .count() as f64;
        score -= 0.1 * (off_level / n);

        let grid = self.constraints.soft().prefer_step_grid.max(1);
        let off_grid = events.iter().filter(|e| e.start_step % grid != 0).count() as f64;
        score -= 0.05 * (off_grid / n);

        let distance = (density - self.target_density(window)).abs();
        score -= 0.1 * distance.min(1.0);

        score.clamp(0.0, 1.0)
    }

    pub fn score_from_metrics(&self, metrics: &Metrics, variant: &Variant, window: &Window) -> f64 {
        let mut score = 50.0;
        score -= metrics.range_violations as f64 * 10.0;
        score -= metrics.polyphony_violations as f64 * 15.0;
        score += metrics.style_compliance * 20.0;

        if (0.2..=0.4).contains(&metrics.repetition) {
            score += 10.0;
        } else if metrics.repetition > 0.6 {
            score -= 5.0;
        }

        score += metrics.rhythm_entropy * 10.0;

        if (metrics.density - self.target_density(window)).abs() < 0.2 {
            score += 5.0;
        }

        score += variant.tracks().len() as f64 * 3.0;
        score.clamp(0.0, 100.0)
    }

    pub fn evaluate(&self, variant: &Variant, window: &Window) -> ScoreRecord {
        let metrics = self.compute_metrics(variant, window);
        let passed = metrics.total_violations() == 0;
        ScoreRecord {
            variant_id: variant.id.clone(),
            score: self.score_from_metrics(&metrics, variant, window),
            passed_hard_constraints: passed,
            reasons: reasons(&metrics, passed),
            metrics,
        }
    }
}

#[async_trait]
impl Critic for MetricCritic {
    fn name(&self) -> &str {
        "metric"
    }

    async fn score(&self, request: &CritiqueRequest) -> Result<ScoreRecord, CollaboratorError> {
        Ok(self.evaluate(&request.variant, &request.window))
    }
}

fn repetition(variant: &Variant) -> f64 {
    let events = &variant.events;
    if events.len() < 2 {
        return 0.0;
    }
    let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
    for e in events {
        *counts.entry(e.pitch).or_default() += 1;
    }
    let repeated: usize = counts.values().map(|c| c - 1).sum();
    (repeated as f64 / events.len() as f64).min(1.0)
}

fn rhythm_entropy(variant: &Variant, window_len: u32) -> f64 {
    let events = &variant.events;
    if events.is_empty() || window_len == 0 {
        return 0.0;
    }
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for e in events {
        *counts.entry(e.start_step % window_len).or_default() += 1;
    }
    let total = events.len() as f64;
    let entropy: f64 = counts
        .values()
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum();
    let max = if events.len() > 1 { total.log2() } else { 1.0 };
    entropy / max
}

fn reasons(metrics: &Metrics, passed: bool) -> Vec<String> {
    let mut out = Vec::new();
    if !passed {
        if metrics.range_violations > 0 {
            out.push(format!("{} range violations", metrics.range_violations));
        }
        if metrics.polyphony_violations > 0 {
            out.push(format!("{} polyphony violations", metrics.polyphony_violations));
        }
    }
    if metrics.style_compliance >= 0.8 {
        out.push("strong 8-bit style compliance".to_string());
    } else if metrics.style_compliance < 0.5 {
        out.push("weak style compliance".to_string());
    }
    if (0.2..=0.4).contains(&metrics.repetition) {
        out.push("good motif repetition".to_string());
    }
    if metrics.rhythm_entropy > 0.7 {
        out.push("high rhythmic variety".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chipforge_protocol::NoteEvent;

    fn critic() -> MetricCritic {
        MetricCritic::new(ConstraintModel::default_8bit())
    }

    fn bar() -> Window {
        Window::for_bar(0, 16)
    }

    #[test]
    fn test_empty_variant() {
        let c = critic();
        let v = Variant::new("empty", vec![]);
        let m = c.compute_metrics(&v, &bar());
        assert_eq!(m.density, 0.0);
        assert_eq!(m.repetition, 0.0);
        assert_eq!(m.rhythm_entropy, 0.0);
        assert_eq!(m.style_compliance, 0.5);
        // 50 + 0.5*20, density 0 within 0.2 of 0.5 is false.
        assert_eq!(c.score_from_metrics(&m, &v, &bar()), 60.0);
    }

    #[test]
    fn test_four_quarter_notes() {
        let c = critic();
        let v = Variant::new(
            "q",
            vec![
                NoteEvent::note("pulse1", 72, 100, 0, 4),
                NoteEvent::note("pulse1", 72, 100, 4, 4),
                NoteEvent::note("pulse1", 76, 100, 8, 4),
                NoteEvent::note("pulse1", 79, 100, 12, 4),
            ],
        );
        let m = c.compute_metrics(&v, &bar());
        assert_eq!(m.density, 0.25);
        assert_eq!(m.repetition, 0.25);
        assert!((m.rhythm_entropy - 1.0).abs() < 1e-9);
        assert_eq!(m.range_violations, 0);
        assert_eq!(m.polyphony_violations, 0);
        // Only the density distance |0.25 - 0.5| costs anything.
        assert!((m.style_compliance - 0.975).abs() < 1e-9);

        let record = c.evaluate(&v, &bar());
        // 50 + 19.5 style + 10 repetition + 10 entropy + 3 for one track.
        assert!((record.score - 92.5).abs() < 1e-9);
        assert!(record.passed_hard_constraints);
        assert!(record.reasons.contains(&"good motif repetition".to_string()));
    }

    #[test]
    fn test_violations_lower_the_score() {
        let c = critic();
        let v = Variant::new(
            "bad",
            vec![
                NoteEvent::note("triangle", 90, 100, 0, 8),
                NoteEvent::note("triangle", 40, 100, 4, 8),
            ],
        );
        let record = c.evaluate(&v, &bar());
        assert_eq!(record.metrics.range_violations, 1);
        assert_eq!(record.metrics.polyphony_violations, 1);
        assert!(!record.passed_hard_constraints);
        assert!(record.score < 60.0);
        assert_eq!(record.reasons[0], "1 range violations");
    }

    #[test]
    fn test_style_penalties() {
        let c = critic();
        let v = Variant::new(
            "off",
            vec![
                NoteEvent::note("pulse1", 72, 90, 1, 1),
                NoteEvent::note("pulse1", 74, 100, 4, 1),
            ],
        );
        let m = c.compute_metrics(&v, &bar());
        // 1 - 0.1*0.5 - 0.05*0.5 - 0.1*|0.125 - 0.5|
        assert!((m.style_compliance - 0.8875).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_critic_trait_returns_matching_id() {
        let c = critic();
        let request = CritiqueRequest {
            window: bar(),
            variant: Variant::new("x", vec![NoteEvent::note("noise", 36, 127, 0, 2)]),
        };
        let record = c.score(&request).await.unwrap();
        assert_eq!(record.variant_id.as_str(), "x");
    }
}
