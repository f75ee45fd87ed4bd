// Feedback synthesizer: turns a failed attempt into hints for the next one.
//
// Hard violations become high-priority hints, one per (rule, track) with the
// occurrence count folded into the message. Soft shortfalls are read from the
// mean metrics of whatever score records the attempt produced, compared with
// the constraint set's density and repetition targets, and become low/medium
// hints. The result is ordered by priority (high first), then by
// kind (hard rules in validator order, then soft codes), then by track.
//
// Hints are advisory. The generator may ignore them and every retry is
// validated from scratch.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use chipforge_protocol::{
    Hint, HintPriority, HintTarget, RuleId, ScoreRecord, SoftConstraints, TrackId, Violation,
    Window,
};

/// Density is flagged outside [target / 2, target * 2].
const DENSITY_FACTOR: f64 = 2.0;
/// Repetition is flagged above target + 0.3 or below target - 0.2.
const REPETITION_ABOVE: f64 = 0.3;
const REPETITION_BELOW: f64 = 0.2;
const LOW_STYLE: f64 = 0.6;

/// Soft hint codes, in the order they sort after the hard rules.
const SOFT_CODES: [&str; 6] = [
    "high_density",
    "low_density",
    "high_repetition",
    "low_repetition",
    "low_style_compliance",
    "below_threshold",
];

pub fn synthesize(
    violations: &[Violation],
    records: &[ScoreRecord],
    soft: &SoftConstraints,
    window: &Window,
) -> Vec<Hint> {
    let mut hints = hard_hints(violations, window);
    hints.extend(soft_hints(records, soft, window));
    sort_hints(&mut hints);
    hints
}

/// Hint issued when the best admissible candidate scored under the
/// acceptance threshold.
pub fn below_threshold_hint(best_score: f64, threshold: f64, window: &Window) -> Hint {
    Hint {
        priority: HintPriority::Medium,
        code: "below_threshold".into(),
        message: format!(
            "best candidate scored {best_score:.1}, below the acceptance threshold of {threshold:.1}"
        ),
        target: Some(bar_target(None, window)),
    }
}

/// Stable priority/kind/track order.
pub fn sort_hints(hints: &mut [Hint]) {
    hints.sort_by(|a, b| {
        Reverse(a.priority)
            .cmp(&Reverse(b.priority))
            .then_with(|| kind_rank(&a.code).cmp(&kind_rank(&b.code)))
            .then_with(|| target_track(a).cmp(&target_track(b)))
    });
}

fn kind_rank(code: &str) -> usize {
    if let Some(i) = RuleId::ALL.iter().position(|r| r.as_str() == code) {
        return i;
    }
    match SOFT_CODES.iter().position(|c| *c == code) {
        Some(i) => RuleId::ALL.len() + i,
        None => usize::MAX,
    }
}

fn target_track(hint: &Hint) -> Option<&TrackId> {
    hint.target.as_ref().and_then(|t| t.track.as_ref())
}

fn bar_target(track: Option<TrackId>, window: &Window) -> HintTarget {
    HintTarget {
        track,
        bar_index: Some(window.bar_index),
    }
}

fn hard_hints(violations: &[Violation], window: &Window) -> Vec<Hint> {
    let mut grouped: BTreeMap<(RuleId, Option<&TrackId>), (usize, &Violation)> = BTreeMap::new();
    for v in violations {
        grouped
            .entry((v.rule, v.track.as_ref()))
            .and_modify(|(n, _)| *n += 1)
            .or_insert((1, v));
    }

    grouped
        .into_iter()
        .map(|((rule, track), (count, first))| {
            let scope = match track {
                Some(t) => format!(" on {t}"),
                None => String::new(),
            };
            let plural = if count == 1 { "" } else { "s" };
            Hint {
                priority: HintPriority::High,
                code: rule.as_str().to_string(),
                message: format!(
                    "{count} {rule} violation{plural}{scope}: {}; {}",
                    first.reason,
                    advice(rule)
                ),
                target: Some(bar_target(track.cloned(), window)),
            }
        })
        .collect()
}

fn advice(rule: RuleId) -> &'static str {
    match rule {
        RuleId::UnknownTrack => "only write to the declared tracks",
        RuleId::RangeViolation => "keep pitches inside the track's range",
        RuleId::InvalidVelocity => "use only the allowed velocity levels",
        RuleId::PolyphonyViolation => "end each note before the next one starts",
        RuleId::Overflow => "shorten notes so they end inside the window",
        RuleId::DensityExceeded => "use fewer events",
        RuleId::ContinuityViolation => "start after the previous window's last note ends",
    }
}

fn soft_hints(records: &[ScoreRecord], soft: &SoftConstraints, window: &Window) -> Vec<Hint> {
    if records.is_empty() || window.is_empty() {
        return Vec::new();
    }
    // Critic density is events per step.
    let target_density = soft.target_density_per_bar / window.len() as f64;
    let target_repetition = soft.target_repetition;
    let n = records.len() as f64;
    let mean = |f: fn(&ScoreRecord) -> f64| records.iter().map(f).sum::<f64>() / n;
    let density = mean(|r| r.metrics.density);
    let repetition = mean(|r| r.metrics.repetition);
    let style = mean(|r| r.metrics.style_compliance);

    let mut hints = Vec::new();
    let mut push = |priority, code: &str, message: String| {
        hints.push(Hint {
            priority,
            code: code.to_string(),
            message,
            target: Some(bar_target(None, window)),
        });
    };

    if density > target_density * DENSITY_FACTOR {
        push(
            HintPriority::Medium,
            "high_density",
            format!(
                "density {density:.2} events/step is well above the target {target_density:.2}; thin the pattern"
            ),
        );
    } else if density < target_density / DENSITY_FACTOR {
        push(
            HintPriority::Low,
            "low_density",
            format!(
                "density {density:.2} events/step is well below the target {target_density:.2}; add events"
            ),
        );
    }
    if repetition > target_repetition + REPETITION_ABOVE {
        push(
            HintPriority::Medium,
            "high_repetition",
            format!(
                "repetition {repetition:.2} is above the target {target_repetition:.2}; vary the pitches"
            ),
        );
    } else if repetition < target_repetition - REPETITION_BELOW {
        push(
            HintPriority::Low,
            "low_repetition",
            format!(
                "repetition {repetition:.2} is below the target {target_repetition:.2}; reuse a motif"
            ),
        );
    }
    if style < LOW_STYLE {
        push(
            HintPriority::Medium,
            "low_style_compliance",
            format!("style compliance {style:.2}; stick to the step grid and velocity levels"),
        );
    }
    hints
}
