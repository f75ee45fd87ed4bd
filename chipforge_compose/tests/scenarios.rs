// End-to-end runs of the orchestration loop with scripted collaborators.
//
// `Scripted` hands out a fixed set of variants per (bar, attempt) and records
// every request it sees; `FixedCritic` scores by variant id. Together they
// make each window's path through the state machine fully predictable.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chipforge_compose::audit::audit_score;
use chipforge_compose::collaborator::{Critic, Generator};
use chipforge_compose::config::{CompositionSettings, ProjectConfig, RunConfig};
use chipforge_compose::constraints::ConstraintModel;
use chipforge_compose::critic::MetricCritic;
use chipforge_compose::error::{CollaboratorError, ConfigurationError};
use chipforge_compose::generator::AlgorithmicGenerator;
use chipforge_compose::orchestrator::Orchestrator;
use chipforge_protocol::{
    CandidateRequest, ConstraintSpec, CritiqueRequest, HardConstraints, Metrics, NoteEvent,
    PitchRange, RuleId, RunStatus, ScoreRecord, SoftConstraints, TrackId, Variant, Window,
    WindowState,
};

#[derive(Default)]
struct Scripted {
    script: BTreeMap<(u32, u32), Vec<Variant>>,
    seen: Mutex<Vec<CandidateRequest>>,
}

impl Scripted {
    fn on(mut self, bar: u32, attempt: u32, variants: Vec<Variant>) -> Self {
        self.script.insert((bar, attempt), variants);
        self
    }

    fn requests_for(&self, bar: u32) -> Vec<CandidateRequest> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.window.bar_index == bar)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Generator for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn propose(&self, request: &CandidateRequest) -> Result<Vec<Variant>, CollaboratorError> {
        self.seen.lock().unwrap().push(request.clone());
        Ok(self
            .script
            .get(&(request.window.bar_index, request.attempt))
            .cloned()
            .unwrap_or_default())
    }
}

struct Slow;

#[async_trait]
impl Generator for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    async fn propose(&self, _: &CandidateRequest) -> Result<Vec<Variant>, CollaboratorError> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(vec![])
    }
}

/// Scores by id; ids missing from the table fail.
struct FixedCritic {
    scores: BTreeMap<String, f64>,
    default: Option<f64>,
}

impl FixedCritic {
    fn uniform(score: f64) -> Self {
        FixedCritic {
            scores: BTreeMap::new(),
            default: Some(score),
        }
    }

    fn table(scores: &[(&str, f64)]) -> Self {
        FixedCritic {
            scores: scores.iter().map(|(id, s)| (id.to_string(), *s)).collect(),
            default: None,
        }
    }
}

#[async_trait]
impl Critic for FixedCritic {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn score(&self, request: &CritiqueRequest) -> Result<ScoreRecord, CollaboratorError> {
        let id = request.variant.id.as_str();
        let score = self
            .scores
            .get(id)
            .copied()
            .or(self.default)
            .ok_or_else(|| CollaboratorError::Failed {
                role: "critic",
                reason: format!("no score for {id}"),
            })?;
        Ok(ScoreRecord {
            variant_id: request.variant.id.clone(),
            score,
            passed_hard_constraints: true,
            metrics: Metrics::default(),
            reasons: vec![],
        })
    }
}

fn three_track_model(forbid_overflow: bool) -> ConstraintModel {
    let tracks: Vec<TrackId> = ["pulse1", "triangle", "noise"]
        .into_iter()
        .map(TrackId::from)
        .collect();
    let mut pitch_ranges = BTreeMap::new();
    pitch_ranges.insert(TrackId::from("pulse1"), PitchRange::new(48, 96));
    ConstraintModel::new(ConstraintSpec {
        hard: HardConstraints {
            required_tracks: tracks.clone(),
            monophonic_tracks: tracks,
            max_events_per_bar: 16,
            pitch_ranges,
            velocity_levels: vec![64, 100, 127],
            forbid_overflow,
        },
        soft: SoftConstraints::default(),
    })
    .unwrap()
}

fn settings(bars: u32) -> CompositionSettings {
    CompositionSettings {
        length_bars: bars,
        ..CompositionSettings::default()
    }
}

fn orchestrator(model: ConstraintModel, run: RunConfig, bars: u32) -> Orchestrator {
    Orchestrator::new(model, run, settings(bars)).unwrap()
}

fn pulse(pitch: u8, start: u32, dur: u32) -> NoteEvent {
    NoteEvent::note("pulse1", pitch, 100, start, dur)
}

#[tokio::test]
async fn scenario_a_out_of_range_candidate_is_abandoned() {
    let generator =
        Scripted::default().on(0, 0, vec![Variant::new("low", vec![pulse(40, 0, 4)])]);
    let orch = orchestrator(three_track_model(true), RunConfig::default(), 1);
    let result = orch.run(&generator, &FixedCritic::uniform(50.0)).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.filled_windows.is_empty());
    assert!(result.final_composition.is_none());

    let failed = &result.failed_windows[0];
    assert_eq!(failed.window, Window::for_bar(0, 16));
    assert_eq!(failed.attempts_used, 3);
    assert_eq!(failed.last_violations.len(), 1);
    assert_eq!(failed.last_violations[0].rule, RuleId::RangeViolation);
    assert_eq!(failed.last_error, None);

    use WindowState::*;
    assert_eq!(
        result.window_reports[0].transitions,
        vec![
            Pending,
            Proposing,
            Validating,
            Regenerating,
            Proposing,
            Validating,
            Regenerating,
            Proposing,
            Validating,
            Regenerating,
            Abandoned,
        ]
    );

    // The retry after the range violation carried a targeted hint.
    let retries = generator.requests_for(0);
    assert_eq!(retries.len(), 3);
    assert!(retries[0].hints.is_empty());
    let hint = &retries[1].hints[0];
    assert_eq!(hint.code, "range_violation");
    assert!(hint.applies_to(&TrackId::from("pulse1")));
    assert!(!hint.applies_to(&TrackId::from("noise")));
    assert_eq!(result.summary.validation_failures, 1);
    assert_eq!(result.summary.validation_passes, 0);
}

#[tokio::test]
async fn scenario_b_highest_score_merges() {
    let generator = Scripted::default().on(
        0,
        0,
        vec![
            Variant::new("seventy", vec![pulse(72, 0, 4), pulse(74, 4, 4)]),
            Variant::new("ninety", vec![pulse(72, 0, 8), pulse(76, 8, 6)]),
        ],
    );
    let critic = FixedCritic::table(&[("seventy", 70.0), ("ninety", 90.0)]);
    let orch = orchestrator(three_track_model(true), RunConfig::default(), 1);
    let result = orch.run(&generator, &critic).await;

    assert_eq!(result.status, RunStatus::Complete);
    let report = &result.window_reports[0];
    assert_eq!(report.merged_variant.as_ref().map(|v| v.as_str()), Some("ninety"));
    assert_eq!(report.merged_score, Some(90.0));
    assert_eq!(report.attempts_used, 1);
    assert_eq!(report.final_state(), WindowState::Merged);

    let score = result.final_composition.unwrap();
    let pulse_ends: Vec<u32> = score
        .events_for_track(&TrackId::from("pulse1"))
        .map(|e| e.end_step())
        .collect();
    assert_eq!(pulse_ends.iter().max(), Some(&14));
    assert_eq!(result.summary.average_score, 90.0);
    assert_eq!(result.summary.validation_passes, 2);
}

#[tokio::test]
async fn scenario_c_continuity_violation_regenerates() {
    let generator = Scripted::default()
        .on(0, 0, vec![Variant::new("w0", vec![pulse(72, 12, 8)])])
        .on(1, 0, vec![Variant::new("w1_early", vec![pulse(72, 0, 4)])])
        .on(1, 1, vec![Variant::new("w1_late", vec![pulse(74, 4, 4)])])
        .on(2, 0, vec![Variant::new("w2", vec![pulse(76, 0, 4)])]);
    let orch = orchestrator(three_track_model(false), RunConfig::default(), 3);
    let result = orch.run(&generator, &FixedCritic::uniform(60.0)).await;

    assert_eq!(result.status, RunStatus::Complete);
    assert_eq!(result.filled_windows.len(), 3);

    let second = &result.window_reports[1];
    assert_eq!(second.attempts_used, 2);
    assert_eq!(second.merged_variant.as_ref().map(|v| v.as_str()), Some("w1_late"));
    assert!(second.transitions.contains(&WindowState::Regenerating));

    let requests = generator.requests_for(1);
    assert_eq!(requests[0].cursors.get(&TrackId::from("pulse1")), Some(&20));
    assert_eq!(requests[1].hints[0].code, "continuity_violation");

    let score = result.final_composition.unwrap();
    let starts: Vec<u32> = score
        .events_for_track(&TrackId::from("pulse1"))
        .map(|e| e.start_step)
        .collect();
    assert_eq!(starts, vec![12, 20, 32]);
}

#[tokio::test]
async fn generator_timeout_counts_as_no_candidates() {
    let run = RunConfig {
        call_timeout_ms: 20,
        retry_budget: 1,
        ..RunConfig::default()
    };
    let orch = orchestrator(three_track_model(true), run, 2);
    let result = orch.run(&Slow, &FixedCritic::uniform(50.0)).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.failed_windows.len(), 1);
    assert_eq!(result.failed_windows[0].attempts_used, 2);
    let err = result.failed_windows[0].last_error.as_deref().unwrap();
    assert!(err.contains("timed out"), "{err}");
    assert_eq!(result.unattempted_windows, vec![Window::for_bar(1, 16)]);
}

#[tokio::test]
async fn below_threshold_regenerates_with_hint() {
    let generator = Scripted::default()
        .on(0, 0, vec![Variant::new("meh", vec![pulse(72, 0, 4)])])
        .on(0, 1, vec![Variant::new("good", vec![pulse(74, 0, 4)])]);
    let critic = FixedCritic::table(&[("meh", 40.0), ("good", 85.0)]);
    let run = RunConfig {
        acceptance_threshold: 75.0,
        ..RunConfig::default()
    };
    let orch = orchestrator(three_track_model(true), run, 1);
    let result = orch.run(&generator, &critic).await;

    assert_eq!(result.status, RunStatus::Complete);
    assert_eq!(
        result.window_reports[0].merged_variant.as_ref().map(|v| v.as_str()),
        Some("good")
    );
    let requests = generator.requests_for(0);
    assert!(requests[1].hints.iter().any(|h| h.code == "below_threshold"));
}

#[tokio::test]
async fn critic_failure_drops_only_that_variant() {
    let generator = Scripted::default().on(
        0,
        0,
        vec![
            Variant::new("unscored", vec![pulse(72, 0, 4)]),
            Variant::new("scored", vec![pulse(74, 0, 4)]),
        ],
    );
    let critic = FixedCritic::table(&[("scored", 30.0)]);
    let orch = orchestrator(three_track_model(true), RunConfig::default(), 1);
    let result = orch.run(&generator, &critic).await;

    assert_eq!(result.status, RunStatus::Complete);
    assert_eq!(
        result.window_reports[0].merged_variant.as_ref().map(|v| v.as_str()),
        Some("scored")
    );
}

#[tokio::test]
async fn abandoned_window_stops_or_continues() {
    let script = || {
        Scripted::default()
            .on(0, 0, vec![Variant::new("a", vec![pulse(72, 0, 4)])])
            .on(2, 0, vec![Variant::new("c", vec![pulse(72, 0, 4)])])
    };

    let stop = orchestrator(three_track_model(true), RunConfig::default(), 3)
        .run(&script(), &FixedCritic::uniform(50.0))
        .await;
    assert_eq!(stop.status, RunStatus::Partial);
    assert_eq!(stop.filled_windows, vec![Window::for_bar(0, 16)]);
    assert_eq!(stop.failed_windows[0].window, Window::for_bar(1, 16));
    assert_eq!(stop.unattempted_windows, vec![Window::for_bar(2, 16)]);
    assert_eq!(stop.window_reports.len(), 2);

    let run = RunConfig {
        continue_after_abandon: true,
        ..RunConfig::default()
    };
    let go_on = orchestrator(three_track_model(true), run, 3)
        .run(&script(), &FixedCritic::uniform(50.0))
        .await;
    assert_eq!(go_on.status, RunStatus::Partial);
    assert_eq!(
        go_on.filled_windows,
        vec![Window::for_bar(0, 16), Window::for_bar(2, 16)]
    );
    assert!(go_on.unattempted_windows.is_empty());
    assert_eq!(go_on.final_composition.unwrap().events.len(), 2);
}

#[tokio::test]
async fn algorithmic_run_completes_and_audits_clean() {
    let config = ProjectConfig::default();
    let orch = Orchestrator::from_project(&config).unwrap();
    let model = orch.constraints().clone();
    let generator = AlgorithmicGenerator::new(11, "C");
    let critic = MetricCritic::new(model.clone());

    let result = orch.run(&generator, &critic).await;
    assert_eq!(result.status, RunStatus::Complete);
    assert_eq!(result.filled_windows.len(), 8);
    assert_eq!(result.summary.validation_failures, 0);
    assert!(result.summary.average_score > 0.0);

    let score = result.final_composition.as_ref().unwrap();
    assert!(audit_score(score, &model).is_empty());
    assert_eq!(result.summary.total_events, score.events.len());
    assert_eq!(score.total_steps(), 128);

    let again = orch.run(&generator, &critic).await;
    assert_eq!(again, result);
}

#[test]
fn bad_configuration_is_rejected_before_running() {
    let mut config = ProjectConfig::default();
    config
        .constraints
        .hard
        .pitch_ranges
        .insert(TrackId::from("pulse1"), PitchRange::new(90, 50));
    assert!(matches!(
        Orchestrator::from_project(&config),
        Err(ConfigurationError::InvertedPitchRange { min: 90, max: 50, .. })
    ));
}
