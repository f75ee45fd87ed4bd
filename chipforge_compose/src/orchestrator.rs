// Orchestration loop: drives every window of a run through the state machine
//
//   Pending -> Proposing -> Validating -> Merged
//                               |
//                               +-> Regenerating -> Proposing (attempt + 1)
//                               +-> Abandoned (attempts exhausted)
//
// Windows are processed strictly in step order. Within one attempt:
// 1. Proposing: the generator gets the window, the canonical constraints,
//    per-track cursors, the hints from the previous attempt, and the attempt
//    number. A timeout or error counts as zero candidates.
// 2. Validating: every candidate is validated against a snapshot of the
//    running composition. Admissible ones are sent to the critic
//    concurrently; the validator's verdict overrides whatever the critic
//    claims about hard constraints.
// 3. Ranked candidates are merged best first, but only while they meet the
//    acceptance threshold. A stale merge is re-validated against the live
//    composition and retried once; if it no longer fits, its violations are
//    recorded and the next candidate is tried.
// 4. Anything short of a merge synthesizes hints and regenerates, until the
//    retry budget runs out and the window is abandoned.
//
// By default an abandoned window stops the run and the rest are reported as
// unattempted. With `continue_after_abandon` later windows are still tried.
// Merges are the only mutation and happen one at a time; the composition is
// owned by the run and never shared.

use futures::future::join_all;
use tracing::{debug, info, warn};

use chipforge_protocol::{
    CandidateRequest, CritiqueRequest, FailedWindow, Hint, RuleId, RunResult, RunStatus,
    RunSummary, ScoreRecord, TrackDecl, ValidationVerdict, Variant, VariantId, Violation, Window,
    WindowReport, WindowState,
};

use crate::audit::audit_score;
use crate::collaborator::{Critic, Generator, propose_timed, score_timed};
use crate::composition::RunningComposition;
use crate::config::{CompositionSettings, ProjectConfig, RunConfig, track_decls};
use crate::constraints::ConstraintModel;
use crate::error::ConfigurationError;
use crate::feedback::{below_threshold_hint, sort_hints, synthesize};
use crate::merger::{MergeError, merge};
use crate::ranker::rank;
use crate::validator::validate;

pub struct Orchestrator {
    constraints: ConstraintModel,
    run: RunConfig,
    settings: CompositionSettings,
    tracks: Vec<TrackDecl>,
}

/// How one attempt at a window ended.
enum Attempt {
    Merged {
        variant: VariantId,
        score: f64,
    },
    Rejected {
        violations: Vec<Violation>,
        records: Vec<ScoreRecord>,
        /// Best admissible score, when it fell short of the threshold.
        below_threshold: Option<f64>,
    },
    /// The merger refused the window itself; retrying cannot help.
    Aborted(MergeError),
}

/// Per-variant validation tallies across the run.
#[derive(Default)]
struct Tally {
    passes: u32,
    failures: u32,
    merged_scores: Vec<f64>,
}

impl Orchestrator {
    pub fn new(
        constraints: ConstraintModel,
        run: RunConfig,
        settings: CompositionSettings,
    ) -> Result<Self, ConfigurationError> {
        run.validate()?;
        settings.validate()?;
        let tracks = track_decls(constraints.spec());
        Ok(Orchestrator {
            constraints,
            run,
            settings,
            tracks,
        })
    }

    pub fn from_project(config: &ProjectConfig) -> Result<Self, ConfigurationError> {
        let constraints = config.validate()?;
        Self::new(constraints, config.run.clone(), config.composition.clone())
    }

    pub fn constraints(&self) -> &ConstraintModel {
        &self.constraints
    }

    pub fn windows(&self) -> Vec<Window> {
        self.settings.windows()
    }

    pub async fn run(&self, generator: &dyn Generator, critic: &dyn Critic) -> RunResult {
        let mut running = RunningComposition::new(
            self.settings.metadata(),
            self.settings.resolution(),
            self.tracks.clone(),
        );
        let windows = self.windows();
        info!(
            title = %self.settings.title,
            windows = windows.len(),
            generator = generator.name(),
            critic = critic.name(),
            "starting run"
        );
        debug!("constraints:\n{}", self.constraints.summary());

        let mut tally = Tally::default();
        let mut filled = Vec::new();
        let mut failed = Vec::new();
        let mut unattempted = Vec::new();
        let mut reports = Vec::new();

        for window in windows {
            if !failed.is_empty() && !self.run.continue_after_abandon {
                unattempted.push(window);
                continue;
            }
            let (report, failure) = self
                .run_window(&mut running, window, generator, critic, &mut tally)
                .await;
            reports.push(report);
            match failure {
                Some(f) => failed.push(f),
                None => filled.push(window),
            }
        }

        let status = if failed.is_empty() && unattempted.is_empty() {
            RunStatus::Complete
        } else if filled.is_empty() {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        };

        let final_composition = (!filled.is_empty()).then(|| running.snapshot());
        let summary = self.summarize(&running, &tally);
        if let Some(score) = &final_composition {
            let findings = audit_score(score, &self.constraints);
            if findings.is_empty() {
                debug!("final score passed audit");
            }
            for finding in &findings {
                warn!(kind = ?finding.kind, "audit: {finding}");
            }
        }
        info!(
            status = ?status,
            filled = filled.len(),
            failed = failed.len(),
            unattempted = unattempted.len(),
            events = summary.total_events,
            average_score = summary.average_score,
            passes = summary.validation_passes,
            failures = summary.validation_failures,
            "run finished"
        );

        RunResult {
            status,
            filled_windows: filled,
            failed_windows: failed,
            unattempted_windows: unattempted,
            window_reports: reports,
            summary,
            final_composition,
        }
    }

    async fn run_window(
        &self,
        running: &mut RunningComposition,
        window: Window,
        generator: &dyn Generator,
        critic: &dyn Critic,
        tally: &mut Tally,
    ) -> (WindowReport, Option<FailedWindow>) {
        let mut report = WindowReport {
            window,
            transitions: vec![WindowState::Pending],
            attempts_used: 0,
            merged_variant: None,
            merged_score: None,
        };
        let mut hints: Vec<Hint> = Vec::new();
        let mut last_violations: Vec<Violation> = Vec::new();
        let mut last_error: Option<String> = None;
        let max_attempts = self.run.max_attempts();

        for attempt in 0..max_attempts {
            report.attempts_used = attempt + 1;
            report.transitions.push(WindowState::Proposing);

            let request = CandidateRequest {
                window,
                constraints: self.constraints.spec().clone(),
                cursors: running.cursors().clone(),
                hints: std::mem::take(&mut hints),
                attempt,
                num_variants: self.run.variants_per_window,
            };
            let candidates =
                match propose_timed(generator, &request, self.run.call_timeout()).await {
                    Ok(candidates) => {
                        last_error = None;
                        candidates
                    }
                    Err(e) => {
                        last_error = Some(e.to_string());
                        Vec::new()
                    }
                };
            debug!(window = %window, attempt, candidates = candidates.len(), "proposed");

            report.transitions.push(WindowState::Validating);
            match self
                .attempt(running, &window, candidates, critic, tally)
                .await
            {
                Attempt::Merged { variant, score } => {
                    report.transitions.push(WindowState::Merged);
                    info!(window = %window, attempt, variant = %variant, score, "window merged");
                    report.merged_variant = Some(variant);
                    report.merged_score = Some(score);
                    tally.merged_scores.push(score);
                    return (report, None);
                }
                Attempt::Rejected {
                    violations,
                    records,
                    below_threshold,
                } => {
                    if !violations.is_empty() {
                        last_violations = violations.clone();
                    }
                    hints = synthesize(&violations, &records, self.constraints.soft(), &window);
                    if let Some(best) = below_threshold {
                        hints.push(below_threshold_hint(
                            best,
                            self.run.acceptance_threshold,
                            &window,
                        ));
                        sort_hints(&mut hints);
                    }
                    report.transitions.push(WindowState::Regenerating);
                    debug!(
                        window = %window,
                        attempt,
                        violations = violations.len(),
                        hints = hints.len(),
                        "regenerating"
                    );
                }
                Attempt::Aborted(err) => {
                    warn!(window = %window, "merge refused: {err}");
                    last_error = Some(err.to_string());
                    break;
                }
            }
        }

        report.transitions.push(WindowState::Abandoned);
        warn!(
            window = %window,
            attempts = report.attempts_used,
            violations = last_violations.len(),
            "window abandoned"
        );
        let failure = FailedWindow {
            window,
            last_violations,
            attempts_used: report.attempts_used,
            last_error,
        };
        (report, Some(failure))
    }

    /// Validate, score, rank, and try to merge one batch of candidates.
    async fn attempt(
        &self,
        running: &mut RunningComposition,
        window: &Window,
        candidates: Vec<Variant>,
        critic: &dyn Critic,
        tally: &mut Tally,
    ) -> Attempt {
        let snapshot = running.clone();
        let mut violations = Vec::new();
        let mut admissible: Vec<(Variant, ValidationVerdict)> = Vec::new();
        for variant in candidates {
            let verdict = validate(&variant, &self.constraints, &snapshot, window);
            if verdict.admissible {
                tally.passes += 1;
                admissible.push((variant, verdict));
            } else {
                tally.failures += 1;
                debug!(
                    window = %window,
                    variant = %variant.id,
                    violations = verdict.violations.len(),
                    "candidate rejected"
                );
                violations.extend(verdict.violations);
            }
        }

        let timeout = self.run.call_timeout();
        let critiques = admissible.iter().map(move |(variant, _)| {
            let request = CritiqueRequest {
                window: *window,
                variant: variant.clone(),
            };
            async move { score_timed(critic, &request, timeout).await }
        });
        let results = join_all(critiques).await;

        let records: Vec<ScoreRecord> = admissible
            .iter()
            .zip(results)
            .filter_map(|((_, verdict), result)| {
                result.ok().and_then(|record| reconcile(record, verdict))
            })
            .collect();
        let variants: Vec<Variant> = admissible.into_iter().map(|(v, _)| v).collect();
        let ranked = rank(&variants, &records);
        self.merge_ranked(running, window, &ranked, &variants, records, violations)
    }

    /// Merge the first ranked candidate that meets the threshold and still
    /// fits the live composition. Candidates were validated against a
    /// snapshot; within a single run nothing moves `running` before this
    /// point, so the stale branch only fires if that ever changes.
    fn merge_ranked(
        &self,
        running: &mut RunningComposition,
        window: &Window,
        ranked: &[VariantId],
        variants: &[Variant],
        records: Vec<ScoreRecord>,
        mut violations: Vec<Violation>,
    ) -> Attempt {
        let threshold = self.run.acceptance_threshold;
        for id in ranked {
            let (Some(variant), Some(record)) = (
                variants.iter().find(|v| &v.id == id),
                records.iter().find(|r| &r.variant_id == id),
            ) else {
                continue;
            };
            if record.score < threshold {
                let best = record.score;
                return Attempt::Rejected {
                    violations,
                    records,
                    below_threshold: Some(best),
                };
            }
            match merge(running, &self.constraints, window, variant) {
                Ok(()) => {
                    return Attempt::Merged {
                        variant: id.clone(),
                        score: record.score,
                    };
                }
                Err(MergeError::StaleSnapshot { .. }) => {
                    let fresh = validate(variant, &self.constraints, running, window);
                    if !fresh.admissible {
                        warn!(window = %window, variant = %id, "candidate went stale");
                        violations.extend(fresh.violations);
                        continue;
                    }
                    match merge(running, &self.constraints, window, variant) {
                        Ok(()) => {
                            return Attempt::Merged {
                                variant: id.clone(),
                                score: record.score,
                            };
                        }
                        Err(MergeError::StaleSnapshot { violations: stale }) => {
                            violations.extend(stale);
                        }
                        Err(e) => return Attempt::Aborted(e),
                    }
                }
                Err(e) => return Attempt::Aborted(e),
            }
        }

        Attempt::Rejected {
            violations,
            records,
            below_threshold: None,
        }
    }

    fn summarize(&self, running: &RunningComposition, tally: &Tally) -> RunSummary {
        let merged = &tally.merged_scores;
        let average_score = if merged.is_empty() {
            0.0
        } else {
            merged.iter().sum::<f64>() / merged.len() as f64
        };
        RunSummary {
            total_events: running.events().len(),
            events_per_track: running.snapshot().track_counts(),
            average_score,
            validation_passes: tally.passes,
            validation_failures: tally.failures,
        }
    }
}

/// Bring a critic's record in line with the validator. Returns `None` for
/// records that cannot be ranked.
fn reconcile(mut record: ScoreRecord, verdict: &ValidationVerdict) -> Option<ScoreRecord> {
    if !record.score.is_finite() {
        warn!(variant = %record.variant_id, "critic returned a non-finite score");
        return None;
    }
    if record.passed_hard_constraints != verdict.admissible {
        warn!(
            variant = %record.variant_id,
            critic = record.passed_hard_constraints,
            validator = verdict.admissible,
            "critic disagrees with validator on hard constraints"
        );
        record.passed_hard_constraints = verdict.admissible;
    }
    record.metrics.range_violations = verdict.count(RuleId::RangeViolation);
    record.metrics.polyphony_violations = verdict.count(RuleId::PolyphonyViolation);
    record.score = record.score.clamp(0.0, 100.0);
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::composition;
    use chipforge_protocol::{Metrics, NoteEvent, TrackId};

    fn record(score: f64, passed: bool) -> ScoreRecord {
        ScoreRecord {
            variant_id: "v".into(),
            score,
            passed_hard_constraints: passed,
            metrics: Metrics {
                range_violations: 3,
                ..Metrics::default()
            },
            reasons: vec![],
        }
    }

    #[test]
    fn test_reconcile_overrides_critic() {
        let verdict = ValidationVerdict::from_violations(vec![]);
        let fixed = reconcile(record(150.0, false), &verdict).unwrap();
        assert!(fixed.passed_hard_constraints);
        assert_eq!(fixed.metrics.range_violations, 0);
        assert_eq!(fixed.score, 100.0);
    }

    #[test]
    fn test_reconcile_drops_nan() {
        let verdict = ValidationVerdict::from_violations(vec![]);
        assert!(reconcile(record(f64::NAN, true), &verdict).is_none());
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            ConstraintModel::default_8bit(),
            RunConfig::default(),
            CompositionSettings::default(),
        )
        .unwrap()
    }

    fn scored(id: &str, score: f64) -> ScoreRecord {
        ScoreRecord {
            variant_id: id.into(),
            score,
            passed_hard_constraints: true,
            metrics: Metrics::default(),
            reasons: vec![],
        }
    }

    /// A composition whose pulse1 cursor moved to step 12 after candidates
    /// for window [8, 16) were checked against an empty snapshot.
    fn moved_on() -> (RunningComposition, Window) {
        let mut comp = composition(4);
        comp.commit(
            Window::new(0, 0, 8),
            vec![NoteEvent::note("pulse1", 60, 100, 4, 8)],
        );
        (comp, Window::new(0, 8, 16))
    }

    #[test]
    fn test_stale_candidate_falls_through_to_next() {
        let orch = orchestrator();
        let (mut comp, window) = moved_on();
        let variants = vec![
            Variant::new("early", vec![NoteEvent::note("pulse1", 60, 100, 0, 2)]),
            Variant::new("later", vec![NoteEvent::note("pulse1", 62, 100, 4, 2)]),
        ];
        let records = vec![scored("early", 90.0), scored("later", 50.0)];
        let ranked = rank(&variants, &records);
        assert_eq!(ranked[0].as_str(), "early");

        let outcome = orch.merge_ranked(&mut comp, &window, &ranked, &variants, records, vec![]);
        let Attempt::Merged { variant, score } = outcome else {
            panic!("expected a merge");
        };
        assert_eq!(variant.as_str(), "later");
        assert_eq!(score, 50.0);
        assert_eq!(comp.cursor(&TrackId::from("pulse1")), Some(14));
    }

    #[test]
    fn test_all_stale_candidates_rejected_with_violations() {
        let orch = orchestrator();
        let (mut comp, window) = moved_on();
        let before = comp.clone();
        let variants = vec![Variant::new(
            "early",
            vec![NoteEvent::note("pulse1", 60, 100, 0, 2)],
        )];
        let records = vec![scored("early", 90.0)];
        let ranked = rank(&variants, &records);

        let outcome = orch.merge_ranked(&mut comp, &window, &ranked, &variants, records, vec![]);
        let Attempt::Rejected {
            violations,
            below_threshold,
            ..
        } = outcome
        else {
            panic!("expected a rejection");
        };
        assert_eq!(below_threshold, None);
        assert!(
            violations
                .iter()
                .all(|v| v.rule == RuleId::ContinuityViolation)
        );
        assert!(!violations.is_empty());
        assert_eq!(comp, before);
    }

    #[test]
    fn test_new_rejects_bad_run_config() {
        let run = RunConfig {
            variants_per_window: 0,
            ..RunConfig::default()
        };
        assert!(
            Orchestrator::new(
                ConstraintModel::default_8bit(),
                run,
                CompositionSettings::default()
            )
            .is_err()
        );
    }

    #[test]
    fn test_new_rejects_overflowing_resolution() {
        let settings = CompositionSettings {
            steps_per_beat: 2_000_000_000,
            length_bars: 1,
            ..CompositionSettings::default()
        };
        assert!(matches!(
            Orchestrator::new(ConstraintModel::default_8bit(), RunConfig::default(), settings),
            Err(ConfigurationError::InvalidRunConfig(_))
        ));
    }

    #[test]
    fn test_windows_follow_settings() {
        let settings = CompositionSettings {
            length_bars: 3,
            ..CompositionSettings::default()
        };
        let orch =
            Orchestrator::new(ConstraintModel::default_8bit(), RunConfig::default(), settings)
                .unwrap();
        assert_eq!(
            orch.windows(),
            vec![
                Window::for_bar(0, 16),
                Window::for_bar(1, 16),
                Window::for_bar(2, 16)
            ]
        );
    }
}
