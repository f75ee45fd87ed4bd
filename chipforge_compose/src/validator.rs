// Window validator: decides whether a candidate variant may enter the
// running composition.
//
// `validate` is a pure function of (variant, constraint model, running
// composition, window). Rules run in a fixed order and every violation is
// collected, so a generator retrying with hints sees the whole picture:
//
//   1. unknown_track        event targets a track the model does not declare
//   2. range_violation      pitch outside the track's [min, max]
//   3. invalid_velocity     velocity not one of the allowed levels
//   4. polyphony_violation  overlapping notes on a monophonic track
//   5. overflow             note ends past the window when overflow is forbidden
//   6. density_exceeded     more events than the window's scaled budget
//   7. continuity_violation note starts before the track's cursor
//
// Soft constraints never appear here; they only feed scoring.
//
// `check_continuity` is also used by the merger, which re-checks continuity
// against the state it is about to mutate.

use std::collections::BTreeMap;

use chipforge_protocol::{
    NoteEvent, RuleId, TrackId, ValidationVerdict, Variant, Violation, Window,
};

use crate::composition::RunningComposition;
use crate::constraints::ConstraintModel;

pub fn validate(
    variant: &Variant,
    constraints: &ConstraintModel,
    running: &RunningComposition,
    window: &Window,
) -> ValidationVerdict {
    let mut violations = Vec::new();
    check_tracks(variant, constraints, &mut violations);
    check_ranges(variant, constraints, &mut violations);
    check_velocities(variant, constraints, &mut violations);
    check_polyphony(variant, constraints, &mut violations);
    check_overflow(variant, constraints, window, &mut violations);
    check_density(variant, constraints, running, window, &mut violations);
    violations.extend(check_continuity(variant, constraints, running, window));
    ValidationVerdict::from_violations(violations)
}

fn check_tracks(variant: &Variant, constraints: &ConstraintModel, out: &mut Vec<Violation>) {
    for e in &variant.events {
        if !constraints.is_known_track(&e.track) {
            out.push(
                Violation::new(
                    RuleId::UnknownTrack,
                    format!("track {} is not part of the constraint model", e.track),
                )
                .on_track(&e.track)
                .at_step(e.start_step),
            );
        }
    }
}

fn check_ranges(variant: &Variant, constraints: &ConstraintModel, out: &mut Vec<Violation>) {
    for e in &variant.events {
        let Some(range) = constraints.pitch_range(&e.track) else {
            continue;
        };
        if !range.contains(e.pitch) {
            out.push(
                Violation::new(
                    RuleId::RangeViolation,
                    format!(
                        "pitch {} outside {}..={} on {}",
                        e.pitch, range.min, range.max, e.track
                    ),
                )
                .on_track(&e.track)
                .at_step(e.start_step),
            );
        }
    }
}

fn check_velocities(variant: &Variant, constraints: &ConstraintModel, out: &mut Vec<Violation>) {
    for e in &variant.events {
        if !constraints.is_allowed_velocity(e.velocity) {
            out.push(
                Violation::new(
                    RuleId::InvalidVelocity,
                    format!(
                        "velocity {} is not an allowed level (nearest is {})",
                        e.velocity,
                        constraints.quantize_velocity(e.velocity)
                    ),
                )
                .on_track(&e.track)
                .at_step(e.start_step),
            );
        }
    }
}

/// Events grouped by track, each group sorted by start step.
fn by_track(events: &[NoteEvent]) -> BTreeMap<&TrackId, Vec<&NoteEvent>> {
    let mut groups: BTreeMap<&TrackId, Vec<&NoteEvent>> = BTreeMap::new();
    for e in events {
        groups.entry(&e.track).or_default().push(e);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|e| (e.start_step, e.dur_steps));
    }
    groups
}

/// Start steps of notes that begin before an earlier note on the same track
/// has ended. Input must be sorted by start step.
pub fn overlapping_starts(sorted: &[&NoteEvent]) -> Vec<u32> {
    let mut starts = Vec::new();
    let mut busy_until = 0u32;
    for (i, e) in sorted.iter().enumerate() {
        if i > 0 && e.start_step < busy_until {
            starts.push(e.start_step);
        }
        busy_until = busy_until.max(e.end_step());
    }
    starts
}

/// Number of overlapping notes on monophonic tracks.
pub fn count_polyphony(events: &[NoteEvent], constraints: &ConstraintModel) -> u32 {
    by_track(events)
        .into_iter()
        .filter(|(track, _)| constraints.is_monophonic(track))
        .map(|(_, group)| overlapping_starts(&group).len() as u32)
        .sum()
}

fn check_polyphony(variant: &Variant, constraints: &ConstraintModel, out: &mut Vec<Violation>) {
    for (track, group) in by_track(&variant.events) {
        if !constraints.is_monophonic(track) {
            continue;
        }
        for step in overlapping_starts(&group) {
            out.push(
                Violation::new(
                    RuleId::PolyphonyViolation,
                    format!("overlapping notes on monophonic track {track} at step {step}"),
                )
                .on_track(track)
                .at_step(step),
            );
        }
    }
}

fn check_overflow(
    variant: &Variant,
    constraints: &ConstraintModel,
    window: &Window,
    out: &mut Vec<Violation>,
) {
    if !constraints.hard().forbid_overflow {
        return;
    }
    let len = window.len();
    for e in &variant.events {
        if e.end_step() > len {
            out.push(
                Violation::new(
                    RuleId::Overflow,
                    format!(
                        "note on {} ends at step {} past window length {len}",
                        e.track,
                        e.end_step()
                    ),
                )
                .on_track(&e.track)
                .at_step(e.start_step),
            );
        }
    }
}

fn check_density(
    variant: &Variant,
    constraints: &ConstraintModel,
    running: &RunningComposition,
    window: &Window,
    out: &mut Vec<Violation>,
) {
    let budget = constraints.max_events_for_window(window, running.steps_per_bar());
    let count = variant.events.len();
    if count > budget as usize {
        out.push(Violation::new(
            RuleId::DensityExceeded,
            format!("{count} events exceed the window budget of {budget}"),
        ));
    }
}

/// Continuity against the running composition: on every monophonic track
/// the variant's earliest note must not start before that track's cursor.
pub fn check_continuity(
    variant: &Variant,
    constraints: &ConstraintModel,
    running: &RunningComposition,
    window: &Window,
) -> Vec<Violation> {
    let mut earliest: BTreeMap<&TrackId, u32> = BTreeMap::new();
    for e in &variant.events {
        if !constraints.is_monophonic(&e.track) {
            continue;
        }
        let start = window.absolute(e.start_step);
        earliest
            .entry(&e.track)
            .and_modify(|s| *s = (*s).min(start))
            .or_insert(start);
    }

    let mut out = Vec::new();
    for (track, start) in earliest {
        let Some(cursor) = running.cursor(track) else {
            continue;
        };
        if start < cursor {
            out.push(
                Violation::new(
                    RuleId::ContinuityViolation,
                    format!(
                        "{track} starts at absolute step {start} but is busy until {cursor}"
                    ),
                )
                .on_track(track)
                .at_step(start.saturating_sub(window.start_step)),
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{composition, one_bar_model};

    fn variant(events: Vec<NoteEvent>) -> Variant {
        Variant::new("v", events)
    }

    #[test]
    fn test_clean_variant_is_admissible() {
        let model = ConstraintModel::default_8bit();
        let comp = composition(4);
        let v = variant(vec![
            NoteEvent::note("pulse1", 72, 100, 0, 4),
            NoteEvent::note("pulse1", 74, 100, 4, 4),
            NoteEvent::note("triangle", 36, 100, 0, 8),
            NoteEvent::note("noise", 36, 127, 0, 2),
        ]);
        let verdict = validate(&v, &model, &comp, &Window::for_bar(0, 16));
        assert!(verdict.admissible, "{:?}", verdict.violations);
        assert!(verdict.violations.is_empty());
    }

    #[test]
    fn test_unknown_track_rejected() {
        let model = ConstraintModel::default_8bit();
        let v = variant(vec![NoteEvent::note("sawtooth", 60, 100, 0, 4)]);
        let verdict = validate(&v, &model, &composition(1), &Window::for_bar(0, 16));
        assert!(!verdict.admissible);
        assert_eq!(verdict.count(RuleId::UnknownTrack), 1);
        assert_eq!(verdict.violations[0].track, Some(TrackId::from("sawtooth")));
    }

    #[test]
    fn test_range_and_velocity_reported_together() {
        let model = ConstraintModel::default_8bit();
        let v = variant(vec![NoteEvent::note("triangle", 72, 90, 0, 4)]);
        let verdict = validate(&v, &model, &composition(1), &Window::for_bar(0, 16));
        assert_eq!(verdict.count(RuleId::RangeViolation), 1);
        assert_eq!(verdict.count(RuleId::InvalidVelocity), 1);
        // Fixed rule order.
        assert_eq!(verdict.violations[0].rule, RuleId::RangeViolation);
        assert_eq!(verdict.violations[1].rule, RuleId::InvalidVelocity);
    }

    #[test]
    fn test_polyphony_detected_on_overlap() {
        let model = ConstraintModel::default_8bit();
        let v = variant(vec![
            NoteEvent::note("pulse1", 72, 100, 0, 4),
            NoteEvent::note("pulse1", 76, 100, 2, 4),
        ]);
        let verdict = validate(&v, &model, &composition(1), &Window::for_bar(0, 16));
        assert!(!verdict.admissible);
        assert_eq!(verdict.count(RuleId::PolyphonyViolation), 1);
        assert_eq!(verdict.violations[0].step, Some(2));
    }

    #[test]
    fn test_touching_notes_are_not_polyphony() {
        let model = ConstraintModel::default_8bit();
        let v = variant(vec![
            NoteEvent::note("pulse1", 72, 100, 4, 4),
            NoteEvent::note("pulse1", 72, 100, 0, 4),
        ]);
        let verdict = validate(&v, &model, &composition(1), &Window::for_bar(0, 16));
        assert!(verdict.admissible);
    }

    #[test]
    fn test_long_note_covering_two_later_notes() {
        let model = ConstraintModel::default_8bit();
        let events = vec![
            NoteEvent::note("pulse1", 72, 100, 0, 12),
            NoteEvent::note("pulse1", 72, 100, 4, 2),
            NoteEvent::note("pulse1", 72, 100, 8, 2),
        ];
        assert_eq!(count_polyphony(&events, &model), 2);
    }

    #[test]
    fn test_overflow_only_when_forbidden() {
        let v = variant(vec![NoteEvent::note("pulse1", 72, 100, 14, 4)]);
        let window = Window::for_bar(0, 16);

        let model = ConstraintModel::default_8bit();
        let verdict = validate(&v, &model, &composition(1), &window);
        assert_eq!(verdict.count(RuleId::Overflow), 1);

        let mut spec = model.spec().clone();
        spec.hard.forbid_overflow = false;
        let lenient = ConstraintModel::new(spec).unwrap();
        assert!(validate(&v, &lenient, &composition(1), &window).admissible);
    }

    #[test]
    fn test_density_budget() {
        let model = one_bar_model(4);
        let events: Vec<_> = (0..5)
            .map(|i| NoteEvent::note("pulse1", 72, 100, i * 3, 2))
            .collect();
        let verdict = validate(&variant(events), &model, &composition(1), &Window::for_bar(0, 16));
        assert_eq!(verdict.count(RuleId::DensityExceeded), 1);
        assert_eq!(verdict.violations.len(), 1);

        // Half a bar gets half the budget.
        let half = Window::new(0, 0, 8);
        let events: Vec<_> = (0..3)
            .map(|i| NoteEvent::note("pulse1", 72, 100, i * 2, 2))
            .collect();
        let verdict = validate(&variant(events), &model, &composition(1), &half);
        assert_eq!(verdict.count(RuleId::DensityExceeded), 1);
    }

    #[test]
    fn test_continuity_against_cursor() {
        let model = ConstraintModel::default_8bit();
        let mut comp = composition(2);
        comp.commit(
            Window::for_bar(0, 16),
            vec![NoteEvent::note("pulse1", 72, 100, 12, 6)],
        );
        assert_eq!(comp.cursor(&"pulse1".into()), Some(18));

        let window = Window::for_bar(1, 16);
        let early = variant(vec![NoteEvent::note("pulse1", 72, 100, 0, 4)]);
        let verdict = validate(&early, &model, &comp, &window);
        assert_eq!(verdict.count(RuleId::ContinuityViolation), 1);
        assert_eq!(verdict.violations[0].step, Some(0));

        let late = variant(vec![NoteEvent::note("pulse1", 72, 100, 2, 4)]);
        assert!(validate(&late, &model, &comp, &window).admissible);

        // Other tracks are unaffected by the pulse1 cursor.
        let other = variant(vec![NoteEvent::note("pulse2", 72, 100, 0, 4)]);
        assert!(validate(&other, &model, &comp, &window).admissible);
    }

    #[test]
    fn test_every_violation_accumulated() {
        let model = one_bar_model(2);
        let v = variant(vec![
            NoteEvent::note("bogus", 60, 100, 0, 1),
            NoteEvent::note("pulse1", 10, 5, 0, 4),
            NoteEvent::note("pulse1", 72, 100, 2, 20),
        ]);
        let verdict = validate(&v, &model, &composition(1), &Window::for_bar(0, 16));
        let counts = verdict.counts();
        assert_eq!(counts.get(&RuleId::UnknownTrack), Some(&1));
        assert_eq!(counts.get(&RuleId::RangeViolation), Some(&1));
        assert_eq!(counts.get(&RuleId::InvalidVelocity), Some(&1));
        assert_eq!(counts.get(&RuleId::PolyphonyViolation), Some(&1));
        assert_eq!(counts.get(&RuleId::Overflow), Some(&1));
        assert_eq!(counts.get(&RuleId::DensityExceeded), Some(&1));
        let rules: Vec<RuleId> = verdict.violations.iter().map(|v| v.rule).collect();
        let mut sorted = rules.clone();
        sorted.sort_by_key(|r| RuleId::ALL.iter().position(|x| x == r));
        assert_eq!(rules, sorted);
    }
}
