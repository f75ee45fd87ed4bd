// Validated constraint model.
//
// `ConstraintModel::new` is the only place malformed constraints are
// rejected. It checks structural invariants on a `ConstraintSpec` and
// canonicalizes velocity levels (sorted ascending, deduplicated) and the
// monophonic track list (first mention kept); every other component trusts
// the model without re-checking.
//
// The model is immutable for the lifetime of a run and cheap to clone, so
// concurrent runs each hold their own copy.

use std::collections::BTreeSet;

use chipforge_protocol::{
    ConstraintSpec, HardConstraints, PitchRange, SoftConstraints, TrackId, Window,
};

use crate::error::ConfigurationError;

const MIDI_MAX: u8 = 127;

#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintModel {
    spec: ConstraintSpec,
    known: BTreeSet<TrackId>,
    monophonic: BTreeSet<TrackId>,
}

impl ConstraintModel {
    /// Validate and canonicalize a raw spec.
    pub fn new(spec: ConstraintSpec) -> Result<Self, ConfigurationError> {
        check_hard(&spec.hard)?;
        check_soft(&spec.soft)?;
        Ok(Self::canonical(spec))
    }

    /// The NES preset from `ConstraintSpec::default_8bit`.
    pub fn default_8bit() -> Self {
        Self::canonical(ConstraintSpec::default_8bit())
    }

    fn canonical(mut spec: ConstraintSpec) -> Self {
        spec.hard.velocity_levels.sort_unstable();
        spec.hard.velocity_levels.dedup();
        let mut listed = BTreeSet::new();
        spec.hard
            .monophonic_tracks
            .retain(|t| listed.insert(t.clone()));
        let known = spec.hard.required_tracks.iter().cloned().collect();
        let monophonic = spec.hard.monophonic_tracks.iter().cloned().collect();
        ConstraintModel {
            spec,
            known,
            monophonic,
        }
    }

    /// Canonical spec, as sent to collaborators.
    pub fn spec(&self) -> &ConstraintSpec {
        &self.spec
    }

    pub fn hard(&self) -> &HardConstraints {
        &self.spec.hard
    }

    pub fn soft(&self) -> &SoftConstraints {
        &self.spec.soft
    }

    pub fn is_known_track(&self, track: &TrackId) -> bool {
        self.known.contains(track)
    }

    pub fn is_monophonic(&self, track: &TrackId) -> bool {
        self.monophonic.contains(track)
    }

    pub fn known_tracks(&self) -> impl Iterator<Item = &TrackId> {
        self.known.iter()
    }

    pub fn monophonic_tracks(&self) -> impl Iterator<Item = &TrackId> {
        self.monophonic.iter()
    }

    pub fn pitch_range(&self, track: &TrackId) -> Option<PitchRange> {
        self.spec.hard.pitch_ranges.get(track).copied()
    }

    /// Allowed velocities, ascending.
    pub fn velocity_levels(&self) -> &[u8] {
        &self.spec.hard.velocity_levels
    }

    pub fn is_allowed_velocity(&self, velocity: u8) -> bool {
        self.velocity_levels().binary_search(&velocity).is_ok()
    }

    /// Snap a velocity to the nearest allowed level. Ties go to the lower
    /// level.
    pub fn quantize_velocity(&self, velocity: u8) -> u8 {
        self.velocity_levels()
            .iter()
            .copied()
            .min_by_key(|&level| (level.abs_diff(velocity), level))
            .unwrap_or(velocity)
    }

    /// Event budget for a window: `max_events_per_bar` scaled by the window's
    /// share of a bar, rounded up, never below one.
    pub fn max_events_for_window(&self, window: &Window, steps_per_bar: u32) -> u32 {
        let max = self.spec.hard.max_events_per_bar as u64;
        if steps_per_bar == 0 {
            return max as u32;
        }
        let len = window.len() as u64;
        let spb = steps_per_bar as u64;
        let scaled = (max * len).div_ceil(spb);
        scaled.clamp(1, u32::MAX as u64) as u32
    }

    /// Human-readable summary for logs.
    pub fn summary(&self) -> String {
        let hard = &self.spec.hard;
        let soft = &self.spec.soft;
        let join = |tracks: &[TrackId]| {
            tracks
                .iter()
                .map(TrackId::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut lines = vec![
            format!("required tracks: {}", join(hard.required_tracks.as_slice())),
            format!("monophonic tracks: {}", join(hard.monophonic_tracks.as_slice())),
            format!("max events/bar: {}", hard.max_events_per_bar),
            format!("velocity levels: {:?}", hard.velocity_levels),
            format!("forbid overflow: {}", hard.forbid_overflow),
        ];
        for (track, range) in &hard.pitch_ranges {
            lines.push(format!("pitch range {track}: {}-{}", range.min, range.max));
        }
        lines.push(format!(
            "soft: density {}/bar, repetition {:.0}%, grid {} steps, tags [{}]",
            soft.target_density_per_bar,
            soft.target_repetition * 100.0,
            soft.prefer_step_grid,
            soft.style_tags.join(", ")
        ));
        lines.join("\n")
    }
}

fn check_hard(hard: &HardConstraints) -> Result<(), ConfigurationError> {
    if hard.required_tracks.is_empty() {
        return Err(ConfigurationError::NoRequiredTracks);
    }
    let mut required = BTreeSet::new();
    for track in &hard.required_tracks {
        if !required.insert(track) {
            return Err(ConfigurationError::DuplicateTrack(track.clone()));
        }
    }
    for track in &hard.monophonic_tracks {
        if !required.contains(track) {
            return Err(ConfigurationError::MonophonicNotRequired(track.clone()));
        }
    }
    for (track, range) in &hard.pitch_ranges {
        if range.min > range.max {
            return Err(ConfigurationError::InvertedPitchRange {
                track: track.clone(),
                min: range.min,
                max: range.max,
            });
        }
        if range.max > MIDI_MAX {
            return Err(ConfigurationError::PitchOutsideMidi {
                track: track.clone(),
            });
        }
        if !required.contains(track) {
            return Err(ConfigurationError::RangeForUnknownTrack(track.clone()));
        }
    }
    if hard.velocity_levels.is_empty() {
        return Err(ConfigurationError::NoVelocityLevels);
    }
    if let Some(&bad) = hard
        .velocity_levels
        .iter()
        .find(|&&v| v == 0 || v > MIDI_MAX)
    {
        return Err(ConfigurationError::VelocityOutOfRange(bad));
    }
    if hard.max_events_per_bar == 0 {
        return Err(ConfigurationError::ZeroEventBudget);
    }
    Ok(())
}

fn check_soft(soft: &SoftConstraints) -> Result<(), ConfigurationError> {
    let density = soft.target_density_per_bar;
    if !density.is_finite() || density < 0.0 {
        return Err(ConfigurationError::SoftOutOfRange {
            field: "target_density_per_bar",
            value: density,
        });
    }
    let repetition = soft.target_repetition;
    if !(0.0..=1.0).contains(&repetition) {
        return Err(ConfigurationError::SoftOutOfRange {
            field: "target_repetition",
            value: repetition,
        });
    }
    if soft.prefer_step_grid == 0 {
        return Err(ConfigurationError::ZeroStepGrid);
    }
    Ok(())
}
