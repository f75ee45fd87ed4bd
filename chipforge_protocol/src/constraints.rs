// Plain-data constraint set (`constraints.v1`).
//
// This is the unvalidated, serializable form that travels on the wire and in
// config files. `chipforge_compose::constraints::ConstraintModel` wraps it
// after checking invariants and canonicalizing velocity levels; nothing
// downstream of that constructor looks at a raw `ConstraintSpec`.
//
// Hard constraints reject variants. Soft constraints only feed scoring.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::TrackId;

/// Inclusive MIDI pitch range for one track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitchRange {
    pub min: u8,
    pub max: u8,
}

impl PitchRange {
    pub fn new(min: u8, max: u8) -> Self {
        PitchRange { min, max }
    }

    pub fn contains(&self, pitch: u8) -> bool {
        (self.min..=self.max).contains(&pitch)
    }

    /// Clamp a pitch into the range.
    pub fn clamp(&self, pitch: u8) -> u8 {
        pitch.clamp(self.min, self.max.max(self.min))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HardConstraints {
    pub required_tracks: Vec<TrackId>,
    #[serde(default)]
    pub monophonic_tracks: Vec<TrackId>,
    #[serde(default = "default_max_events_per_bar")]
    pub max_events_per_bar: u32,
    #[serde(default)]
    pub pitch_ranges: BTreeMap<TrackId, PitchRange>,
    #[serde(default = "default_velocity_levels")]
    pub velocity_levels: Vec<u8>,
    #[serde(default = "default_true")]
    pub forbid_overflow: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoftConstraints {
    #[serde(default = "default_target_density")]
    pub target_density_per_bar: f64,
    /// Target share of repeated pitches, 0..=1.
    #[serde(default = "default_target_repetition")]
    pub target_repetition: f64,
    /// Preferred onset grid in steps.
    #[serde(default = "default_step_grid")]
    pub prefer_step_grid: u32,
    #[serde(default)]
    pub style_tags: Vec<String>,
}

impl Default for SoftConstraints {
    fn default() -> Self {
        SoftConstraints {
            target_density_per_bar: default_target_density(),
            target_repetition: default_target_repetition(),
            prefer_step_grid: default_step_grid(),
            style_tags: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSpec {
    pub hard: HardConstraints,
    #[serde(default)]
    pub soft: SoftConstraints,
}

impl ConstraintSpec {
    /// NES-style preset: two pulse channels, triangle bass, noise drums,
    /// all monophonic, three velocity levels.
    pub fn default_8bit() -> Self {
        let tracks: Vec<TrackId> = ["pulse1", "pulse2", "triangle", "noise"]
            .into_iter()
            .map(TrackId::from)
            .collect();
        let mut pitch_ranges = BTreeMap::new();
        pitch_ranges.insert(TrackId::from("pulse1"), PitchRange::new(48, 96)); // C3–C7
        pitch_ranges.insert(TrackId::from("pulse2"), PitchRange::new(48, 96));
        pitch_ranges.insert(TrackId::from("triangle"), PitchRange::new(24, 60)); // C1–C4
        pitch_ranges.insert(TrackId::from("noise"), PitchRange::new(0, 127));

        ConstraintSpec {
            hard: HardConstraints {
                required_tracks: tracks.clone(),
                monophonic_tracks: tracks,
                max_events_per_bar: 32,
                pitch_ranges,
                velocity_levels: vec![64, 100, 127],
                forbid_overflow: true,
            },
            soft: SoftConstraints {
                target_density_per_bar: 8.0,
                target_repetition: 0.3,
                prefer_step_grid: 4,
                style_tags: vec!["8bit".into(), "nes".into(), "chiptune".into()],
            },
        }
    }
}

fn default_max_events_per_bar() -> u32 {
    32
}

fn default_velocity_levels() -> Vec<u8> {
    vec![64, 100, 127]
}

fn default_true() -> bool {
    true
}

fn default_target_density() -> f64 {
    8.0
}

fn default_target_repetition() -> f64 {
    0.3
}

fn default_step_grid() -> u32 {
    4
}
