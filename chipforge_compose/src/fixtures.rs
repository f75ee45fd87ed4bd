// Shared builders for unit tests.

use chipforge_protocol::{Resolution, ScoreMetadata, TrackDecl};

use crate::composition::RunningComposition;
use crate::constraints::ConstraintModel;

/// Empty 4/4 composition at 16 steps per bar with the four chip channels.
pub fn composition(length_bars: u32) -> RunningComposition {
    RunningComposition::new(
        ScoreMetadata {
            title: "Fixture".into(),
            tempo_bpm: 140,
            time_signature: "4/4".into(),
            key: "C".into(),
            length_bars,
        },
        Resolution::default(),
        TrackDecl::chip_channels(),
    )
}

/// The 8-bit preset with a different per-bar event budget.
pub fn one_bar_model(max_events_per_bar: u32) -> ConstraintModel {
    let mut spec = ConstraintModel::default_8bit().spec().clone();
    spec.hard.max_events_per_bar = max_events_per_bar;
    ConstraintModel::new(spec).unwrap()
}
