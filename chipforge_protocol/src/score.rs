// Exported score format (`score.v1`).
//
// The terminal artifact of a run: metadata, timing resolution, track
// declarations, and a flat list of note events in absolute steps. The
// running composition is translated into this shape once windows are
// filled; the MIDI writer and the whole-score audit both read it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{NoteEvent, TrackId};

pub const SCORE_SCHEMA_VERSION: &str = "score.v1";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreMetadata {
    pub title: String,
    pub tempo_bpm: u16,
    /// "4/4" style.
    pub time_signature: String,
    pub key: String,
    pub length_bars: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub steps_per_beat: u32,
    pub beats_per_bar: u32,
}

impl Resolution {
    pub fn steps_per_bar(&self) -> u32 {
        self.steps_per_beat.saturating_mul(self.beats_per_bar)
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution {
            steps_per_beat: 4,
            beats_per_bar: 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackRole {
    Melody,
    Harmony,
    Bass,
    Drums,
    Fx,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDecl {
    pub id: TrackId,
    pub role: TrackRole,
    #[serde(default = "default_monophonic")]
    pub monophonic: bool,
    /// General MIDI program used on export.
    #[serde(default)]
    pub program: u8,
}

fn default_monophonic() -> bool {
    true
}

impl TrackDecl {
    pub fn new(id: impl Into<TrackId>, role: TrackRole, program: u8) -> Self {
        TrackDecl {
            id: id.into(),
            role,
            monophonic: true,
            program,
        }
    }

    /// The four NES channels with their usual GM stand-in programs.
    pub fn chip_channels() -> Vec<TrackDecl> {
        vec![
            TrackDecl::new("pulse1", TrackRole::Melody, 80),
            TrackDecl::new("pulse2", TrackRole::Harmony, 80),
            TrackDecl::new("triangle", TrackRole::Bass, 38),
            TrackDecl::new("noise", TrackRole::Drums, 0),
        ]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreV1 {
    pub schema_version: String,
    pub metadata: ScoreMetadata,
    pub resolution: Resolution,
    pub tracks: Vec<TrackDecl>,
    #[serde(default)]
    pub events: Vec<NoteEvent>,
}

impl ScoreV1 {
    pub fn empty(metadata: ScoreMetadata, resolution: Resolution, tracks: Vec<TrackDecl>) -> Self {
        ScoreV1 {
            schema_version: SCORE_SCHEMA_VERSION.to_string(),
            metadata,
            resolution,
            tracks,
            events: Vec::new(),
        }
    }

    pub fn track(&self, id: &TrackId) -> Option<&TrackDecl> {
        self.tracks.iter().find(|t| &t.id == id)
    }

    pub fn events_for_track<'a>(&'a self, id: &'a TrackId) -> impl Iterator<Item = &'a NoteEvent> {
        self.events.iter().filter(move |e| &e.track == id)
    }

    /// Events whose onset falls in `[start_step, end_step)`.
    pub fn events_in_range(&self, start_step: u32, end_step: u32) -> Vec<&NoteEvent> {
        self.events
            .iter()
            .filter(|e| e.start_step >= start_step && e.start_step < end_step)
            .collect()
    }

    pub fn total_steps(&self) -> u32 {
        self.metadata
            .length_bars
            .saturating_mul(self.resolution.steps_per_bar())
    }

    /// Event count per track.
    pub fn track_counts(&self) -> BTreeMap<TrackId, usize> {
        let mut out = BTreeMap::new();
        for e in &self.events {
            *out.entry(e.track.clone()).or_insert(0) += 1;
        }
        out
    }
}
