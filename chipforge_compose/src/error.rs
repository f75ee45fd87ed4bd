// Error types for the composition pipeline.
//
// Only `ConfigurationError` aborts a run, and only before any window is
// attempted. Collaborator failures are folded into the window state machine
// as "zero candidates"; merge errors live next to the merger in `merger.rs`.

use std::path::PathBuf;

use chipforge_protocol::TrackId;
use thiserror::Error;

/// Malformed constraint model or run configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    #[error("constraint model must require at least one track")]
    NoRequiredTracks,

    #[error("required track {0} is listed more than once")]
    DuplicateTrack(TrackId),

    #[error("pitch range for {track} is inverted: min {min} > max {max}")]
    InvertedPitchRange { track: TrackId, min: u8, max: u8 },

    #[error("pitch range for {track} leaves the MIDI range 0..=127")]
    PitchOutsideMidi { track: TrackId },

    #[error("pitch range given for undeclared track {0}")]
    RangeForUnknownTrack(TrackId),

    #[error("monophonic track {0} is not a required track")]
    MonophonicNotRequired(TrackId),

    #[error("velocity level list is empty")]
    NoVelocityLevels,

    #[error("velocity level {0} is outside 1..=127")]
    VelocityOutOfRange(u8),

    #[error("max_events_per_bar must be at least 1")]
    ZeroEventBudget,

    #[error("soft constraint {field} is out of range: {value}")]
    SoftOutOfRange { field: &'static str, value: f64 },

    #[error("prefer_step_grid must be at least 1")]
    ZeroStepGrid,

    #[error("invalid run configuration: {0}")]
    InvalidRunConfig(String),
}

/// A generator or critic call that produced nothing usable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollaboratorError {
    #[error("{role} call timed out after {timeout_ms} ms")]
    Timeout { role: &'static str, timeout_ms: u64 },

    #[error("{role} call failed: {reason}")]
    Failed { role: &'static str, reason: String },

    #[error("invalid {role} response: {reason}")]
    InvalidResponse { role: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] ConfigurationError),
}
