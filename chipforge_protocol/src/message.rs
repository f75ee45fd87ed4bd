// Messages exchanged with the external collaborators, and the run result.
//
// - `CandidateRequest` / `CandidateResponse`: orchestrator to generator.
//   The request carries per-track cursors rather than the event history so
//   payload size stays bounded as the composition grows.
// - `CritiqueRequest`: orchestrator to critic; the reply is a `ScoreRecord`.
// - `RunResult`: what a finished run hands back to its caller. Failed
//   windows are listed with their last violations; nothing is skipped
//   silently.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constraints::ConstraintSpec;
use crate::critique::Hint;
use crate::score::ScoreV1;
use crate::types::{TrackId, Variant, VariantId, Window};
use crate::verdict::Violation;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateRequest {
    pub window: Window,
    pub constraints: ConstraintSpec,
    /// Exclusive end step of the last merged event, per track.
    pub cursors: BTreeMap<TrackId, u32>,
    #[serde(default)]
    pub hints: Vec<Hint>,
    /// Zero-based attempt number for this window.
    pub attempt: u32,
    /// How many variants the orchestrator would like.
    pub num_variants: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateResponse {
    pub variants: Vec<Variant>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CritiqueRequest {
    pub window: Window,
    pub variant: Variant,
}

/// Per-window lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowState {
    Pending,
    Proposing,
    Validating,
    Merged,
    Regenerating,
    Abandoned,
}

impl WindowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WindowState::Merged | WindowState::Abandoned)
    }
}

/// Trace of one window's trip through the state machine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowReport {
    pub window: Window,
    /// Every state entered, starting with `Pending`.
    pub transitions: Vec<WindowState>,
    pub attempts_used: u32,
    pub merged_variant: Option<VariantId>,
    pub merged_score: Option<f64>,
}

impl WindowReport {
    pub fn final_state(&self) -> WindowState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(WindowState::Pending)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailedWindow {
    pub window: Window,
    pub last_violations: Vec<Violation>,
    pub attempts_used: u32,
    /// Collaborator failure on the last attempt, if that is why it failed.
    pub last_error: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Partial,
    Failed,
}

/// Aggregate statistics for a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_events: usize,
    pub events_per_track: BTreeMap<TrackId, usize>,
    /// Mean score of merged variants; zero if none merged.
    pub average_score: f64,
    /// Variants that passed validation, counted per variant across all attempts.
    pub validation_passes: u32,
    pub validation_failures: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub filled_windows: Vec<Window>,
    pub failed_windows: Vec<FailedWindow>,
    /// Windows never attempted because the run stopped early.
    #[serde(default)]
    pub unattempted_windows: Vec<Window>,
    pub window_reports: Vec<WindowReport>,
    pub summary: RunSummary,
    pub final_composition: Option<ScoreV1>,
}
