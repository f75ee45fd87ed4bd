// chipforge_protocol — data exchanged between the composition pipeline and
// its collaborators.
//
// Everything here is plain serializable data with no behaviour beyond small
// accessors; validation and orchestration live in `chipforge_compose`. The
// generator and critic may be out-of-process or LLM-backed, so every type
// round-trips through JSON.
//
// Module overview:
// - `types.rs`:       `TrackId`, `VariantId`, `Window`, `NoteEvent`, `Variant`.
// - `constraints.rs`: Unvalidated `ConstraintSpec` (hard + soft sections).
// - `verdict.rs`:     `RuleId`, `Violation`, `ValidationVerdict`.
// - `critique.rs`:    `Metrics`, `ScoreRecord`, `Hint`.
// - `message.rs`:     Collaborator requests, window states, `RunResult`.
// - `score.rs`:       Exported `ScoreV1` artifact.

pub mod constraints;
pub mod critique;
pub mod message;
pub mod score;
pub mod types;
pub mod verdict;

pub use constraints::{ConstraintSpec, HardConstraints, PitchRange, SoftConstraints};
pub use critique::{Hint, HintPriority, HintTarget, Metrics, ScoreRecord};
pub use message::{
    CandidateRequest, CandidateResponse, CritiqueRequest, FailedWindow, RunResult, RunStatus,
    RunSummary, WindowReport, WindowState,
};
pub use score::{Resolution, ScoreMetadata, ScoreV1, TrackDecl, TrackRole};
pub use types::{EventKind, NoteEvent, TrackId, Variant, VariantId, Window};
pub use verdict::{RuleId, ValidationVerdict, Violation};
