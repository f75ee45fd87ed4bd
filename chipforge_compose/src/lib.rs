// chipforge_compose: constraint validation and window stitching for chiptune
// composition runs.
//
// A run splits a composition into one window per bar and fills the windows
// in order. For each window a generator proposes candidate variants, the
// validator rejects anything that breaks a hard constraint, a critic scores
// the survivors, the ranker orders them, and the merger folds the winner into
// the running composition. Failed attempts are turned into hints and the
// window is regenerated until it merges or its retry budget runs out.
//
// Architecture:
// - constraints.rs:  `ConstraintModel`, validated once from a `ConstraintSpec`
// - composition.rs:  `RunningComposition`, merged events plus per-track cursors
// - validator.rs:    Hard-rule checks producing a `ValidationVerdict`
// - ranker.rs:       Deterministic total order over scored candidates
// - merger.rs:       All-or-nothing merge into the running composition
// - feedback.rs:     Violations and weak metrics turned into retry hints
// - collaborator.rs: `Generator` / `Critic` traits, timeouts, JSON reply parsing
// - generator.rs:    Seeded algorithmic generator
// - critic.rs:       Metric-based critic
// - orchestrator.rs: Per-window state machine driving a whole run
// - audit.rs:        Whole-score re-check of a finished composition
// - config.rs:       JSON-loadable run, composition, and constraint settings
// - export.rs:       Score and run-result JSON files
// - midi.rs:         Standard MIDI File output
// - error.rs:        Configuration, collaborator, and export errors
//
// Given the same seed and configuration, a run with the built-in
// collaborators is fully deterministic.

pub mod audit;
pub mod collaborator;
pub mod composition;
pub mod config;
pub mod constraints;
pub mod critic;
pub mod error;
pub mod export;
pub mod feedback;
pub mod generator;
pub mod merger;
pub mod midi;
pub mod orchestrator;
pub mod ranker;
pub mod validator;

#[cfg(test)]
mod fixtures;
