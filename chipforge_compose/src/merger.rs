// Composition merger: folds a winning variant into the running composition.
//
// A merge either applies completely or not at all. Before touching state it
// checks that the window has not been filled, that it does not start before
// the last filled window ends, and that continuity still holds against the
// composition as it is now (the variant was validated against a snapshot
// that may since have moved). Any failure leaves the composition unchanged,
// so repeating the same call fails the same way.
//
// On success every event is translated from window-relative to absolute
// steps, per-track cursors advance to the furthest end written, and the
// window is recorded as filled.

use chipforge_protocol::{NoteEvent, Variant, Violation, Window};
use thiserror::Error;

use crate::composition::RunningComposition;
use crate::constraints::ConstraintModel;
use crate::validator::check_continuity;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MergeError {
    #[error("variant no longer fits the composition ({} continuity violations)", .violations.len())]
    StaleSnapshot { violations: Vec<Violation> },

    #[error("window {0} is already filled")]
    WindowAlreadyFilled(Window),

    #[error("window {window} starts before the last filled window ends at step {last_end}")]
    OutOfOrder { window: Window, last_end: u32 },
}

pub fn merge(
    running: &mut RunningComposition,
    constraints: &ConstraintModel,
    window: &Window,
    winner: &Variant,
) -> Result<(), MergeError> {
    if running.is_filled(window) {
        return Err(MergeError::WindowAlreadyFilled(*window));
    }
    if let Some(last_end) = running.last_filled_end() {
        if window.start_step < last_end {
            return Err(MergeError::OutOfOrder {
                window: *window,
                last_end,
            });
        }
    }

    let violations = check_continuity(winner, constraints, running, window);
    if !violations.is_empty() {
        return Err(MergeError::StaleSnapshot { violations });
    }

    let events: Vec<NoteEvent> = winner
        .events
        .iter()
        .map(|e| NoteEvent {
            start_step: window.absolute(e.start_step),
            ..e.clone()
        })
        .collect();
    let count = events.len();
    running.commit(*window, events);
    tracing::debug!(
        window = %window,
        variant = %winner.id,
        events = count,
        version = running.version(),
        "merged variant"
    );
    Ok(())
}
