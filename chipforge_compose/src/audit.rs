// Whole-score audit.
//
// Re-checks a finished `ScoreV1` against the constraint model as a single
// piece, independent of how it was assembled window by window. A clean run
// produces no findings; anything reported here means a merge let something
// through or the score was edited by hand.

use std::collections::BTreeMap;
use std::fmt;

use chipforge_protocol::{NoteEvent, ScoreV1, TrackId};
use serde::{Deserialize, Serialize};

use crate::constraints::ConstraintModel;
use crate::validator::overlapping_starts;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    MissingTrack,
    OverfullBar,
    MonophonicOverlap,
    PitchOutOfRange,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditFinding {
    pub kind: AuditKind,
    pub track: Option<TrackId>,
    pub bar: Option<u32>,
    pub message: String,
}

impl fmt::Display for AuditFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

pub fn audit_score(score: &ScoreV1, constraints: &ConstraintModel) -> Vec<AuditFinding> {
    let mut findings = Vec::new();

    for track in constraints.known_tracks() {
        if score.track(track).is_none() {
            findings.push(AuditFinding {
                kind: AuditKind::MissingTrack,
                track: Some(track.clone()),
                bar: None,
                message: format!("required track {track} is not declared"),
            });
        }
    }

    let spb = score.resolution.steps_per_bar();
    if spb > 0 {
        let mut per_bar: BTreeMap<u32, u32> = BTreeMap::new();
        for e in &score.events {
            *per_bar.entry(e.start_step / spb).or_default() += 1;
        }
        let max = constraints.hard().max_events_per_bar;
        for (bar, count) in per_bar {
            if count > max {
                findings.push(AuditFinding {
                    kind: AuditKind::OverfullBar,
                    track: None,
                    bar: Some(bar),
                    message: format!("bar {bar} has {count} events, limit is {max}"),
                });
            }
        }
    }

    let mut by_track: BTreeMap<&TrackId, Vec<&NoteEvent>> = BTreeMap::new();
    for e in &score.events {
        by_track.entry(&e.track).or_default().push(e);
    }
    for (track, mut events) in by_track {
        if constraints.is_monophonic(track) {
            events.sort_by_key(|e| (e.start_step, e.dur_steps));
            for step in overlapping_starts(&events) {
                findings.push(AuditFinding {
                    kind: AuditKind::MonophonicOverlap,
                    track: Some(track.clone()),
                    bar: (spb > 0).then(|| step / spb),
                    message: format!("overlapping notes on {track} at step {step}"),
                });
            }
        }
        if let Some(range) = constraints.pitch_range(track) {
            for e in events.iter().filter(|e| !range.contains(e.pitch)) {
                findings.push(AuditFinding {
                    kind: AuditKind::PitchOutOfRange,
                    track: Some(track.clone()),
                    bar: (spb > 0).then(|| e.start_step / spb),
                    message: format!(
                        "pitch {} on {track} at step {} is outside {}..={}",
                        e.pitch, e.start_step, range.min, range.max
                    ),
                });
            }
        }
    }

    findings
}
