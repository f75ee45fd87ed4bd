// The running composition: the one piece of state that spans a whole run.
//
// Holds every merged event in absolute steps, a per-track cursor (exclusive
// end step of the furthest merged note on that track), and the list of
// filled windows. It is created empty, owned by exactly one run, and mutated
// only through `merger::merge`. A clone is a consistent snapshot, which is
// what validation runs against.
//
// `snapshot()` turns the accumulator into the exported `ScoreV1` shape.

use std::collections::BTreeMap;

use chipforge_protocol::{
    NoteEvent, Resolution, ScoreMetadata, ScoreV1, TrackDecl, TrackId, Window,
};

#[derive(Clone, Debug, PartialEq)]
pub struct RunningComposition {
    metadata: ScoreMetadata,
    resolution: Resolution,
    tracks: Vec<TrackDecl>,
    events: Vec<NoteEvent>,
    cursors: BTreeMap<TrackId, u32>,
    filled: Vec<Window>,
    /// Bumped on every successful merge.
    version: u64,
}

impl RunningComposition {
    pub fn new(metadata: ScoreMetadata, resolution: Resolution, tracks: Vec<TrackDecl>) -> Self {
        RunningComposition {
            metadata,
            resolution,
            tracks,
            events: Vec::new(),
            cursors: BTreeMap::new(),
            filled: Vec::new(),
            version: 0,
        }
    }

    pub fn metadata(&self) -> &ScoreMetadata {
        &self.metadata
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn steps_per_bar(&self) -> u32 {
        self.resolution.steps_per_bar()
    }

    pub fn tracks(&self) -> &[TrackDecl] {
        &self.tracks
    }

    /// Merged events in absolute steps, in merge order.
    pub fn events(&self) -> &[NoteEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Exclusive end step of the last merged note on `track`.
    pub fn cursor(&self, track: &TrackId) -> Option<u32> {
        self.cursors.get(track).copied()
    }

    pub fn cursors(&self) -> &BTreeMap<TrackId, u32> {
        &self.cursors
    }

    pub fn filled_windows(&self) -> &[Window] {
        &self.filled
    }

    pub fn is_filled(&self, window: &Window) -> bool {
        self.filled.contains(window)
    }

    /// End step of the most recently filled window.
    pub fn last_filled_end(&self) -> Option<u32> {
        self.filled.last().map(|w| w.end_step)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Apply already-translated events. Callers must have checked every
    /// invariant first; this cannot fail.
    pub(crate) fn commit(&mut self, window: Window, events: Vec<NoteEvent>) {
        for e in &events {
            let cursor = self.cursors.entry(e.track.clone()).or_insert(0);
            *cursor = (*cursor).max(e.end_step());
        }
        self.events.extend(events);
        self.filled.push(window);
        self.version += 1;
    }

    /// Immutable export of the composition so far. Events are ordered by
    /// start step, then track.
    pub fn snapshot(&self) -> ScoreV1 {
        let mut score = ScoreV1::empty(
            self.metadata.clone(),
            self.resolution,
            self.tracks.clone(),
        );
        let mut events = self.events.clone();
        events.sort_by(|a, b| {
            a.start_step
                .cmp(&b.start_step)
                .then_with(|| a.track.cmp(&b.track))
        });
        score.events = events;
        score
    }
}
