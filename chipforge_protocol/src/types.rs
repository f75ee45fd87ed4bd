// Core value types shared by every chipforge component.
//
// `TrackId` and `VariantId` are string newtypes: track ids are the channel
// names the constraint model declares ("pulse1", "triangle", ...), variant
// ids are whatever the generator assigns. Both order lexicographically, which
// the ranker relies on for its final tie-break.
//
// Event steps inside a `Variant` are relative to the variant's `Window`. The
// merger translates them to absolute steps when they enter the running
// composition; exported scores carry absolute steps in the same `NoteEvent`
// shape.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a channel/track ("pulse1", "noise", ...).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        TrackId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(s: &str) -> Self {
        TrackId(s.to_string())
    }
}

impl From<String> for TrackId {
    fn from(s: String) -> Self {
        TrackId(s)
    }
}

/// Identifier of a candidate variant, unique within one proposal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantId(pub String);

impl VariantId {
    pub fn new(id: impl Into<String>) -> Self {
        VariantId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VariantId {
    fn from(s: &str) -> Self {
        VariantId(s.to_string())
    }
}

impl From<String> for VariantId {
    fn from(s: String) -> Self {
        VariantId(s)
    }
}

/// A contiguous step range `[start_step, end_step)` belonging to one bar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Window {
    pub bar_index: u32,
    pub start_step: u32,
    pub end_step: u32,
}

impl Window {
    pub fn new(bar_index: u32, start_step: u32, end_step: u32) -> Self {
        Window {
            bar_index,
            start_step,
            end_step,
        }
    }

    /// Window covering bar `bar_index` exactly.
    pub fn for_bar(bar_index: u32, steps_per_bar: u32) -> Self {
        let start_step = bar_index.saturating_mul(steps_per_bar);
        Window::new(bar_index, start_step, start_step.saturating_add(steps_per_bar))
    }

    /// Number of steps in the window.
    pub fn len(&self) -> u32 {
        self.end_step.saturating_sub(self.start_step)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Translate a window-relative step to an absolute step.
    pub fn absolute(&self, relative_step: u32) -> u32 {
        self.start_step.saturating_add(relative_step)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bar {} [{}, {})",
            self.bar_index, self.start_step, self.end_step
        )
    }
}

/// Kind of a musical event. Only notes exist today.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[default]
    Note,
}

/// A note on one track.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteEvent {
    #[serde(rename = "type", default)]
    pub kind: EventKind,
    pub track: TrackId,
    /// MIDI pitch in semitones.
    pub pitch: u8,
    pub velocity: u8,
    pub start_step: u32,
    pub dur_steps: u32,
}

impl NoteEvent {
    pub fn note(
        track: impl Into<TrackId>,
        pitch: u8,
        velocity: u8,
        start_step: u32,
        dur_steps: u32,
    ) -> Self {
        NoteEvent {
            kind: EventKind::Note,
            track: track.into(),
            pitch,
            velocity,
            start_step,
            dur_steps,
        }
    }

    /// Exclusive end step.
    pub fn end_step(&self) -> u32 {
        self.start_step.saturating_add(self.dur_steps)
    }

    /// True if the two events' step ranges intersect.
    pub fn overlaps(&self, other: &NoteEvent) -> bool {
        self.start_step < other.end_step() && other.start_step < self.end_step()
    }
}

/// One candidate fragment proposed for a window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub events: Vec<NoteEvent>,
}

impl Variant {
    pub fn new(id: impl Into<VariantId>, events: Vec<NoteEvent>) -> Self {
        Variant {
            id: id.into(),
            tags: BTreeSet::new(),
            events,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Events targeting `track`, in proposal order.
    pub fn events_for<'a>(&'a self, track: &'a TrackId) -> impl Iterator<Item = &'a NoteEvent> {
        self.events.iter().filter(move |e| &e.track == track)
    }

    /// Distinct tracks this variant writes to.
    pub fn tracks(&self) -> BTreeSet<&TrackId> {
        self.events.iter().map(|e| &e.track).collect()
    }
}
