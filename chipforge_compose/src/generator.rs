// Algorithmic generator: a seeded, rule-based `Generator` for offline runs
// and tests.
//
// Each variant is built from fixed rhythm patterns on a 16-step bar:
// - melody (pulse1): quarters, eighths, or a syncopated figure, picked by
//   variant index; pitches drawn from the key's scale across two octaves
//   above middle C.
// - harmony (pulse2, from the second variant on): two half-bar notes from
//   the lower half of the scale.
// - bass (triangle): root or fifth on one of four patterns.
// - drums (noise): kick on 0 and 8, snare on 4 and 12, off-beat hi-hats from
//   the second variant on. Overlaps are removed keeping the earliest hit.
//
// Only tracks the constraint set requires are written. Pitches are clamped
// into the configured ranges and velocities come from the allowed levels.
// Durations never run past the next onset or the window end, and notes that
// would start before a track's cursor are dropped, so under the default
// model every variant is admissible.
//
// Randomness is seeded from (seed, bar, attempt, variant index), so a retry
// of the same window produces different material and a rerun reproduces it.

use async_trait::async_trait;
use chipforge_prng::StepRng;
use chipforge_protocol::{
    CandidateRequest, ConstraintSpec, NoteEvent, PitchRange, TrackId, Variant, Window,
};

use crate::collaborator::Generator;
use crate::error::CollaboratorError;

const MELODY_TRACK: &str = "pulse1";
const HARMONY_TRACK: &str = "pulse2";
const BASS_TRACK: &str = "triangle";
const DRUM_TRACK: &str = "noise";

const MELODY_BASE: u8 = 60;
const HARMONY_BASE: u8 = 55;
const BASS_BASE: u8 = 36;

const KICK: u8 = 36;
const SNARE: u8 = 38;
const HIHAT: u8 = 42;

const MELODY_PATTERNS: [&[u32]; 3] = [
    &[0, 4, 8, 12],
    &[0, 2, 4, 6, 8, 10, 12, 14],
    &[0, 3, 6, 8, 11, 14],
];

const BASS_PATTERNS: [&[u32]; 4] = [
    &[0, 4, 8, 12],
    &[0, 8],
    &[0, 4, 6, 8, 12, 14],
    &[0, 2, 4, 6, 8, 10, 12, 14],
];

const HARMONY_PATTERN: &[u32] = &[0, 8];
const KICK_STEPS: &[u32] = &[0, 8];
const SNARE_STEPS: &[u32] = &[4, 12];
const HIHAT_STEPS: &[u32] = &[2, 6, 10, 14];

/// Scale degrees (semitones above the tonic) for a key name. Unknown keys
/// fall back to the major pentatonic.
pub fn scale_for_key(key: &str) -> &'static [u8] {
    match key {
        "C" => &[0, 2, 4, 5, 7, 9, 11],
        "Cm" => &[0, 2, 3, 5, 7, 8, 10],
        "Cm_penta" => &[0, 3, 5, 7, 10],
        _ => &[0, 2, 4, 7, 9],
    }
}

#[derive(Clone, Debug)]
pub struct AlgorithmicGenerator {
    seed: u64,
    key: String,
}

impl AlgorithmicGenerator {
    pub fn new(seed: u64, key: impl Into<String>) -> Self {
        AlgorithmicGenerator {
            seed,
            key: key.into(),
        }
    }

    /// Build all requested variants for one request.
    pub fn generate(&self, request: &CandidateRequest) -> Vec<Variant> {
        (0..request.num_variants)
            .map(|i| self.variant(request, i))
            .collect()
    }

    fn variant(&self, request: &CandidateRequest, index: u32) -> Variant {
        let window = request.window;
        let mut rng = StepRng::from_parts(&[
            self.seed,
            window.bar_index as u64,
            request.attempt as u64,
            index as u64,
        ]);
        let ctx = Context::new(&request.constraints, &window, self.scale());
        let thin = request
            .hints
            .iter()
            .any(|h| h.code == "density_exceeded" || h.code == "high_density");

        let mut events = Vec::new();
        if ctx.requires(MELODY_TRACK) {
            events.extend(ctx.melody(&mut rng, index, thin));
        }
        if ctx.requires(HARMONY_TRACK) && index > 0 {
            events.extend(ctx.harmony(&mut rng));
        }
        if ctx.requires(BASS_TRACK) {
            events.extend(ctx.bass(&mut rng, index));
        }
        if ctx.requires(DRUM_TRACK) {
            events.extend(ctx.drums(index));
        }
        events.retain(|e| {
            request
                .cursors
                .get(&e.track)
                .is_none_or(|&cursor| window.absolute(e.start_step) >= cursor)
        });

        let flavour = match index {
            0 => "conservative",
            1 => "melodic",
            _ => "experimental",
        };
        Variant::new(
            format!(
                "algo_b{}_a{}_v{}",
                window.bar_index, request.attempt, index
            ),
            events,
        )
        .with_tags(["algorithmic".to_string(), format!("variant_{index}"), flavour.to_string()])
    }

    fn scale(&self) -> &'static [u8] {
        scale_for_key(&self.key)
    }
}

#[async_trait]
impl Generator for AlgorithmicGenerator {
    fn name(&self) -> &str {
        "algorithmic"
    }

    async fn propose(&self, request: &CandidateRequest) -> Result<Vec<Variant>, CollaboratorError> {
        Ok(self.generate(request))
    }
}

/// Per-request view of the constraints the patterns need.
struct Context<'a> {
    spec: &'a ConstraintSpec,
    len: u32,
    scale: &'static [u8],
    levels: Vec<u8>,
}

impl<'a> Context<'a> {
    fn new(spec: &'a ConstraintSpec, window: &Window, scale: &'static [u8]) -> Self {
        let mut levels = spec.hard.velocity_levels.clone();
        levels.sort_unstable();
        levels.dedup();
        if levels.is_empty() {
            levels.push(100);
        }
        Context {
            spec,
            len: window.len(),
            scale,
            levels,
        }
    }

    fn requires(&self, track: &str) -> bool {
        self.spec
            .hard
            .required_tracks
            .iter()
            .any(|t| t.as_str() == track)
    }

    fn clamp(&self, track: &str, pitch: u8) -> u8 {
        match self.spec.hard.pitch_ranges.get(&TrackId::from(track)) {
            Some(range) => range.clamp(pitch),
            None => PitchRange::new(0, 127).clamp(pitch),
        }
    }

    fn loudest(&self) -> u8 {
        self.levels[self.levels.len() - 1]
    }

    fn softest(&self) -> u8 {
        self.levels[0]
    }

    fn middle(&self) -> u8 {
        self.levels[self.levels.len() / 2]
    }

    /// Onsets that fit the window, each with a duration that reaches at most
    /// `max_dur`, the next onset, or the window end.
    fn timed(&self, pattern: &[u32], max_dur: u32) -> Vec<(u32, u32)> {
        let steps: Vec<u32> = pattern.iter().copied().filter(|&s| s < self.len).collect();
        steps
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                let next = steps.get(i + 1).copied().unwrap_or(self.len);
                (s, max_dur.min(next - s))
            })
            .collect()
    }

    fn melody(&self, rng: &mut StepRng, index: u32, thin: bool) -> Vec<NoteEvent> {
        let pattern = MELODY_PATTERNS[index as usize % MELODY_PATTERNS.len()];
        let pattern: Vec<u32> = if thin {
            pattern.iter().copied().step_by(2).collect()
        } else {
            pattern.to_vec()
        };
        self.timed(&pattern, 4)
            .into_iter()
            .map(|(step, dur)| {
                let degree = rng.pick(self.scale).copied().unwrap_or(0);
                let octave = if rng.random_bool(0.5) { 12 } else { 0 };
                let pitch = self.clamp(MELODY_TRACK, MELODY_BASE + degree + octave);
                let velocity = rng.pick(&self.levels).copied().unwrap_or(100);
                NoteEvent::note(MELODY_TRACK, pitch, velocity, step, dur)
            })
            .collect()
    }

    fn harmony(&self, rng: &mut StepRng) -> Vec<NoteEvent> {
        let lower = &self.scale[..self.scale.len().div_ceil(2)];
        self.timed(HARMONY_PATTERN, 8)
            .into_iter()
            .map(|(step, dur)| {
                let degree = rng.pick(lower).copied().unwrap_or(0);
                let pitch = self.clamp(HARMONY_TRACK, HARMONY_BASE + degree);
                NoteEvent::note(HARMONY_TRACK, pitch, self.softest(), step, dur)
            })
            .collect()
    }

    fn bass(&self, rng: &mut StepRng, index: u32) -> Vec<NoteEvent> {
        let pattern = BASS_PATTERNS[index as usize % BASS_PATTERNS.len()];
        let fifth = if self.scale.contains(&7) { 7 } else { self.scale[0] };
        let choices = [self.scale[0], fifth];
        self.timed(pattern, 4)
            .into_iter()
            .map(|(step, dur)| {
                let degree = rng.pick(&choices).copied().unwrap_or(0);
                let pitch = self.clamp(BASS_TRACK, BASS_BASE + degree);
                NoteEvent::note(BASS_TRACK, pitch, self.middle(), step, dur)
            })
            .collect()
    }

    fn drums(&self, index: u32) -> Vec<NoteEvent> {
        let mut hits: Vec<NoteEvent> = Vec::new();
        let mut add = |steps: &[u32], pitch: u8, velocity: u8, dur: u32| {
            for &s in steps.iter().filter(|&&s| s < self.len) {
                let dur = dur.min(self.len - s);
                hits.push(NoteEvent::note(DRUM_TRACK, self.clamp(DRUM_TRACK, pitch), velocity, s, dur));
            }
        };
        add(KICK_STEPS, KICK, self.loudest(), 2);
        add(SNARE_STEPS, SNARE, self.middle(), 2);
        if index > 0 {
            add(HIHAT_STEPS, HIHAT, self.softest(), 1);
        }
        remove_overlaps(hits)
    }
}

/// Keep the earliest (then loudest) hit wherever two overlap.
fn remove_overlaps(mut events: Vec<NoteEvent>) -> Vec<NoteEvent> {
    events.sort_by_key(|e| (e.start_step, std::cmp::Reverse(e.velocity)));
    let mut kept: Vec<NoteEvent> = Vec::with_capacity(events.len());
    for e in events {
        if kept.last().is_none_or(|last| e.start_step >= last.end_step()) {
            kept.push(e);
        }
    }
    kept
}
