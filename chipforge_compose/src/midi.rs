// MIDI output from exported scores.
//
// Converts a `ScoreV1` into a Standard MIDI File for playback. Track 0 holds
// the tempo; every declared score track gets its own MIDI track with a name
// and a program change. Drum-role tracks go to channel 10 (index 9); the
// others take the remaining channels in declaration order.
//
// Steps map to ticks through the score's resolution: a beat is a quarter
// note of `TICKS_PER_QUARTER` ticks. Uses the `midly` crate, SMF Format 1.

use std::path::Path;

use chipforge_protocol::{ScoreV1, TrackDecl, TrackRole};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};

use crate::error::ExportError;

/// Ticks per quarter note in MIDI output.
const TICKS_PER_QUARTER: u16 = 480;

const DRUM_CHANNEL: u8 = 9;

/// Convert a score to MIDI and write it to `path`.
pub fn write_midi(score: &ScoreV1, path: &Path) -> Result<(), ExportError> {
    let smf = score_to_smf(score);
    let mut buf = Vec::new();
    smf.write_std(&mut buf)?;
    std::fs::write(path, &buf)?;
    Ok(())
}

fn ticks_per_step(score: &ScoreV1) -> u32 {
    TICKS_PER_QUARTER as u32 / score.resolution.steps_per_beat.max(1)
}

/// Channel per declared track.
fn channels(tracks: &[TrackDecl]) -> Vec<u8> {
    let mut next = 0u8;
    tracks
        .iter()
        .map(|t| {
            if t.role == TrackRole::Drums {
                return DRUM_CHANNEL;
            }
            if next == DRUM_CHANNEL {
                next += 1;
            }
            let ch = next.min(15);
            next = next.saturating_add(1);
            ch
        })
        .collect()
}

/// Convert a score to an in-memory SMF borrowing the score's track names.
pub fn score_to_smf(score: &ScoreV1) -> Smf<'_> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    let tempo_microseconds = 60_000_000 / score.metadata.tempo_bpm.max(1) as u32;
    smf.tracks.push(vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo_microseconds))),
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]);

    let tps = ticks_per_step(score);
    for (decl, ch) in score.tracks.iter().zip(channels(&score.tracks)) {
        let channel = u4::new(ch);
        let mut track: Track<'_> = vec![
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::TrackName(decl.id.as_str().as_bytes())),
            },
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::ProgramChange {
                        program: u7::new(decl.program.min(127)),
                    },
                },
            },
        ];

        // (tick, is_on, key, vel); offs sort before ons at the same tick so
        // back-to-back notes on one key retrigger cleanly.
        let mut timeline: Vec<(u32, bool, u8, u8)> = Vec::new();
        for e in score.events_for_track(&decl.id) {
            let on = e.start_step.saturating_mul(tps);
            let off = e.end_step().saturating_mul(tps);
            timeline.push((on, true, e.pitch.min(127), e.velocity.min(127)));
            timeline.push((off, false, e.pitch.min(127), 0));
        }
        timeline.sort();

        let mut last_tick = 0u32;
        for (tick, is_on, key, vel) in timeline {
            let message = if is_on {
                MidiMessage::NoteOn {
                    key: u7::new(key),
                    vel: u7::new(vel),
                }
            } else {
                MidiMessage::NoteOff {
                    key: u7::new(key),
                    vel: u7::new(0),
                }
            };
            track.push(TrackEvent {
                delta: u28::new(tick - last_tick),
                kind: TrackEventKind::Midi { channel, message },
            });
            last_tick = tick;
        }

        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        smf.tracks.push(track);
    }

    smf
}
