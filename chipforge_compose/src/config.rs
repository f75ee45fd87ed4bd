// Run configuration, loaded from JSON.
//
// `ProjectConfig` groups three sections, each optional in the file and
// defaulted when absent:
// - `run`:         orchestration tunables (`RunConfig`): acceptance threshold,
//                  retry budget, per-call timeout, candidates per window, and
//                  whether a run continues past an abandoned window.
// - `composition`: what is being written (`CompositionSettings`): title,
//                  tempo, key, meter, length, resolution, generator seed.
// - `constraints`: the raw `ConstraintSpec`, validated into a
//                  `ConstraintModel` before any window is attempted.
//
// Everything is checked up front; a bad value is a `ConfigurationError` and
// the run never starts.

use std::path::Path;
use std::time::Duration;

use chipforge_protocol::{ConstraintSpec, Resolution, ScoreMetadata, TrackDecl, TrackRole, Window};
use serde::{Deserialize, Serialize};

use crate::constraints::ConstraintModel;
use crate::error::{ConfigLoadError, ConfigurationError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Minimum score (0..=100) the best admissible candidate must reach to
    /// be merged. Zero accepts any admissible candidate.
    pub acceptance_threshold: f64,
    /// Retries after the first attempt. A window gets `retry_budget + 1`
    /// attempts in total.
    pub retry_budget: u32,
    /// Upper bound on any single generator or critic call.
    pub call_timeout_ms: u64,
    pub variants_per_window: u32,
    /// Keep going after a window is abandoned. The default stops the run and
    /// reports the remaining windows as unattempted.
    pub continue_after_abandon: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            acceptance_threshold: 0.0,
            retry_budget: 2,
            call_timeout_ms: 30_000,
            variants_per_window: 3,
            continue_after_abandon: false,
        }
    }
}

impl RunConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn max_attempts(&self) -> u32 {
        self.retry_budget.saturating_add(1)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.acceptance_threshold.is_finite()
            || !(0.0..=100.0).contains(&self.acceptance_threshold)
        {
            return Err(ConfigurationError::InvalidRunConfig(format!(
                "acceptance_threshold {} is outside 0..=100",
                self.acceptance_threshold
            )));
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigurationError::InvalidRunConfig(
                "call_timeout_ms must be positive".into(),
            ));
        }
        if self.variants_per_window == 0 {
            return Err(ConfigurationError::InvalidRunConfig(
                "variants_per_window must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionSettings {
    pub title: String,
    pub tempo_bpm: u16,
    pub key: String,
    pub time_signature: String,
    pub length_bars: u32,
    pub steps_per_beat: u32,
    /// Seed for the algorithmic generator.
    pub seed: u64,
}

impl Default for CompositionSettings {
    fn default() -> Self {
        CompositionSettings {
            title: "Untitled Chiptune".into(),
            tempo_bpm: 140,
            key: "C".into(),
            time_signature: "4/4".into(),
            length_bars: 8,
            steps_per_beat: 4,
            seed: 0,
        }
    }
}

/// Finest resolution that still maps every step to a whole MIDI tick.
pub const MAX_STEPS_PER_BEAT: u32 = 480;
pub const MAX_LENGTH_BARS: u32 = 4096;

impl CompositionSettings {
    /// Beats per bar from the time signature numerator.
    fn beats_per_bar(&self) -> Option<u32> {
        let (num, den) = self.time_signature.split_once('/')?;
        let num: u32 = num.trim().parse().ok()?;
        let den: u32 = den.trim().parse().ok()?;
        (num > 0 && den > 0).then_some(num)
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            steps_per_beat: self.steps_per_beat,
            beats_per_bar: self.beats_per_bar().unwrap_or(4),
        }
    }

    pub fn metadata(&self) -> ScoreMetadata {
        ScoreMetadata {
            title: self.title.clone(),
            tempo_bpm: self.tempo_bpm,
            time_signature: self.time_signature.clone(),
            key: self.key.clone(),
            length_bars: self.length_bars,
        }
    }

    /// One window per bar, in order.
    pub fn windows(&self) -> Vec<Window> {
        let spb = self.resolution().steps_per_bar();
        (0..self.length_bars)
            .map(|bar| Window::for_bar(bar, spb))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let bad = |msg: String| Err(ConfigurationError::InvalidRunConfig(msg));
        if self.tempo_bpm == 0 {
            return bad("tempo_bpm must be positive".into());
        }
        if self.length_bars == 0 {
            return bad("length_bars must be positive".into());
        }
        if self.length_bars > MAX_LENGTH_BARS {
            return bad(format!(
                "length_bars {} exceeds {MAX_LENGTH_BARS}",
                self.length_bars
            ));
        }
        if self.steps_per_beat == 0 {
            return bad("steps_per_beat must be positive".into());
        }
        if self.steps_per_beat > MAX_STEPS_PER_BEAT {
            return bad(format!(
                "steps_per_beat {} exceeds {MAX_STEPS_PER_BEAT}",
                self.steps_per_beat
            ));
        }
        let Some(beats) = self.beats_per_bar() else {
            return bad(format!("cannot parse time signature {:?}", self.time_signature));
        };
        let total = self
            .steps_per_beat
            .checked_mul(beats)
            .and_then(|spb| spb.checked_mul(self.length_bars));
        if total.is_none() {
            return bad(format!(
                "{} bars of {} at {} steps per beat overflow the step counter",
                self.length_bars, self.time_signature, self.steps_per_beat
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub composition: CompositionSettings,
    #[serde(default = "ConstraintSpec::default_8bit")]
    pub constraints: ConstraintSpec,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        ProjectConfig {
            run: RunConfig::default(),
            composition: CompositionSettings::default(),
            constraints: ConstraintSpec::default_8bit(),
        }
    }
}

impl ProjectConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigLoadError> {
        let config: ProjectConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigLoadError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Check every section, building the constraint model on the way.
    pub fn validate(&self) -> Result<ConstraintModel, ConfigurationError> {
        self.run.validate()?;
        self.composition.validate()?;
        ConstraintModel::new(self.constraints.clone())
    }
}

/// Track declarations for the exported score: the chip channel preset for
/// known channel names, a generic melody track otherwise.
pub fn track_decls(spec: &ConstraintSpec) -> Vec<TrackDecl> {
    let preset = TrackDecl::chip_channels();
    spec.hard
        .required_tracks
        .iter()
        .map(|id| {
            let mut decl = preset
                .iter()
                .find(|d| &d.id == id)
                .cloned()
                .unwrap_or_else(|| TrackDecl::new(id.clone(), TrackRole::Melody, 80));
            decl.monophonic = spec.hard.monophonic_tracks.contains(id);
            decl
        })
        .collect()
}
