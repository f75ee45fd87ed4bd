// Validation verdicts and violation records.
//
// A `ValidationVerdict` is the normal outcome of checking a variant: failure
// is data, not an error. Every rule the validator checks is a hard rule, so
// any violation makes the variant inadmissible. Violations are kept in the
// order the validator found them (rule order first, then event order).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::TrackId;

/// Hard rules checked by the window validator, in evaluation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    UnknownTrack,
    RangeViolation,
    InvalidVelocity,
    PolyphonyViolation,
    Overflow,
    DensityExceeded,
    ContinuityViolation,
}

impl RuleId {
    pub const ALL: [RuleId; 7] = [
        RuleId::UnknownTrack,
        RuleId::RangeViolation,
        RuleId::InvalidVelocity,
        RuleId::PolyphonyViolation,
        RuleId::Overflow,
        RuleId::DensityExceeded,
        RuleId::ContinuityViolation,
    ];

    /// Wire name of the rule (`"range_violation"`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            RuleId::UnknownTrack => "unknown_track",
            RuleId::RangeViolation => "range_violation",
            RuleId::InvalidVelocity => "invalid_velocity",
            RuleId::PolyphonyViolation => "polyphony_violation",
            RuleId::Overflow => "overflow",
            RuleId::DensityExceeded => "density_exceeded",
            RuleId::ContinuityViolation => "continuity_violation",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One broken rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: RuleId,
    /// Offending track, when the rule is track-scoped.
    pub track: Option<TrackId>,
    /// Offending step (window-relative), when the rule is event-scoped.
    pub step: Option<u32>,
    pub reason: String,
}

impl Violation {
    pub fn new(rule: RuleId, reason: impl Into<String>) -> Self {
        Violation {
            rule,
            track: None,
            step: None,
            reason: reason.into(),
        }
    }

    pub fn on_track(mut self, track: &TrackId) -> Self {
        self.track = Some(track.clone());
        self
    }

    pub fn at_step(mut self, step: u32) -> Self {
        self.step = Some(step);
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.rule, self.reason)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub admissible: bool,
    pub violations: Vec<Violation>,
}

impl ValidationVerdict {
    pub fn from_violations(violations: Vec<Violation>) -> Self {
        ValidationVerdict {
            admissible: violations.is_empty(),
            violations,
        }
    }

    /// Number of violations of one rule.
    pub fn count(&self, rule: RuleId) -> u32 {
        self.violations.iter().filter(|v| v.rule == rule).count() as u32
    }

    /// Per-rule counts, only for rules that fired.
    pub fn counts(&self) -> BTreeMap<RuleId, u32> {
        let mut out = BTreeMap::new();
        for v in &self.violations {
            *out.entry(v.rule).or_insert(0) += 1;
        }
        out
    }
}
