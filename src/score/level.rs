//! Trust levels and progress towards the next one
//!
//! Levels are a pure function of the score:
//! starter 0-30, trusted 31-60, leader 61-100.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;
pub const TRUSTED_THRESHOLD: f64 = 31.0;
pub const LEADER_THRESHOLD: f64 = 61.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Starter,
    Trusted,
    Leader,
}

impl TrustLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= LEADER_THRESHOLD {
            TrustLevel::Leader
        } else if score >= TRUSTED_THRESHOLD {
            TrustLevel::Trusted
        } else {
            TrustLevel::Starter
        }
    }

    /// Lowest score belonging to this level
    pub fn min_score(&self) -> f64 {
        match self {
            TrustLevel::Starter => MIN_SCORE,
            TrustLevel::Trusted => TRUSTED_THRESHOLD,
            TrustLevel::Leader => LEADER_THRESHOLD,
        }
    }

    pub fn next(&self) -> Option<TrustLevel> {
        match self {
            TrustLevel::Starter => Some(TrustLevel::Trusted),
            TrustLevel::Trusted => Some(TrustLevel::Leader),
            TrustLevel::Leader => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::Starter => "starter",
            TrustLevel::Trusted => "trusted",
            TrustLevel::Leader => "leader",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "starter" => Some(TrustLevel::Starter),
            "trusted" => Some(TrustLevel::Trusted),
            "leader" => Some(TrustLevel::Leader),
            _ => None,
        }
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextLevelInfo {
    pub current_level: TrustLevel,
    /// None once the top level is reached
    pub next_level: Option<TrustLevel>,
    pub next_threshold: f64,
    pub points_remaining: f64,
    /// Linear progress between the current and next threshold, 0-100
    pub progress_percent: f64,
}

pub fn get_next_level_info(score: f64, level: TrustLevel) -> NextLevelInfo {
    let Some(next) = level.next() else {
        return NextLevelInfo {
            current_level: level,
            next_level: None,
            next_threshold: MAX_SCORE,
            points_remaining: 0.0,
            progress_percent: 100.0,
        };
    };

    let floor = level.min_score();
    let threshold = next.min_score();
    let progress = ((score - floor) / (threshold - floor) * 100.0).clamp(0.0, 100.0);

    NextLevelInfo {
        current_level: level,
        next_level: Some(next),
        next_threshold: threshold,
        points_remaining: round2((threshold - score).max(0.0)),
        progress_percent: round2(progress),
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
