//! Inactivity warnings and the pluggable decay hook
//!
//! Users idle inside the warning window get a warning. Past the decay start
//! they become eligible for decay, but the reduction itself is delegated to a
//! [`DecayPolicy`]. The shipped policy is [`NoDecay`]: the curve has not been
//! decided, so scores are left alone.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::engine::ScoreEngine;
use super::history::ScoreCause;
use crate::config::InactivityConfig;
use crate::models::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InactivityStatus {
    Active {
        days_inactive: i64,
    },
    Warning {
        days_inactive: i64,
        days_until_decay: i64,
    },
    DecayEligible {
        days_inactive: i64,
    },
}

impl InactivityStatus {
    pub fn days_inactive(&self) -> i64 {
        match self {
            InactivityStatus::Active { days_inactive }
            | InactivityStatus::Warning { days_inactive, .. }
            | InactivityStatus::DecayEligible { days_inactive } => *days_inactive,
        }
    }
}

/// Classify whole days since `last_active_at`
pub fn assess(last_active_at: DateTime<Utc>, now: DateTime<Utc>, config: &InactivityConfig) -> InactivityStatus {
    let days_inactive = (now - last_active_at).num_days().max(0);

    if days_inactive >= config.decay_start_days {
        InactivityStatus::DecayEligible { days_inactive }
    } else if days_inactive >= config.warning_start_days {
        InactivityStatus::Warning {
            days_inactive,
            days_until_decay: config.decay_start_days - days_inactive,
        }
    } else {
        InactivityStatus::Active { days_inactive }
    }
}

/// Score reduction for decay-eligible users
pub trait DecayPolicy: Send + Sync {
    /// New score for a user idle `days_inactive` days, or None to leave it
    fn decayed_score(&self, score: f64, days_inactive: i64) -> Option<f64>;
}

/// Leaves every score untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDecay;

impl DecayPolicy for NoDecay {
    fn decayed_score(&self, _score: f64, _days_inactive: i64) -> Option<f64> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InactivityWarning {
    pub user_id: String,
    pub days_inactive: i64,
    pub days_until_decay: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub scanned: usize,
    pub warnings: Vec<InactivityWarning>,
    pub decay_eligible: usize,
    pub decayed: usize,
    pub failed: usize,
}

/// Classify `users` and apply whatever the policy decides for idle ones
pub async fn sweep(
    users: &[User],
    now: DateTime<Utc>,
    config: &InactivityConfig,
    policy: &dyn DecayPolicy,
    engine: &ScoreEngine,
) -> SweepReport {
    let mut report = SweepReport {
        scanned: users.len(),
        ..Default::default()
    };

    for user in users {
        match assess(user.last_active_at, now, config) {
            InactivityStatus::Active { .. } => {}
            InactivityStatus::Warning {
                days_inactive,
                days_until_decay,
            } => report.warnings.push(InactivityWarning {
                user_id: user.id.clone(),
                days_inactive,
                days_until_decay,
            }),
            InactivityStatus::DecayEligible { days_inactive } => {
                report.decay_eligible += 1;
                let Some(score) = policy.decayed_score(user.trust_score, days_inactive) else {
                    continue;
                };

                let cause = ScoreCause::new("inactivity decay", None).related("user", &user.id);
                match engine.apply_override(&user.id, score, cause).await {
                    Ok(update) if update.changed => report.decayed += 1,
                    Ok(_) => {}
                    Err(e) => {
                        report.failed += 1;
                        warn!(user_id = %user.id, error = %e, "Failed to apply inactivity decay");
                    }
                }
            }
        }
    }

    if report.warnings.is_empty() && report.decay_eligible == 0 {
        debug!(scanned = report.scanned, "Inactivity sweep found nothing");
    } else {
        info!(
            scanned = report.scanned,
            warnings = report.warnings.len(),
            decay_eligible = report.decay_eligible,
            decayed = report.decayed,
            failed = report.failed,
            "Inactivity sweep complete"
        );
    }

    report
}
