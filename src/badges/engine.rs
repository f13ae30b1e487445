//! Badge evaluation
//!
//! Reading a metric is the only badge-specific step. Mapping a value to a
//! tier, the next tier and the earned date is shared by every definition.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::definition::{BadgeDefinition, BadgeMetric, BadgeTier, NextTier};
use crate::cache::ReadCaches;
use crate::config::ConfigProvider;
use crate::database::Store;
use crate::error::{TrustError, TrustResult};
use crate::models::{AccountabilityLog, CommunityMembership, Connection, User, UserStat};
use crate::vouch::Vouch;

/// Attendance reliability required before events count towards RELIABLE
pub const RELIABLE_ATTENDANCE_MIN: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeStatus {
    #[serde(rename = "type")]
    pub badge_type: String,
    pub name: String,
    pub metric: BadgeMetric,
    pub value: u32,
    /// None below the bronze threshold
    pub tier: Option<BadgeTier>,
    pub earned_at: Option<DateTime<Utc>>,
    /// None once platinum is reached
    pub next_tier: Option<NextTier>,
}

impl BadgeStatus {
    pub fn is_earned(&self) -> bool {
        self.tier.is_some()
    }
}

/// How the date a threshold was crossed can be recovered
#[derive(Debug, Clone, PartialEq)]
pub enum Milestones {
    /// One timestamp per counted record, ascending
    Timeline(Vec<DateTime<Utc>>),
    /// The metric grows by one per day from this instant
    Since(DateTime<Utc>),
    Unknown,
}

impl Milestones {
    fn timeline(mut stamps: Vec<DateTime<Utc>>) -> Self {
        stamps.sort();
        Milestones::Timeline(stamps)
    }

    /// When the metric first reached `threshold`
    pub fn reached_at(&self, threshold: u32) -> Option<DateTime<Utc>> {
        match self {
            Milestones::Timeline(stamps) => {
                let index = (threshold as usize).checked_sub(1)?;
                stamps.get(index).copied()
            }
            Milestones::Since(start) => Some(*start + ChronoDuration::days(threshold as i64)),
            Milestones::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricReading {
    pub value: u32,
    pub milestones: Milestones,
}

impl MetricReading {
    fn counted(value: usize, milestones: Milestones) -> Self {
        Self {
            value: u32::try_from(value).unwrap_or(u32::MAX),
            milestones,
        }
    }
}

/// Everything the metrics read, loaded once per evaluation
pub struct MetricContext {
    pub user: User,
    pub stat: UserStat,
    pub vouches_given: Vec<Vouch>,
    pub connections: Vec<Connection>,
    pub memberships: Vec<CommunityMembership>,
    pub accountability: Vec<AccountabilityLog>,
    pub now: DateTime<Utc>,
}

impl MetricContext {
    pub async fn load(store: &Store, user_id: &str) -> TrustResult<Self> {
        let user = store
            .users
            .get_user(user_id)
            .await?
            .ok_or_else(|| TrustError::not_found("user", user_id))?;

        Ok(Self {
            stat: store.activity.user_stat(user_id).await?,
            vouches_given: store.vouches.vouches_by_voucher(user_id).await?,
            connections: store.connections.connections(user_id).await?,
            memberships: store.communities.memberships_for_user(user_id).await?,
            accountability: store.accountability.logs_for_voucher(user_id).await?,
            user,
            now: Utc::now(),
        })
    }

    pub fn read(&self, metric: BadgeMetric) -> MetricReading {
        match metric {
            BadgeMetric::VouchesGiven => {
                let stamps: Vec<_> = self
                    .vouches_given
                    .iter()
                    .filter(|v| v.status.occupies_slot())
                    .map(|v| v.approved_at.unwrap_or(v.created_at))
                    .collect();
                MetricReading::counted(stamps.len(), Milestones::timeline(stamps))
            }
            BadgeMetric::AcceptedConnections => {
                let stamps: Vec<_> = self.connections.iter().map(|c| c.accepted_at).collect();
                MetricReading::counted(stamps.len(), Milestones::timeline(stamps))
            }
            BadgeMetric::CommunitiesJoined => {
                let stamps: Vec<_> = self.memberships.iter().map(|m| m.joined_at).collect();
                MetricReading::counted(stamps.len(), Milestones::timeline(stamps))
            }
            BadgeMetric::EventsAttended => MetricReading {
                value: self.stat.events_attended,
                milestones: Milestones::Unknown,
            },
            BadgeMetric::TrustScore => MetricReading {
                value: self.user.trust_score.max(0.0).floor() as u32,
                milestones: Milestones::Unknown,
            },
            BadgeMetric::ReliableAttendance => {
                let value = if self.stat.attendance_reliability() >= RELIABLE_ATTENDANCE_MIN {
                    self.stat.events_attended
                } else {
                    0
                };
                MetricReading {
                    value,
                    milestones: Milestones::Unknown,
                }
            }
            BadgeMetric::PositiveImpact => {
                let stamps: Vec<_> = self
                    .accountability
                    .iter()
                    .filter(|log| log.voucher_id == self.user.id && log.is_positive())
                    .map(|log| log.created_at)
                    .collect();
                MetricReading::counted(stamps.len(), Milestones::timeline(stamps))
            }
            BadgeMetric::AccountAgeDays => {
                let days = (self.now - self.user.created_at).num_days().max(0);
                MetricReading::counted(days as usize, Milestones::Since(self.user.created_at))
            }
        }
    }
}

/// Tier, earned date and next tier for one definition
pub fn evaluate_badge(definition: &BadgeDefinition, reading: &MetricReading) -> BadgeStatus {
    let tier = definition.thresholds.tier_for(reading.value);
    let earned_at = tier.and_then(|t| {
        reading
            .milestones
            .reached_at(definition.thresholds.threshold(t))
    });

    BadgeStatus {
        badge_type: definition.badge_type.clone(),
        name: definition.name.clone(),
        metric: definition.metric,
        value: reading.value,
        tier,
        earned_at,
        next_tier: definition.thresholds.next_tier(reading.value),
    }
}

pub struct BadgeEngine {
    store: Store,
    config: Arc<ConfigProvider>,
    caches: Arc<ReadCaches>,
    read_timeout: Duration,
}

impl BadgeEngine {
    pub fn new(store: Store, config: Arc<ConfigProvider>, caches: Arc<ReadCaches>, read_timeout: Duration) -> Self {
        Self {
            store,
            config,
            caches,
            read_timeout,
        }
    }

    /// Every configured badge for the user, served from cache when fresh
    pub async fn get_badges(&self, user_id: &str) -> TrustResult<Vec<BadgeStatus>> {
        self.caches
            .badges
            .read_through(user_id.to_string(), self.read_timeout, "badges", self.evaluate(user_id))
            .await
    }

    /// Uncached evaluation against the current configuration snapshot
    pub async fn evaluate(&self, user_id: &str) -> TrustResult<Vec<BadgeStatus>> {
        let snapshot = self.config.current();
        let context = MetricContext::load(&self.store, user_id).await?;

        let badges: Vec<BadgeStatus> = snapshot
            .badges
            .iter()
            .map(|definition| evaluate_badge(definition, &context.read(definition.metric)))
            .collect();

        debug!(
            user_id = %user_id,
            config_version = snapshot.version,
            earned = badges.iter().filter(|b| b.is_earned()).count(),
            "Evaluated badges"
        );

        Ok(badges)
    }
}
