//! Score Engine - composite trust score from vouches, activity and feedback
//!
//! Each component is capped on its own before summing:
//! vouches 40, activity 30, trust moments 30. The component functions are
//! pure; [`ScoreEngine`] loads their inputs from the store and persists the
//! result.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use super::history::{HistoryRecorder, RecordReceipt, ScoreCause, ScoreComponent, TrustScoreHistory};
use super::inactivity::{assess, InactivityStatus};
use super::level::{get_next_level_info, round2, NextLevelInfo, TrustLevel, MAX_SCORE, MIN_SCORE};
use crate::cache::ReadCaches;
use crate::config::{ConfigProvider, InactivityConfig, VouchWeights};
use crate::database::Store;
use crate::error::{TrustError, TrustResult};
use crate::locks::KeyedLocks;
use crate::models::{TrustMoment, User, UserStat};
use crate::vouch::{slots_used, Vouch, VouchType};

pub const VOUCHES_MAX: f64 = 40.0;
pub const ACTIVITY_MAX: f64 = 30.0;
pub const TRUST_MOMENTS_MAX: f64 = 30.0;

/// Converts a weight percentage into vouches component points
const VOUCH_POINT_FACTOR: f64 = VOUCHES_MAX / 100.0;

/// Slot-occupying vouches held, per type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VouchCounts {
    pub primary: usize,
    pub secondary: usize,
    pub community: usize,
}

impl VouchCounts {
    pub fn from_received(received: &[Vouch]) -> Self {
        Self {
            primary: slots_used(received, VouchType::Primary),
            secondary: slots_used(received, VouchType::Secondary),
            community: slots_used(received, VouchType::Community),
        }
    }

    pub fn get(&self, vouch_type: VouchType) -> usize {
        match vouch_type {
            VouchType::Primary => self.primary,
            VouchType::Secondary => self.secondary,
            VouchType::Community => self.community,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VouchesBreakdown {
    pub counts: VouchCounts,
    pub primary_points: f64,
    pub secondary_points: f64,
    pub community_points: f64,
    pub points: f64,
    pub max: f64,
}

/// Primary credit is binary; secondary and community scale with filled slots
pub fn vouches_component(counts: VouchCounts, weights: &VouchWeights) -> VouchesBreakdown {
    let share = |vouch_type: VouchType| {
        let max = vouch_type.max_slots();
        let filled = counts.get(vouch_type).min(max) as f64;
        weights.for_type(vouch_type) * VOUCH_POINT_FACTOR * filled / max as f64
    };

    let primary_points = if counts.primary >= 1 {
        weights.primary * VOUCH_POINT_FACTOR
    } else {
        0.0
    };
    let secondary_points = share(VouchType::Secondary);
    let community_points = share(VouchType::Community);

    VouchesBreakdown {
        counts,
        primary_points: round2(primary_points),
        secondary_points: round2(secondary_points),
        community_points: round2(community_points),
        points: round2((primary_points + secondary_points + community_points).min(VOUCHES_MAX)),
        max: VOUCHES_MAX,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityBreakdown {
    pub events_attended_points: f64,
    pub events_hosted_points: f64,
    pub communities_joined_points: f64,
    pub services_provided_points: f64,
    pub points: f64,
    pub max: f64,
}

pub const EVENTS_ATTENDED_CAP: f64 = 10.0;
pub const EVENTS_HOSTED_CAP: f64 = 9.0;
pub const COMMUNITIES_JOINED_CAP: f64 = 6.0;
pub const SERVICES_PROVIDED_CAP: f64 = 5.0;

pub fn activity_component(stat: &UserStat) -> ActivityBreakdown {
    let attended = (stat.events_attended as f64 * 2.0).min(EVENTS_ATTENDED_CAP);
    let hosted = (stat.events_hosted as f64 * 3.0).min(EVENTS_HOSTED_CAP);
    let communities = (stat.communities_joined as f64 * 2.0).min(COMMUNITIES_JOINED_CAP);
    let services = (stat.services_provided as f64).min(SERVICES_PROVIDED_CAP);

    ActivityBreakdown {
        events_attended_points: attended,
        events_hosted_points: hosted,
        communities_joined_points: communities,
        services_provided_points: services,
        points: (attended + hosted + communities + services).min(ACTIVITY_MAX),
        max: ACTIVITY_MAX,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustMomentsBreakdown {
    /// Public moments only
    pub count: usize,
    pub average_rating: f64,
    pub rating_points: f64,
    pub quantity_bonus: f64,
    pub points: f64,
    pub max: f64,
}

pub const QUANTITY_BONUS_CAP: f64 = 3.0;

pub fn trust_moments_component(moments: &[TrustMoment]) -> TrustMomentsBreakdown {
    let public: Vec<&TrustMoment> = moments.iter().filter(|m| m.is_public).collect();
    if public.is_empty() {
        return TrustMomentsBreakdown {
            count: 0,
            average_rating: 0.0,
            rating_points: 0.0,
            quantity_bonus: 0.0,
            points: 0.0,
            max: TRUST_MOMENTS_MAX,
        };
    }

    let count = public.len();
    let average = public.iter().map(|m| m.rating as f64).sum::<f64>() / count as f64;
    let rating_points = average / 5.0 * TRUST_MOMENTS_MAX;
    let quantity_bonus = (count as f64 * 0.3).min(QUANTITY_BONUS_CAP);

    TrustMomentsBreakdown {
        count,
        average_rating: round2(average),
        rating_points: round2(rating_points),
        quantity_bonus: round2(quantity_bonus),
        points: round2((rating_points + quantity_bonus).min(TRUST_MOMENTS_MAX)),
        max: TRUST_MOMENTS_MAX,
    }
}

/// Clamp to [0, 100] at two decimals
pub fn bounded_score(raw: f64) -> f64 {
    if raw.is_nan() {
        return MIN_SCORE;
    }
    round2(raw.clamp(MIN_SCORE, MAX_SCORE))
}

/// Freshly computed score with everything that went into it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub user_id: String,
    pub vouches: VouchesBreakdown,
    pub activity: ActivityBreakdown,
    pub trust_moments: TrustMomentsBreakdown,
    pub total: f64,
    pub level: TrustLevel,
    /// Configuration snapshot the weights came from
    pub config_version: u64,
}

impl ScoreBreakdown {
    pub fn compose(
        user_id: &str,
        vouches: VouchesBreakdown,
        activity: ActivityBreakdown,
        trust_moments: TrustMomentsBreakdown,
        config_version: u64,
    ) -> Self {
        let total = bounded_score(vouches.points + activity.points + trust_moments.points);
        Self {
            user_id: user_id.to_string(),
            vouches,
            activity,
            trust_moments,
            total,
            level: TrustLevel::from_score(total),
            config_version,
        }
    }
}

/// Result of a recompute or override
#[derive(Debug)]
pub struct ScoreUpdate {
    pub user_id: String,
    pub previous_score: f64,
    pub new_score: f64,
    pub level: TrustLevel,
    pub changed: bool,
    /// History append outcome, present only when the score changed
    pub receipt: Option<RecordReceipt>,
}

/// Concrete action that would raise the score
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub action: String,
    pub component: ScoreComponent,
    pub potential_points: f64,
}

/// Ordered by potential points, largest first
pub fn suggestions_for(breakdown: &ScoreBreakdown, weights: &VouchWeights) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();
    let mut push = |action: String, component: ScoreComponent, points: f64| {
        if points > 0.0 {
            suggestions.push(Suggestion {
                action,
                component,
                potential_points: round2(points),
            });
        }
    };

    let counts = breakdown.vouches.counts;
    if counts.primary == 0 {
        push(
            "Ask a close connection for a primary vouch".to_string(),
            ScoreComponent::Vouches,
            weights.primary * VOUCH_POINT_FACTOR,
        );
    }
    for vouch_type in [VouchType::Secondary, VouchType::Community] {
        let open = vouch_type.max_slots().saturating_sub(counts.get(vouch_type));
        if open > 0 {
            push(
                format!(
                    "Fill {} open {} vouch slot{}",
                    open,
                    vouch_type.as_str().to_lowercase(),
                    if open == 1 { "" } else { "s" }
                ),
                ScoreComponent::Vouches,
                weights.per_slot(vouch_type) * VOUCH_POINT_FACTOR * open as f64,
            );
        }
    }

    let activity = &breakdown.activity;
    push(
        "Attend more events".to_string(),
        ScoreComponent::Activity,
        EVENTS_ATTENDED_CAP - activity.events_attended_points,
    );
    push(
        "Host an event".to_string(),
        ScoreComponent::Activity,
        EVENTS_HOSTED_CAP - activity.events_hosted_points,
    );
    push(
        "Join a community".to_string(),
        ScoreComponent::Activity,
        COMMUNITIES_JOINED_CAP - activity.communities_joined_points,
    );
    push(
        "Offer a service".to_string(),
        ScoreComponent::Activity,
        SERVICES_PROVIDED_CAP - activity.services_provided_points,
    );

    let moments = &breakdown.trust_moments;
    let action = if moments.count == 0 {
        "Collect your first trust moments from people you meet"
    } else {
        "Collect more positive trust moments"
    };
    push(
        action.to_string(),
        ScoreComponent::TrustMoments,
        TRUST_MOMENTS_MAX - moments.points,
    );

    suggestions.sort_by(|a, b| b.potential_points.total_cmp(&a.potential_points));
    suggestions
}

/// Stored score plus a fresh breakdown
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustScoreDetail {
    pub user_id: String,
    pub score: f64,
    pub level: TrustLevel,
    pub breakdown: ScoreBreakdown,
    pub next_level: NextLevelInfo,
    pub inactivity: InactivityStatus,
}

pub struct ScoreEngine {
    store: Store,
    config: Arc<ConfigProvider>,
    recorder: HistoryRecorder,
    caches: Arc<ReadCaches>,
    /// Serializes recomputes per user so history rows chain correctly
    user_locks: KeyedLocks<String>,
}

impl ScoreEngine {
    pub fn new(
        store: Store,
        config: Arc<ConfigProvider>,
        recorder: HistoryRecorder,
        caches: Arc<ReadCaches>,
    ) -> Self {
        Self {
            store,
            config,
            recorder,
            caches,
            user_locks: KeyedLocks::new(),
        }
    }

    async fn require_user(&self, user_id: &str) -> TrustResult<User> {
        self.store
            .users
            .get_user(user_id)
            .await?
            .ok_or_else(|| TrustError::not_found("user", user_id))
    }

    /// Compute the score from current state without storing it
    pub async fn compute_score(&self, user_id: &str) -> TrustResult<ScoreBreakdown> {
        self.require_user(user_id).await?;
        self.breakdown(user_id).await
    }

    async fn breakdown(&self, user_id: &str) -> TrustResult<ScoreBreakdown> {
        let snapshot = self.config.current();
        let received = self.store.vouches.vouches_for_vouchee(user_id).await?;
        let stat = self.store.activity.user_stat(user_id).await?;
        let moments = self.store.activity.trust_moments_received(user_id).await?;

        Ok(ScoreBreakdown::compose(
            user_id,
            vouches_component(VouchCounts::from_received(&received), &snapshot.weights),
            activity_component(&stat),
            trust_moments_component(&moments),
            snapshot.version,
        ))
    }

    /// Recompute, persist when changed, and queue a history row
    pub async fn recompute(&self, user_id: &str, cause: ScoreCause) -> TrustResult<ScoreUpdate> {
        let _guard = self.user_locks.lock(user_id.to_string()).await;

        let user = self.require_user(user_id).await?;
        let breakdown = self.breakdown(user_id).await?;
        debug!(
            user_id = %user_id,
            vouches = breakdown.vouches.points,
            activity = breakdown.activity.points,
            trust_moments = breakdown.trust_moments.points,
            total = breakdown.total,
            "Computed trust score"
        );

        self.store_score(&user, breakdown.total, &cause).await
    }

    /// Store an externally decided score, e.g. from a decay policy
    pub async fn apply_override(&self, user_id: &str, score: f64, cause: ScoreCause) -> TrustResult<ScoreUpdate> {
        let _guard = self.user_locks.lock(user_id.to_string()).await;

        let user = self.require_user(user_id).await?;
        self.store_score(&user, bounded_score(score), &cause).await
    }

    async fn store_score(&self, user: &User, new_score: f64, cause: &ScoreCause) -> TrustResult<ScoreUpdate> {
        let previous_score = user.trust_score;
        let level = TrustLevel::from_score(new_score);

        if round2(new_score - previous_score) == 0.0 && level == user.trust_level {
            return Ok(ScoreUpdate {
                user_id: user.id.clone(),
                previous_score,
                new_score: previous_score,
                level,
                changed: false,
                receipt: None,
            });
        }

        self.store.users.update_score(&user.id, new_score, level).await?;
        self.caches.invalidate_user(&user.id);

        info!(
            user_id = %user.id,
            previous = previous_score,
            score = new_score,
            level = %level,
            reason = %cause.reason,
            "Trust score updated"
        );

        let receipt = self
            .recorder
            .record(TrustScoreHistory::new(&user.id, new_score, previous_score, cause));

        Ok(ScoreUpdate {
            user_id: user.id.clone(),
            previous_score,
            new_score,
            level,
            changed: true,
            receipt: Some(receipt),
        })
    }

    pub async fn detail(&self, user_id: &str, inactivity: &InactivityConfig) -> TrustResult<TrustScoreDetail> {
        let user = self.require_user(user_id).await?;
        let breakdown = self.breakdown(user_id).await?;

        Ok(TrustScoreDetail {
            user_id: user.id.clone(),
            score: user.trust_score,
            level: user.trust_level,
            next_level: get_next_level_info(user.trust_score, user.trust_level),
            inactivity: assess(user.last_active_at, Utc::now(), inactivity),
            breakdown,
        })
    }

    pub async fn suggestions(&self, user_id: &str) -> TrustResult<Vec<Suggestion>> {
        let breakdown = self.compute_score(user_id).await?;
        Ok(suggestions_for(&breakdown, &self.config.current().weights))
    }
}
