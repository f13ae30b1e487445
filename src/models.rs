//! Flat records shared by the engine and its collaborators
//!
//! Everything references users by id; there are no object graphs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::score::TrustLevel;

/// A platform member as seen by the trust engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: Option<String>,
    /// Always within [0, 100]; written only by the score engine
    pub trust_score: f64,
    pub trust_level: TrustLevel,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: &str, username: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            username: username.map(str::to_string),
            trust_score: 0.0,
            trust_level: TrustLevel::Starter,
            is_active: true,
            deleted_at: None,
            created_at: now,
            last_active_at: now,
        }
    }

    /// Eligible to appear on a leaderboard
    pub fn is_rankable(&self) -> bool {
        self.is_active && self.deleted_at.is_none() && self.trust_score > 0.0
    }
}

/// Activity counters owned by the event/community/marketplace modules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStat {
    pub events_attended: u32,
    pub events_hosted: u32,
    pub communities_joined: u32,
    pub services_provided: u32,
    pub vouches_given: u32,
    pub vouches_received: u32,
    /// RSVPs that were not honoured
    pub events_no_show: u32,
}

impl UserStat {
    /// Share of committed events actually attended, 1.0 with no history
    pub fn attendance_reliability(&self) -> f64 {
        let committed = self.events_attended as u64 + self.events_no_show as u64;
        if committed == 0 {
            return 1.0;
        }
        self.events_attended as f64 / committed as f64
    }
}

/// Rated feedback about a shared experience
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustMoment {
    pub id: String,
    pub giver_id: String,
    pub receiver_id: String,
    /// 1..=5
    pub rating: u8,
    pub moment_type: String,
    pub tags: BTreeSet<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

impl TrustMoment {
    pub fn new(giver_id: &str, receiver_id: &str, rating: u8, moment_type: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            giver_id: giver_id.to_string(),
            receiver_id: receiver_id.to_string(),
            rating: rating.clamp(1, 5),
            moment_type: moment_type.to_string(),
            tags: BTreeSet::new(),
            is_public: true,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunityRole {
    Member,
    Moderator,
    Admin,
}

impl CommunityRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommunityRole::Member => "member",
            CommunityRole::Moderator => "moderator",
            CommunityRole::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "member" => Some(CommunityRole::Member),
            "moderator" => Some(CommunityRole::Moderator),
            "admin" => Some(CommunityRole::Admin),
            _ => None,
        }
    }

    /// May issue COMMUNITY vouches on behalf of the community
    pub fn can_vouch(&self) -> bool {
        matches!(self, CommunityRole::Moderator | CommunityRole::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityMembership {
    pub community_id: String,
    pub user_id: String,
    pub role: CommunityRole,
    pub joined_at: DateTime<Utc>,
}

/// An accepted, symmetric connection between two users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub user_id: String,
    pub peer_id: String,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountabilityEvent {
    VouchRevoked,
    NoShow,
    PositiveOutcome,
}

impl AccountabilityEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountabilityEvent::VouchRevoked => "vouch_revoked",
            AccountabilityEvent::NoShow => "no_show",
            AccountabilityEvent::PositiveOutcome => "positive_outcome",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "vouch_revoked" => Some(AccountabilityEvent::VouchRevoked),
            "no_show" => Some(AccountabilityEvent::NoShow),
            "positive_outcome" => Some(AccountabilityEvent::PositiveOutcome),
            _ => None,
        }
    }
}

/// Consequence of a vouchee's behaviour attributed to their voucher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountabilityLog {
    pub id: String,
    pub voucher_id: String,
    pub vouchee_id: String,
    pub vouch_id: Option<String>,
    pub event: AccountabilityEvent,
    /// Signed score impact; positive entries feed the impact badge
    pub impact: f64,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AccountabilityLog {
    pub fn new(
        voucher_id: &str,
        vouchee_id: &str,
        vouch_id: Option<&str>,
        event: AccountabilityEvent,
        impact: f64,
        reason: Option<&str>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            voucher_id: voucher_id.to_string(),
            vouchee_id: vouchee_id.to_string(),
            vouch_id: vouch_id.map(str::to_string),
            event,
            impact,
            reason: reason.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    pub fn is_positive(&self) -> bool {
        self.impact > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attendance_reliability() {
        let mut stat = UserStat::default();
        assert_eq!(stat.attendance_reliability(), 1.0);

        stat.events_attended = 9;
        stat.events_no_show = 1;
        assert!((stat.attendance_reliability() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_attendance_reliability_saturated_counters() {
        let stat = UserStat {
            events_attended: u32::MAX,
            events_no_show: u32::MAX,
            ..Default::default()
        };
        assert!((stat.attendance_reliability() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rankable_users() {
        let mut user = User::new("u1", Some("ana"));
        assert!(!user.is_rankable());

        user.trust_score = 12.0;
        assert!(user.is_rankable());

        user.deleted_at = Some(Utc::now());
        assert!(!user.is_rankable());
    }

    #[test]
    fn test_trust_moment_rating_clamped() {
        assert_eq!(TrustMoment::new("a", "b", 9, "event").rating, 5);
        assert_eq!(TrustMoment::new("a", "b", 0, "event").rating, 1);
    }
}
