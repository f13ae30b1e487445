//! Badge definitions and tier thresholds
//!
//! Definitions are configuration, not code: any number of badge types can
//! be declared as long as each names one of the known metrics.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{TrustError, TrustResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl BadgeTier {
    /// Ascending order
    pub const ALL: [BadgeTier; 4] = [
        BadgeTier::Bronze,
        BadgeTier::Silver,
        BadgeTier::Gold,
        BadgeTier::Platinum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BadgeTier::Bronze => "bronze",
            BadgeTier::Silver => "silver",
            BadgeTier::Gold => "gold",
            BadgeTier::Platinum => "platinum",
        }
    }
}

impl fmt::Display for BadgeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum metric value for each tier, strictly ascending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub bronze: u32,
    pub silver: u32,
    pub gold: u32,
    pub platinum: u32,
}

impl TierThresholds {
    pub const fn new(bronze: u32, silver: u32, gold: u32, platinum: u32) -> Self {
        Self {
            bronze,
            silver,
            gold,
            platinum,
        }
    }

    pub fn threshold(&self, tier: BadgeTier) -> u32 {
        match tier {
            BadgeTier::Bronze => self.bronze,
            BadgeTier::Silver => self.silver,
            BadgeTier::Gold => self.gold,
            BadgeTier::Platinum => self.platinum,
        }
    }

    /// Highest tier whose threshold `value` meets
    pub fn tier_for(&self, value: u32) -> Option<BadgeTier> {
        BadgeTier::ALL
            .iter()
            .rev()
            .copied()
            .find(|tier| value >= self.threshold(*tier))
    }

    /// Lowest tier `value` has not reached yet
    pub fn next_tier(&self, value: u32) -> Option<NextTier> {
        BadgeTier::ALL
            .iter()
            .copied()
            .find(|tier| value < self.threshold(*tier))
            .map(|tier| {
                let threshold = self.threshold(tier);
                NextTier {
                    tier,
                    threshold,
                    remaining: threshold - value,
                }
            })
    }

    pub fn validate(&self) -> TrustResult<()> {
        if self.bronze == 0 {
            return Err(TrustError::Validation(
                "bronze threshold must be at least 1".to_string(),
            ));
        }
        if !(self.bronze < self.silver && self.silver < self.gold && self.gold < self.platinum) {
            return Err(TrustError::Validation(format!(
                "tier thresholds must be strictly ascending, got {}/{}/{}/{}",
                self.bronze, self.silver, self.gold, self.platinum
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextTier {
    pub tier: BadgeTier,
    pub threshold: u32,
    pub remaining: u32,
}

/// Integer quantity a badge is measured on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeMetric {
    /// Approved or active vouches the user has given
    VouchesGiven,
    AcceptedConnections,
    CommunitiesJoined,
    EventsAttended,
    /// floor(trust score)
    TrustScore,
    /// Events attended, counted only with attendance reliability >= 90%
    ReliableAttendance,
    /// Accountability entries with positive impact where the user vouched
    PositiveImpact,
    AccountAgeDays,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeDefinition {
    /// Stable key, e.g. "RELIABLE"
    #[serde(rename = "type")]
    pub badge_type: String,
    pub name: String,
    pub metric: BadgeMetric,
    pub thresholds: TierThresholds,
}

impl BadgeDefinition {
    pub fn new(badge_type: &str, name: &str, metric: BadgeMetric, thresholds: TierThresholds) -> Self {
        Self {
            badge_type: badge_type.to_string(),
            name: name.to_string(),
            metric,
            thresholds,
        }
    }
}

pub fn validate_badge_definitions(definitions: &[BadgeDefinition]) -> TrustResult<()> {
    let mut seen = HashSet::new();
    for definition in definitions {
        if definition.badge_type.trim().is_empty() {
            return Err(TrustError::Validation("badge type cannot be empty".to_string()));
        }
        if !seen.insert(definition.badge_type.as_str()) {
            return Err(TrustError::Validation(format!(
                "duplicate badge type {}",
                definition.badge_type
            )));
        }
        definition.thresholds.validate().map_err(|e| {
            TrustError::Validation(format!("badge {}: {}", definition.badge_type, e))
        })?;
    }
    Ok(())
}

pub fn default_badge_definitions() -> Vec<BadgeDefinition> {
    vec![
        BadgeDefinition::new(
            "TRUSTED_VOUCHER",
            "Trusted Voucher",
            BadgeMetric::VouchesGiven,
            TierThresholds::new(1, 5, 10, 25),
        ),
        BadgeDefinition::new(
            "CONNECTOR",
            "Connector",
            BadgeMetric::AcceptedConnections,
            TierThresholds::new(5, 15, 30, 50),
        ),
        BadgeDefinition::new(
            "COMMUNITY_BUILDER",
            "Community Builder",
            BadgeMetric::CommunitiesJoined,
            TierThresholds::new(1, 3, 5, 10),
        ),
        BadgeDefinition::new(
            "EVENT_ENTHUSIAST",
            "Event Enthusiast",
            BadgeMetric::EventsAttended,
            TierThresholds::new(5, 15, 30, 50),
        ),
        BadgeDefinition::new(
            "TRUST_CHAMPION",
            "Trust Champion",
            BadgeMetric::TrustScore,
            TierThresholds::new(31, 50, 75, 90),
        ),
        BadgeDefinition::new(
            "RELIABLE",
            "Reliable",
            BadgeMetric::ReliableAttendance,
            TierThresholds::new(5, 10, 25, 50),
        ),
        BadgeDefinition::new(
            "IMPACT_MAKER",
            "Impact Maker",
            BadgeMetric::PositiveImpact,
            TierThresholds::new(1, 5, 10, 25),
        ),
        BadgeDefinition::new(
            "VETERAN",
            "Veteran",
            BadgeMetric::AccountAgeDays,
            TierThresholds::new(30, 90, 180, 365),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLDS: TierThresholds = TierThresholds::new(1, 5, 10, 25);

    #[test]
    fn test_tier_for() {
        assert_eq!(THRESHOLDS.tier_for(0), None);
        assert_eq!(THRESHOLDS.tier_for(1), Some(BadgeTier::Bronze));
        assert_eq!(THRESHOLDS.tier_for(9), Some(BadgeTier::Silver));
        assert_eq!(THRESHOLDS.tier_for(10), Some(BadgeTier::Gold));
        assert_eq!(THRESHOLDS.tier_for(1_000), Some(BadgeTier::Platinum));
    }

    #[test]
    fn test_next_tier() {
        assert_eq!(
            THRESHOLDS.next_tier(0),
            Some(NextTier {
                tier: BadgeTier::Bronze,
                threshold: 1,
                remaining: 1
            })
        );
        assert_eq!(THRESHOLDS.next_tier(7).map(|n| n.remaining), Some(3));
        assert_eq!(THRESHOLDS.next_tier(25), None);
    }

    #[test]
    fn test_tier_is_monotonic() {
        let mut previous = None;
        for value in 0..40 {
            let tier = THRESHOLDS.tier_for(value);
            assert!(tier >= previous, "tier dropped at {}", value);
            previous = tier;
        }
    }

    #[test]
    fn test_definition_validation() {
        assert!(validate_badge_definitions(&default_badge_definitions()).is_ok());

        let mut duplicated = default_badge_definitions();
        duplicated.push(duplicated[0].clone());
        assert!(validate_badge_definitions(&duplicated).is_err());

        let flat = vec![BadgeDefinition::new(
            "FLAT",
            "Flat",
            BadgeMetric::EventsAttended,
            TierThresholds::new(5, 5, 10, 20),
        )];
        assert!(validate_badge_definitions(&flat).is_err());

        let zero = vec![BadgeDefinition::new(
            "ZERO",
            "Zero",
            BadgeMetric::EventsAttended,
            TierThresholds::new(0, 5, 10, 20),
        )];
        assert!(validate_badge_definitions(&zero).is_err());
    }

    #[test]
    fn test_definitions_from_json() {
        let raw = r#"[{"type":"HOST","name":"Host","metric":"events_attended",
            "thresholds":{"bronze":2,"silver":4,"gold":8,"platinum":16}}]"#;
        let defs: Vec<BadgeDefinition> = serde_json::from_str(raw).unwrap();
        assert_eq!(defs[0].badge_type, "HOST");
        assert_eq!(defs[0].thresholds.tier_for(8), Some(BadgeTier::Gold));
    }
}
