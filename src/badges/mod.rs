//! Tiered achievement badges

pub mod definition;
pub mod engine;

pub use definition::{
    default_badge_definitions, validate_badge_definitions, BadgeDefinition, BadgeMetric, BadgeTier,
    NextTier, TierThresholds,
};
pub use engine::{evaluate_badge, BadgeEngine, BadgeStatus, MetricContext, MetricReading, Milestones};
