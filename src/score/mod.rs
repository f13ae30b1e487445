//! Trust score computation, levels, history and inactivity

pub mod engine;
pub mod history;
pub mod inactivity;
pub mod level;

pub use engine::{
    activity_component, bounded_score, suggestions_for, trust_moments_component, vouches_component,
    ActivityBreakdown, ScoreBreakdown, ScoreEngine, ScoreUpdate, Suggestion, TrustMomentsBreakdown,
    TrustScoreDetail, VouchCounts, VouchesBreakdown, ACTIVITY_MAX, TRUST_MOMENTS_MAX, VOUCHES_MAX,
};
pub use history::{HistoryRecorder, RecordReceipt, ScoreCause, ScoreComponent, TrustScoreHistory};
pub use inactivity::{assess, DecayPolicy, InactivityStatus, InactivityWarning, NoDecay, SweepReport};
pub use level::{get_next_level_info, NextLevelInfo, TrustLevel};
