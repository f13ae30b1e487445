//! Trust Engine
//!
//! Reputation and social-trust engine for a community platform: members
//! vouch for one another, vouches and behavioural signals become a bounded
//! trust score and level, and the score feeds tiered badges and leaderboards.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs          - Crate root with re-exports
//! ├── main.rs         - Daemon entrypoint (inactivity sweep, config reload)
//! ├── config.rs       - Environment configuration & hot-swappable provider
//! ├── error.rs        - Error taxonomy
//! ├── models.rs       - Users, activity counters, trust moments, memberships
//! ├── service.rs      - Operation facade
//! ├── cache.rs        - TTL read caches with stale fallback
//! ├── locks.rs        - Per-key async mutexes
//! ├── leaderboard.rs  - Ranked, percentile-annotated views
//! ├── vouch/          - Vouch lifecycle
//! │   ├── types.rs    - Vouch records, statuses, slot accounting
//! │   └── ledger.rs   - Request / respond / revoke state machine
//! ├── score/          - Trust scores
//! │   ├── engine.rs   - Component formulas & recompute
//! │   ├── level.rs    - Trust levels & next-level progress
//! │   ├── history.rs  - Score audit trail & background recorder
//! │   └── inactivity.rs - Inactivity warnings & decay hook
//! ├── badges/         - Tiered achievement badges
//! │   ├── definition.rs - Badge configuration & tier thresholds
//! │   └── engine.rs   - Metric readers & tier evaluation
//! └── database/       - Persistence (PostgreSQL or in-memory)
//! ```

pub mod badges;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod leaderboard;
pub mod locks;
pub mod models;
pub mod score;
pub mod service;
pub mod vouch;

// Re-export main types for convenience
pub use config::{ConfigProvider, ConfigSnapshot, EngineConfig, VouchWeights};
pub use database::{DatabasePool, MemoryStore, Store};
pub use error::{TrustError, TrustResult};
pub use service::TrustService;

pub use models::{
    AccountabilityEvent, AccountabilityLog, CommunityMembership, CommunityRole, Connection, TrustMoment,
    User, UserStat,
};

// Re-export vouch types
pub use vouch::{
    Vouch, VouchAction, VouchLimits, VouchOutcome, VouchRequest, VouchStatus, VouchSummary, VouchType,
};

// Re-export score types
pub use score::{
    get_next_level_info, DecayPolicy, InactivityStatus, NextLevelInfo, NoDecay, ScoreBreakdown,
    ScoreComponent, ScoreUpdate, Suggestion, SweepReport, TrustLevel, TrustScoreDetail,
    TrustScoreHistory,
};

// Re-export read views
pub use badges::{BadgeDefinition, BadgeMetric, BadgeStatus, BadgeTier, TierThresholds};
pub use leaderboard::{Leaderboard, LeaderboardEntry, LeaderboardQuery, LeaderboardScope};
