//! Persistence layer
//!
//! One repository trait per entity. A [`Store`] bundles them behind an
//! explicitly opened handle that every component receives at construction.
//! Two backends exist: PostgreSQL via sqlx, and an in-memory store used when
//! Postgres is disabled and by the test suite.

pub mod activity;
pub mod history;
pub mod memory;
pub mod pool;
pub mod users;
pub mod vouches;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::config::{sanitize_for_logging, DatabaseConfig};
use crate::error::TrustResult;
use crate::models::{AccountabilityLog, CommunityMembership, Connection, TrustMoment, User, UserStat};
use crate::score::{TrustLevel, TrustScoreHistory};
use crate::vouch::{CommitOutcome, Vouch, VouchTransition};

pub use memory::MemoryStore;
pub use pool::DatabasePool;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_user(&self, user_id: &str) -> TrustResult<Option<User>>;

    async fn update_score(&self, user_id: &str, score: f64, level: TrustLevel) -> TrustResult<()>;

    /// Active, non-deleted users with a positive score, optionally restricted to `among`
    async fn ranked_users(&self, among: Option<&[String]>) -> TrustResult<Vec<User>>;

    /// Active, non-deleted users regardless of score
    async fn active_users(&self) -> TrustResult<Vec<User>>;
}

#[async_trait]
pub trait VouchRepository: Send + Sync {
    async fn get_vouch(&self, vouch_id: &str) -> TrustResult<Option<Vouch>>;

    async fn vouches_for_vouchee(&self, vouchee_id: &str) -> TrustResult<Vec<Vouch>>;

    async fn vouches_by_voucher(&self, voucher_id: &str) -> TrustResult<Vec<Vouch>>;

    /// Insert a vouch. A slot-occupying vouch is refused with
    /// [`CommitOutcome::SlotsFull`] when the vouchee is already at the limit,
    /// and any open vouch with [`CommitOutcome::Duplicate`] when the voucher
    /// already holds an open vouch of that type for the vouchee.
    async fn insert_vouch(&self, vouch: &Vouch) -> TrustResult<CommitOutcome>;

    /// Apply a status change only if the current status is expected and,
    /// when the change claims a slot, a slot is free. A change of type is
    /// refused as a duplicate like an insert. Check and write are atomic.
    async fn commit_transition(&self, transition: &VouchTransition) -> TrustResult<CommitOutcome>;
}

#[async_trait]
pub trait HistoryRepository: Send + Sync {
    async fn append(&self, entry: &TrustScoreHistory) -> TrustResult<()>;

    /// Newest first
    async fn history_for_user(&self, user_id: &str, limit: usize) -> TrustResult<Vec<TrustScoreHistory>>;
}

/// Read-only projections maintained by the activity modules
#[async_trait]
pub trait ActivityRepository: Send + Sync {
    async fn user_stat(&self, user_id: &str) -> TrustResult<UserStat>;

    async fn trust_moments_received(&self, user_id: &str) -> TrustResult<Vec<TrustMoment>>;
}

#[async_trait]
pub trait CommunityRepository: Send + Sync {
    async fn membership(&self, community_id: &str, user_id: &str) -> TrustResult<Option<CommunityMembership>>;

    async fn memberships_for_user(&self, user_id: &str) -> TrustResult<Vec<CommunityMembership>>;

    async fn member_ids(&self, community_id: &str) -> TrustResult<Vec<String>>;
}

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    async fn connections(&self, user_id: &str) -> TrustResult<Vec<Connection>>;

    async fn are_connected(&self, a: &str, b: &str) -> TrustResult<bool> {
        Ok(self.connections(a).await?.iter().any(|c| c.peer_id == b))
    }
}

#[async_trait]
pub trait AccountabilityRepository: Send + Sync {
    async fn append_log(&self, log: &AccountabilityLog) -> TrustResult<()>;

    async fn logs_for_voucher(&self, voucher_id: &str) -> TrustResult<Vec<AccountabilityLog>>;
}

#[derive(Clone)]
enum Backend {
    Memory,
    Postgres(Arc<DatabasePool>),
}

/// Handle to every repository the engine needs
#[derive(Clone)]
pub struct Store {
    pub users: Arc<dyn UserRepository>,
    pub vouches: Arc<dyn VouchRepository>,
    pub history: Arc<dyn HistoryRepository>,
    pub activity: Arc<dyn ActivityRepository>,
    pub communities: Arc<dyn CommunityRepository>,
    pub connections: Arc<dyn ConnectionRepository>,
    pub accountability: Arc<dyn AccountabilityRepository>,
    backend: Backend,
}

impl Store {
    /// Open the backend selected by configuration
    pub async fn open(config: &DatabaseConfig) -> TrustResult<Self> {
        if !config.postgres_enabled {
            info!("PostgreSQL disabled, using in-memory store");
            return Ok(Self::in_memory(Arc::new(MemoryStore::new())));
        }

        info!(
            url = %sanitize_for_logging(&config.postgres_url),
            "Opening PostgreSQL store"
        );
        let db = DatabasePool::new(&config.postgres_url, config.max_connections).await?;
        db.init_schema().await?;
        Ok(Self::postgres(Arc::new(db)))
    }

    pub fn in_memory(memory: Arc<MemoryStore>) -> Self {
        Self {
            users: memory.clone(),
            vouches: memory.clone(),
            history: memory.clone(),
            activity: memory.clone(),
            communities: memory.clone(),
            connections: memory.clone(),
            accountability: memory,
            backend: Backend::Memory,
        }
    }

    pub fn postgres(db: Arc<DatabasePool>) -> Self {
        Self {
            users: Arc::new(db.users()),
            vouches: Arc::new(db.vouches()),
            history: Arc::new(db.history()),
            activity: Arc::new(db.activity()),
            communities: Arc::new(db.communities()),
            connections: Arc::new(db.connections()),
            accountability: Arc::new(db.accountability()),
            backend: Backend::Postgres(db),
        }
    }

    /// Release backend resources; the handle must not be used afterwards
    pub async fn close(&self) {
        match &self.backend {
            Backend::Memory => {}
            Backend::Postgres(db) => db.close().await,
        }
        info!("Store closed");
    }

    pub fn is_postgres(&self) -> bool {
        matches!(self.backend, Backend::Postgres(_))
    }
}
