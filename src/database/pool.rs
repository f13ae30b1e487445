//! Database Connection Pool using sqlx

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::database::activity::{
    PgAccountabilityRepository, PgActivityRepository, PgCommunityRepository, PgConnectionRepository,
};
use crate::database::history::PgHistoryRepository;
use crate::database::users::PgUserRepository;
use crate::database::vouches::PgVouchRepository;
use crate::error::{TrustError, TrustResult};

pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    pub async fn new(connection_string: &str, max_connections: u32) -> TrustResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .map_err(|e| TrustError::Storage(format!("Failed to connect to PostgreSQL: {}", e)))?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create the `trust` schema and every table the engine reads or writes.
    /// Tables owned by collaborator modules are created only if missing.
    pub async fn init_schema(&self) -> TrustResult<()> {
        info!("Initializing trust schema...");

        let statements = [
            "CREATE SCHEMA IF NOT EXISTS trust",
            r#"
            CREATE TABLE IF NOT EXISTS trust.users (
                id VARCHAR(255) PRIMARY KEY,
                username VARCHAR(255),
                trust_score DOUBLE PRECISION NOT NULL DEFAULT 0.0,
                trust_level VARCHAR(16) NOT NULL DEFAULT 'starter',
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                deleted_at TIMESTAMP WITH TIME ZONE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                last_active_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                CHECK (trust_score >= 0 AND trust_score <= 100)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS trust.vouches (
                id VARCHAR(64) PRIMARY KEY,
                voucher_id VARCHAR(255) NOT NULL REFERENCES trust.users(id),
                vouchee_id VARCHAR(255) NOT NULL REFERENCES trust.users(id),
                vouch_type VARCHAR(16) NOT NULL,
                status VARCHAR(16) NOT NULL,
                weight_percentage DOUBLE PRECISION NOT NULL,
                community_id VARCHAR(255),
                message TEXT,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                approved_at TIMESTAMP WITH TIME ZONE,
                revoked_at TIMESTAMP WITH TIME ZONE,
                revoke_reason TEXT,
                CHECK (voucher_id <> vouchee_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS trust.score_history (
                id VARCHAR(64) PRIMARY KEY,
                seq BIGSERIAL,
                user_id VARCHAR(255) NOT NULL REFERENCES trust.users(id),
                score DOUBLE PRECISION NOT NULL,
                previous_score DOUBLE PRECISION NOT NULL,
                change DOUBLE PRECISION NOT NULL,
                reason TEXT NOT NULL,
                component VARCHAR(32),
                related_entity_type VARCHAR(64),
                related_entity_id VARCHAR(255),
                timestamp TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS trust.user_stats (
                user_id VARCHAR(255) PRIMARY KEY,
                events_attended INTEGER NOT NULL DEFAULT 0,
                events_hosted INTEGER NOT NULL DEFAULT 0,
                communities_joined INTEGER NOT NULL DEFAULT 0,
                services_provided INTEGER NOT NULL DEFAULT 0,
                vouches_given INTEGER NOT NULL DEFAULT 0,
                vouches_received INTEGER NOT NULL DEFAULT 0,
                events_no_show INTEGER NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS trust.trust_moments (
                id VARCHAR(64) PRIMARY KEY,
                giver_id VARCHAR(255) NOT NULL,
                receiver_id VARCHAR(255) NOT NULL,
                rating SMALLINT NOT NULL CHECK (rating BETWEEN 1 AND 5),
                moment_type VARCHAR(64) NOT NULL,
                tags TEXT[] NOT NULL DEFAULT '{}',
                is_public BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS trust.community_members (
                community_id VARCHAR(255) NOT NULL,
                user_id VARCHAR(255) NOT NULL,
                role VARCHAR(16) NOT NULL DEFAULT 'member',
                joined_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                PRIMARY KEY (community_id, user_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS trust.connections (
                user_id VARCHAR(255) NOT NULL,
                peer_id VARCHAR(255) NOT NULL,
                accepted_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                PRIMARY KEY (user_id, peer_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS trust.accountability_logs (
                id VARCHAR(64) PRIMARY KEY,
                voucher_id VARCHAR(255) NOT NULL,
                vouchee_id VARCHAR(255) NOT NULL,
                vouch_id VARCHAR(64),
                event VARCHAR(32) NOT NULL,
                impact DOUBLE PRECISION NOT NULL,
                reason TEXT,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_vouches_vouchee ON trust.vouches(vouchee_id, vouch_type, status)",
            "CREATE INDEX IF NOT EXISTS idx_vouches_voucher ON trust.vouches(voucher_id)",
            "CREATE INDEX IF NOT EXISTS idx_history_user ON trust.score_history(user_id, seq)",
            "CREATE INDEX IF NOT EXISTS idx_moments_receiver ON trust.trust_moments(receiver_id)",
            "CREATE INDEX IF NOT EXISTS idx_users_score ON trust.users(trust_score DESC, id)",
            "CREATE INDEX IF NOT EXISTS idx_accountability_voucher ON trust.accountability_logs(voucher_id)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| TrustError::Storage(format!("Failed to initialize schema: {}", e)))?;
        }

        info!("Trust schema initialized");
        Ok(())
    }

    pub fn users(&self) -> PgUserRepository {
        PgUserRepository::new(self.pool.clone())
    }

    pub fn vouches(&self) -> PgVouchRepository {
        PgVouchRepository::new(self.pool.clone())
    }

    pub fn history(&self) -> PgHistoryRepository {
        PgHistoryRepository::new(self.pool.clone())
    }

    pub fn activity(&self) -> PgActivityRepository {
        PgActivityRepository::new(self.pool.clone())
    }

    pub fn communities(&self) -> PgCommunityRepository {
        PgCommunityRepository::new(self.pool.clone())
    }

    pub fn connections(&self) -> PgConnectionRepository {
        PgConnectionRepository::new(self.pool.clone())
    }

    pub fn accountability(&self) -> PgAccountabilityRepository {
        PgAccountabilityRepository::new(self.pool.clone())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL pool closed");
    }
}
