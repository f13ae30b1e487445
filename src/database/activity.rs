//! Collaborator projections - activity counters, trust moments,
//! community memberships, connections and accountability logs.
//!
//! Everything here except the accountability log is read-only for the engine.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::error;

use super::{AccountabilityRepository, ActivityRepository, CommunityRepository, ConnectionRepository};
use crate::error::{TrustError, TrustResult};
use crate::models::{
    AccountabilityEvent, AccountabilityLog, CommunityMembership, CommunityRole, Connection,
    TrustMoment, UserStat,
};

fn count(row: &PgRow, column: &str) -> TrustResult<u32> {
    let value: i32 = row.try_get(column)?;
    Ok(value.max(0) as u32)
}

pub struct PgActivityRepository {
    pool: PgPool,
}

impl PgActivityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityRepository for PgActivityRepository {
    async fn user_stat(&self, user_id: &str) -> TrustResult<UserStat> {
        let row = sqlx::query(
            r#"
            SELECT events_attended, events_hosted, communities_joined, services_provided,
                   vouches_given, vouches_received, events_no_show
            FROM trust.user_stats
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(UserStat {
                events_attended: count(&row, "events_attended")?,
                events_hosted: count(&row, "events_hosted")?,
                communities_joined: count(&row, "communities_joined")?,
                services_provided: count(&row, "services_provided")?,
                vouches_given: count(&row, "vouches_given")?,
                vouches_received: count(&row, "vouches_received")?,
                events_no_show: count(&row, "events_no_show")?,
            }),
            None => Ok(UserStat::default()),
        }
    }

    async fn trust_moments_received(&self, user_id: &str) -> TrustResult<Vec<TrustMoment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, giver_id, receiver_id, rating, moment_type, tags, is_public, created_at
            FROM trust.trust_moments
            WHERE receiver_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut moments = Vec::with_capacity(rows.len());
        for row in rows {
            let rating: i16 = row.try_get("rating")?;
            let tags: Vec<String> = row.try_get("tags")?;
            moments.push(TrustMoment {
                id: row.try_get("id")?,
                giver_id: row.try_get("giver_id")?,
                receiver_id: row.try_get("receiver_id")?,
                rating: rating.clamp(1, 5) as u8,
                moment_type: row.try_get("moment_type")?,
                tags: tags.into_iter().collect(),
                is_public: row.try_get("is_public")?,
                created_at: row.try_get("created_at")?,
            });
        }

        Ok(moments)
    }
}

pub struct PgCommunityRepository {
    pool: PgPool,
}

impl PgCommunityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn membership_from_row(row: &PgRow) -> TrustResult<CommunityMembership> {
    let role: String = row.try_get("role")?;
    Ok(CommunityMembership {
        community_id: row.try_get("community_id")?,
        user_id: row.try_get("user_id")?,
        role: CommunityRole::parse(&role)
            .ok_or_else(|| TrustError::Storage(format!("Unknown community role: {}", role)))?,
        joined_at: row.try_get("joined_at")?,
    })
}

#[async_trait]
impl CommunityRepository for PgCommunityRepository {
    async fn membership(&self, community_id: &str, user_id: &str) -> TrustResult<Option<CommunityMembership>> {
        let row = sqlx::query(
            r#"
            SELECT community_id, user_id, role, joined_at
            FROM trust.community_members
            WHERE community_id = $1 AND user_id = $2
            "#,
        )
        .bind(community_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(membership_from_row).transpose()
    }

    async fn memberships_for_user(&self, user_id: &str) -> TrustResult<Vec<CommunityMembership>> {
        let rows = sqlx::query(
            r#"
            SELECT community_id, user_id, role, joined_at
            FROM trust.community_members
            WHERE user_id = $1
            ORDER BY joined_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(membership_from_row).collect()
    }

    async fn member_ids(&self, community_id: &str) -> TrustResult<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT user_id FROM trust.community_members WHERE community_id = $1")
                .bind(community_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }
}

pub struct PgConnectionRepository {
    pool: PgPool,
}

impl PgConnectionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConnectionRepository for PgConnectionRepository {
    async fn connections(&self, user_id: &str) -> TrustResult<Vec<Connection>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, peer_id, accepted_at
            FROM trust.connections
            WHERE user_id = $1
            ORDER BY accepted_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut connections = Vec::with_capacity(rows.len());
        for row in rows {
            connections.push(Connection {
                user_id: row.try_get("user_id")?,
                peer_id: row.try_get("peer_id")?,
                accepted_at: row.try_get("accepted_at")?,
            });
        }
        Ok(connections)
    }

    async fn are_connected(&self, a: &str, b: &str) -> TrustResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM trust.connections WHERE user_id = $1 AND peer_id = $2)",
        )
        .bind(a)
        .bind(b)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

pub struct PgAccountabilityRepository {
    pool: PgPool,
}

impl PgAccountabilityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountabilityRepository for PgAccountabilityRepository {
    async fn append_log(&self, log: &AccountabilityLog) -> TrustResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trust.accountability_logs
                (id, voucher_id, vouchee_id, vouch_id, event, impact, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&log.id)
        .bind(&log.voucher_id)
        .bind(&log.vouchee_id)
        .bind(&log.vouch_id)
        .bind(log.event.as_str())
        .bind(log.impact)
        .bind(&log.reason)
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn logs_for_voucher(&self, voucher_id: &str) -> TrustResult<Vec<AccountabilityLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, voucher_id, vouchee_id, vouch_id, event, impact, reason, created_at
            FROM trust.accountability_logs
            WHERE voucher_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(voucher_id)
        .fetch_all(&self.pool)
        .await?;

        let mut logs = Vec::with_capacity(rows.len());
        for row in rows {
            let event_str: String = row.try_get("event")?;
            let event = match AccountabilityEvent::parse(&event_str) {
                Some(event) => event,
                None => {
                    error!("Unknown accountability event: {}", event_str);
                    continue;
                }
            };

            logs.push(AccountabilityLog {
                id: row.try_get("id")?,
                voucher_id: row.try_get("voucher_id")?,
                vouchee_id: row.try_get("vouchee_id")?,
                vouch_id: row.try_get("vouch_id")?,
                event,
                impact: row.try_get("impact")?,
                reason: row.try_get("reason")?,
                created_at: row.try_get("created_at")?,
            });
        }

        Ok(logs)
    }
}
