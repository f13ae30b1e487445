//! Vouch Repository - PostgreSQL vouch ledger
//!
//! Slot-checked writes run in a transaction holding an advisory lock on
//! `(vouchee_id, vouch_type)`, so the count and the write cannot interleave
//! with another writer for the same slot set, even across processes. The
//! one-open-vouch-per-voucher check runs under the same lock.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::debug;

use super::VouchRepository;
use crate::error::{TrustError, TrustResult};
use crate::vouch::{CommitOutcome, Vouch, VouchStatus, VouchTransition, VouchType};

const VOUCH_COLUMNS: &str = "id, voucher_id, vouchee_id, vouch_type, status, weight_percentage, \
     community_id, message, created_at, approved_at, revoked_at, revoke_reason";

pub struct PgVouchRepository {
    pool: PgPool,
}

impl PgVouchRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_slot_set(
        tx: &mut Transaction<'_, Postgres>,
        vouchee_id: &str,
        vouch_type: VouchType,
    ) -> TrustResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("vouch:{}:{}", vouchee_id, vouch_type.as_str()))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn slots_used(
        tx: &mut Transaction<'_, Postgres>,
        vouchee_id: &str,
        vouch_type: VouchType,
        excluding: Option<&str>,
    ) -> TrustResult<usize> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM trust.vouches
            WHERE vouchee_id = $1
              AND vouch_type = $2
              AND status IN ('APPROVED', 'ACTIVE')
              AND ($3::varchar IS NULL OR id <> $3)
            "#,
        )
        .bind(vouchee_id)
        .bind(vouch_type.as_str())
        .bind(excluding)
        .fetch_one(&mut **tx)
        .await?;

        Ok(count.max(0) as usize)
    }

    async fn open_vouch_exists(
        tx: &mut Transaction<'_, Postgres>,
        vouch: &Vouch,
        vouch_type: VouchType,
    ) -> TrustResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM trust.vouches
                WHERE voucher_id = $1
                  AND vouchee_id = $2
                  AND vouch_type = $3
                  AND status IN ('PENDING', 'APPROVED', 'ACTIVE')
                  AND id <> $4
            )
            "#,
        )
        .bind(&vouch.voucher_id)
        .bind(&vouch.vouchee_id)
        .bind(vouch_type.as_str())
        .bind(&vouch.id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(exists)
    }

    async fn fetch_many(&self, column: &str, user_id: &str) -> TrustResult<Vec<Vouch>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM trust.vouches WHERE {} = $1 ORDER BY created_at DESC",
            VOUCH_COLUMNS, column
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(vouch_from_row).collect()
    }
}

fn vouch_from_row(row: &PgRow) -> TrustResult<Vouch> {
    let vouch_type: String = row.try_get("vouch_type")?;
    let status: String = row.try_get("status")?;

    Ok(Vouch {
        id: row.try_get("id")?,
        voucher_id: row.try_get("voucher_id")?,
        vouchee_id: row.try_get("vouchee_id")?,
        vouch_type: VouchType::parse(&vouch_type)
            .ok_or_else(|| TrustError::Storage(format!("Unknown vouch type: {}", vouch_type)))?,
        status: VouchStatus::parse(&status)
            .ok_or_else(|| TrustError::Storage(format!("Unknown vouch status: {}", status)))?,
        weight_percentage: row.try_get("weight_percentage")?,
        community_id: row.try_get("community_id")?,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
        approved_at: row.try_get("approved_at")?,
        revoked_at: row.try_get("revoked_at")?,
        revoke_reason: row.try_get("revoke_reason")?,
    })
}

#[async_trait]
impl VouchRepository for PgVouchRepository {
    async fn get_vouch(&self, vouch_id: &str) -> TrustResult<Option<Vouch>> {
        let row = sqlx::query(&format!("SELECT {} FROM trust.vouches WHERE id = $1", VOUCH_COLUMNS))
            .bind(vouch_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(vouch_from_row).transpose()
    }

    async fn vouches_for_vouchee(&self, vouchee_id: &str) -> TrustResult<Vec<Vouch>> {
        self.fetch_many("vouchee_id", vouchee_id).await
    }

    async fn vouches_by_voucher(&self, voucher_id: &str) -> TrustResult<Vec<Vouch>> {
        self.fetch_many("voucher_id", voucher_id).await
    }

    async fn insert_vouch(&self, vouch: &Vouch) -> TrustResult<CommitOutcome> {
        let mut tx = self.pool.begin().await?;
        Self::lock_slot_set(&mut tx, &vouch.vouchee_id, vouch.vouch_type).await?;

        if vouch.status.is_open() && Self::open_vouch_exists(&mut tx, vouch, vouch.vouch_type).await? {
            tx.rollback().await?;
            return Ok(CommitOutcome::Duplicate);
        }

        if vouch.status.occupies_slot()
            && Self::slots_used(&mut tx, &vouch.vouchee_id, vouch.vouch_type, None).await?
                >= vouch.vouch_type.max_slots()
        {
            tx.rollback().await?;
            return Ok(CommitOutcome::SlotsFull);
        }

        sqlx::query(
            r#"
            INSERT INTO trust.vouches
                (id, voucher_id, vouchee_id, vouch_type, status, weight_percentage,
                 community_id, message, created_at, approved_at, revoked_at, revoke_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&vouch.id)
        .bind(&vouch.voucher_id)
        .bind(&vouch.vouchee_id)
        .bind(vouch.vouch_type.as_str())
        .bind(vouch.status.as_str())
        .bind(vouch.weight_percentage)
        .bind(&vouch.community_id)
        .bind(&vouch.message)
        .bind(vouch.created_at)
        .bind(vouch.approved_at)
        .bind(vouch.revoked_at)
        .bind(&vouch.revoke_reason)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(vouch_id = %vouch.id, status = %vouch.status, "Vouch inserted");
        Ok(CommitOutcome::Committed)
    }

    async fn commit_transition(&self, transition: &VouchTransition) -> TrustResult<CommitOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM trust.vouches WHERE id = $1 FOR UPDATE",
            VOUCH_COLUMNS
        ))
        .bind(&transition.vouch_id)
        .fetch_optional(&mut *tx)
        .await?;

        let current = match row {
            Some(row) => vouch_from_row(&row)?,
            None => {
                tx.rollback().await?;
                return Err(TrustError::not_found("vouch", transition.vouch_id.as_str()));
            }
        };

        if !transition.expected.contains(&current.status) {
            tx.rollback().await?;
            return Ok(CommitOutcome::StaleStatus(current.status));
        }

        let changes_type = transition.changes_type(&current);
        let claims_slot = transition.claims_slot(&current);
        if changes_type || claims_slot {
            Self::lock_slot_set(&mut tx, &current.vouchee_id, transition.vouch_type).await?;
        }

        if changes_type && Self::open_vouch_exists(&mut tx, &current, transition.vouch_type).await? {
            tx.rollback().await?;
            return Ok(CommitOutcome::Duplicate);
        }

        if claims_slot {
            let used = Self::slots_used(
                &mut tx,
                &current.vouchee_id,
                transition.vouch_type,
                Some(&current.id),
            )
            .await?;
            if used >= transition.vouch_type.max_slots() {
                tx.rollback().await?;
                return Ok(CommitOutcome::SlotsFull);
            }
        }

        sqlx::query(
            r#"
            UPDATE trust.vouches
            SET status = $2, vouch_type = $3, weight_percentage = $4,
                approved_at = $5, revoked_at = $6, revoke_reason = $7
            WHERE id = $1
            "#,
        )
        .bind(&transition.vouch_id)
        .bind(transition.status.as_str())
        .bind(transition.vouch_type.as_str())
        .bind(transition.weight_percentage)
        .bind(transition.approved_at)
        .bind(transition.revoked_at)
        .bind(&transition.revoke_reason)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(
            vouch_id = %transition.vouch_id,
            from = %current.status,
            to = %transition.status,
            "Vouch transition committed"
        );
        Ok(CommitOutcome::Committed)
    }
}
