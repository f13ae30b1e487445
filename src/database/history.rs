//! History Repository - append-only score audit rows

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use super::HistoryRepository;
use crate::error::TrustResult;
use crate::score::{ScoreComponent, TrustScoreHistory};

pub struct PgHistoryRepository {
    pool: PgPool,
}

impl PgHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryRepository for PgHistoryRepository {
    async fn append(&self, entry: &TrustScoreHistory) -> TrustResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trust.score_history
                (id, user_id, score, previous_score, change, reason, component,
                 related_entity_type, related_entity_id, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.user_id)
        .bind(entry.score)
        .bind(entry.previous_score)
        .bind(entry.change)
        .bind(&entry.reason)
        .bind(entry.component.map(|c| c.as_str()))
        .bind(&entry.related_entity_type)
        .bind(&entry.related_entity_id)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn history_for_user(&self, user_id: &str, limit: usize) -> TrustResult<Vec<TrustScoreHistory>> {
        // seq preserves insertion order when timestamps collide
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, score, previous_score, change, reason, component,
                   related_entity_type, related_entity_id, timestamp
            FROM trust.score_history
            WHERE user_id = $1
            ORDER BY seq DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let component: Option<String> = row.try_get("component")?;
            entries.push(TrustScoreHistory {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                score: row.try_get("score")?,
                previous_score: row.try_get("previous_score")?,
                change: row.try_get("change")?,
                reason: row.try_get("reason")?,
                component: component.as_deref().and_then(ScoreComponent::parse),
                related_entity_type: row.try_get("related_entity_type")?,
                related_entity_id: row.try_get("related_entity_id")?,
                timestamp: row.try_get("timestamp")?,
            });
        }

        Ok(entries)
    }
}
