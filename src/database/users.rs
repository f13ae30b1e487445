//! User Repository - score columns of the platform user table

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::debug;

use super::UserRepository;
use crate::error::{TrustError, TrustResult};
use crate::models::User;
use crate::score::TrustLevel;

const USER_COLUMNS: &str =
    "id, username, trust_score, trust_level, is_active, deleted_at, created_at, last_active_at";

pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &PgRow) -> TrustResult<User> {
    let level: String = row.try_get("trust_level")?;
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        trust_score: row.try_get("trust_score")?,
        trust_level: TrustLevel::parse(&level)
            .ok_or_else(|| TrustError::Storage(format!("Unknown trust level: {}", level)))?,
        is_active: row.try_get("is_active")?,
        deleted_at: row.try_get("deleted_at")?,
        created_at: row.try_get("created_at")?,
        last_active_at: row.try_get("last_active_at")?,
    })
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn get_user(&self, user_id: &str) -> TrustResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM trust.users WHERE id = $1", USER_COLUMNS))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn update_score(&self, user_id: &str, score: f64, level: TrustLevel) -> TrustResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE trust.users
            SET trust_score = $2, trust_level = $3
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(score)
        .bind(level.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TrustError::not_found("user", user_id));
        }

        debug!(user_id = %user_id, score = score, level = %level, "Stored trust score");
        Ok(())
    }

    async fn ranked_users(&self, among: Option<&[String]>) -> TrustResult<Vec<User>> {
        let ids: Option<Vec<String>> = among.map(|ids| ids.to_vec());
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM trust.users
            WHERE is_active = TRUE
              AND deleted_at IS NULL
              AND trust_score > 0
              AND ($1::text[] IS NULL OR id = ANY($1))
            ORDER BY trust_score DESC, id ASC
            "#,
            USER_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(user_from_row).collect()
    }

    async fn active_users(&self) -> TrustResult<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM trust.users WHERE is_active = TRUE AND deleted_at IS NULL",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(user_from_row).collect()
    }
}
