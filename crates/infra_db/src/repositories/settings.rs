//! Settings repository
//!
//! Key-value business settings read at the start of every billing run.

use sqlx::{FromRow, PgPool};

use crate::error::DatabaseError;

/// A single stored setting
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct SettingRow {
    pub key: String,
    pub value: String,
}

/// Repository for the `billing_settings` table
#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: PgPool,
}

impl SettingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn load_all(&self) -> Result<Vec<SettingRow>, DatabaseError> {
        let rows = sqlx::query_as::<_, SettingRow>("SELECT key, value FROM billing_settings ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Inserts or replaces a setting
    pub async fn upsert(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO billing_settings (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM billing_settings WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
