//! PostgreSQL 键值存储（kv_entries 表）

use super::{KeyValueStore, Mutation, StoreScope};
use crate::error::AppError;
use async_trait::async_trait;
use sqlx::{PgPool, Row};

pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl KeyValueStore for PgStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, AppError> {
        let row = sqlx::query("SELECT value FROM kv_entries WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.db)
            .await?;

        Ok(row.map(|r| r.get::<serde_json::Value, _>("value")))
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        scope: StoreScope,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, scope, value, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (key) DO UPDATE
            SET scope = EXCLUDED.scope, value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(scope.as_str())
        .bind(&value)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM kv_entries WHERE key = $1")
            .bind(key)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn update(
        &self,
        key: &str,
        scope: StoreScope,
        mutate: Mutation<'_>,
    ) -> Result<(), AppError> {
        let mut tx = self.db.begin().await?;

        // 先确保行存在，再以 FOR UPDATE 锁住该行；回滚会一并撤销占位行
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, scope, value, updated_at)
            VALUES ($1, $2, 'null'::jsonb, NOW())
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(scope.as_str())
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT value FROM kv_entries WHERE key = $1 FOR UPDATE")
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;
        let current: serde_json::Value = row.try_get("value")?;
        let current = (!current.is_null()).then_some(current);

        match mutate(current)? {
            Some(next) => {
                sqlx::query(
                    "UPDATE kv_entries SET scope = $2, value = $3, updated_at = NOW() WHERE key = $1",
                )
                .bind(key)
                .bind(scope.as_str())
                .bind(&next)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
            }
            None => tx.rollback().await?,
        }

        Ok(())
    }
}
