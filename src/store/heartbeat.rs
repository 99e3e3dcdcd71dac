use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Object, Pool};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::store::naming::qualified_table;

/// Reports that this server is alive to the coordination point
#[async_trait]
pub trait Heartbeater: Send + Sync {
    async fn beat(&self, target: &str) -> Result<()>;
}

#[async_trait]
impl<T: Heartbeater + ?Sized> Heartbeater for Arc<T> {
    async fn beat(&self, target: &str) -> Result<()> {
        (**self).beat(target).await
    }
}

/// Heartbeats recorded as `(target, beat_at)` rows, one per target
#[derive(Clone)]
pub struct PgHeartbeater {
    pool: Pool,
    schema_name: String,
    table: String,
    table_ready: Arc<AtomicBool>,
}

impl PgHeartbeater {
    pub fn new(pool: Pool, schema_name: &str) -> Result<Self> {
        Ok(Self {
            pool,
            schema_name: schema_name.to_string(),
            table: qualified_table(schema_name, "heartbeat")?,
            table_ready: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn ensure_table(&self, conn: &Object) -> Result<()> {
        if self.table_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let ddl = format!(
            "CREATE SCHEMA IF NOT EXISTS \"{}\";
             CREATE TABLE IF NOT EXISTS {} (target TEXT PRIMARY KEY, beat_at TIMESTAMPTZ NOT NULL);",
            self.schema_name, self.table
        );
        conn.batch_execute(&ddl).await?;

        self.table_ready.store(true, Ordering::Release);
        Ok(())
    }
}

#[async_trait]
impl Heartbeater for PgHeartbeater {
    async fn beat(&self, target: &str) -> Result<()> {
        let conn = self.pool.get().await?;
        self.ensure_table(&conn).await?;

        let sql = format!(
            "INSERT INTO {} (target, beat_at) VALUES ($1, $2)
             ON CONFLICT (target) DO UPDATE SET beat_at = EXCLUDED.beat_at",
            self.table
        );
        conn.execute(&sql, &[&target, &Utc::now()]).await?;

        Ok(())
    }
}
