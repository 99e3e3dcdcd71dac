use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_postgres::Row;

use crate::error::{Error, Result};
use crate::store::naming::{qualified_table, validate_identifier};
use crate::types::{Message, MessageFilter, MessageId};

/// Source of undelivered messages for a consumer
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Messages of `topic` with id greater than `after`, ascending, at most `limit`
    ///
    /// Sources may push the filter down; callers still check it.
    async fn fetch_after(
        &self,
        topic: &str,
        consumer: &str,
        after: MessageId,
        filter: &MessageFilter,
        limit: i64,
    ) -> Result<Vec<Message>>;

    /// Id of the newest message in `topic`, `None` for an empty topic
    async fn latest_message_id(&self, topic: &str) -> Result<Option<MessageId>>;
}

#[async_trait]
impl<T: MessageSource + ?Sized> MessageSource for Arc<T> {
    async fn fetch_after(
        &self,
        topic: &str,
        consumer: &str,
        after: MessageId,
        filter: &MessageFilter,
        limit: i64,
    ) -> Result<Vec<Message>> {
        (**self).fetch_after(topic, consumer, after, filter, limit).await
    }

    async fn latest_message_id(&self, topic: &str) -> Result<Option<MessageId>> {
        (**self).latest_message_id(topic).await
    }
}

/// Postgres message store with one table per topic
#[derive(Clone)]
pub struct PgMessageStore {
    pool: Pool,
    schema_name: String,
    ready_tables: Arc<Mutex<HashSet<String>>>,
}

impl PgMessageStore {
    pub fn new(pool: Pool, schema_name: impl Into<String>) -> Result<Self> {
        let schema_name = schema_name.into();
        validate_identifier(&schema_name)?;

        Ok(Self {
            pool,
            schema_name,
            ready_tables: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Append a message to `topic`, returning its store-assigned id
    ///
    /// Producers normally write through their own path; this exists for
    /// tooling and tests. The id on `message` is ignored.
    pub async fn publish(&self, topic: &str, message: &Message) -> Result<MessageId> {
        let table = self.ensure_table(topic).await?;
        let conn = self.pool.get().await?;

        let properties = message
            .properties
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let sql = format!(
            "INSERT INTO {} (content, message_type, properties, generated_at)
             VALUES ($1, $2, $3, $4) RETURNING id",
            table
        );
        let row = conn
            .query_one(
                &sql,
                &[
                    &message.content,
                    &message.message_type,
                    &properties,
                    &message.generated_at,
                ],
            )
            .await?;

        Ok(MessageId::new(row.get::<_, i64>("id")))
    }

    async fn ensure_table(&self, topic: &str) -> Result<String> {
        let table = qualified_table(&self.schema_name, &format!("{}_messages", topic))?;

        if self
            .ready_tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(topic)
        {
            return Ok(table);
        }

        let conn = self.pool.get().await?;
        let ddl = format!(
            "CREATE SCHEMA IF NOT EXISTS \"{schema}\";
             CREATE TABLE IF NOT EXISTS {table} (
                 id BIGSERIAL PRIMARY KEY,
                 content TEXT NOT NULL,
                 message_type TEXT,
                 properties TEXT,
                 generated_at TIMESTAMPTZ NOT NULL DEFAULT now()
             );",
            schema = self.schema_name,
            table = table,
        );
        conn.batch_execute(&ddl).await?;

        self.ready_tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string());

        Ok(table)
    }
}

fn parse_message_row(row: &Row) -> Result<Message> {
    // Properties are stored as JSON text
    let properties: Option<Value> = row
        .get::<_, Option<String>>("properties")
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| Error::DatabaseError(format!("Invalid JSON in properties column: {}", e)))?;

    let generated_at: DateTime<Utc> = row.get("generated_at");

    Ok(Message {
        id: MessageId::new(row.get::<_, i64>("id")),
        content: row.get("content"),
        message_type: row.get("message_type"),
        properties,
        generated_at,
    })
}

#[async_trait]
impl MessageSource for PgMessageStore {
    async fn fetch_after(
        &self,
        topic: &str,
        _consumer: &str,
        after: MessageId,
        filter: &MessageFilter,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let table = self.ensure_table(topic).await?;
        let conn = self.pool.get().await?;

        let sql = format!(
            "SELECT id, content, message_type, properties, generated_at FROM {}
             WHERE id > $1 AND ($2::text[] IS NULL OR message_type = ANY($2))
             ORDER BY id ASC LIMIT $3",
            table
        );
        let types = filter.type_list();
        let rows = conn.query(&sql, &[&after.value(), &types, &limit]).await?;

        rows.iter().map(parse_message_row).collect()
    }

    async fn latest_message_id(&self, topic: &str) -> Result<Option<MessageId>> {
        let table = self.ensure_table(topic).await?;
        let conn = self.pool.get().await?;

        let sql = format!("SELECT max(id) AS id FROM {}", table);
        let row = conn.query_one(&sql, &[]).await?;

        Ok(row.get::<_, Option<i64>>("id").map(MessageId::new))
    }
}
