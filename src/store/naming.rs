//! SQL identifier helpers for per-topic tables.

use crate::error::{Error, Result};

/// Longest identifier Postgres keeps without truncation
const MAX_IDENTIFIER_LEN: usize = 63;

/// Check that a topic or schema name is usable as a SQL identifier.
///
/// Only ASCII letters, digits and underscores are accepted, so the name can
/// be interpolated into DDL and queries without escaping.
///
/// # Examples
///
/// ```
/// use broker_consumer::store::naming::validate_identifier;
///
/// assert!(validate_identifier("orders").is_ok());
/// assert!(validate_identifier("orders_v2").is_ok());
/// assert!(validate_identifier("").is_err());
/// assert!(validate_identifier("orders; drop table x").is_err());
/// ```
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::ValidationError("Identifier is empty".to_string()));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::ValidationError(format!(
            "Identifier '{}' is longer than {} bytes",
            name, MAX_IDENTIFIER_LEN
        )));
    }
    if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Err(Error::ValidationError(format!(
            "Identifier '{}' may only contain letters, digits and underscores",
            name
        )));
    }
    Ok(())
}

/// Qualified, quoted table name for `table` inside `schema`.
///
/// # Examples
///
/// ```
/// use broker_consumer::store::naming::qualified_table;
///
/// assert_eq!(qualified_table("acks", "orders").unwrap(), "\"acks\".\"orders\"");
/// assert!(qualified_table("acks", "or-ders").is_err());
/// ```
pub fn qualified_table(schema: &str, table: &str) -> Result<String> {
    validate_identifier(schema)?;
    validate_identifier(table)?;
    Ok(format!("\"{}\".\"{}\"", schema, table))
}

/// Longest suffix appended to a topic to name its tables
const TOPIC_TABLE_SUFFIX: &str = "_messages";

/// Check that a topic can name its ack and message tables.
///
/// Same character rules as [`validate_identifier`], with room left for the
/// table suffix.
///
/// ```
/// use broker_consumer::store::naming::validate_topic;
///
/// assert!(validate_topic("orders").is_ok());
/// assert!(validate_topic("orders.v1").is_err());
/// assert!(validate_topic(&"a".repeat(60)).is_err());
/// ```
pub fn validate_topic(topic: &str) -> Result<()> {
    validate_identifier(topic)?;
    let max = MAX_IDENTIFIER_LEN - TOPIC_TABLE_SUFFIX.len();
    if topic.len() > max {
        return Err(Error::ValidationError(format!(
            "Topic '{}' is longer than {} bytes",
            topic, max
        )));
    }
    Ok(())
}
