//! Transport bookkeeping (sync tokens).

use sqlx::SqlitePool;

use crate::Result;

/// Key under which the `/sync` continuation token is stored.
pub const NEXT_BATCH_KEY: &str = "next_batch";

/// Store a value, replacing any previous one.
pub async fn set_value(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sync_state (key, value)
        VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a stored value.
pub async fn get_value(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>(
        r#"
        SELECT value
        FROM sync_state
        WHERE key = ?
        "#,
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(value)
}
