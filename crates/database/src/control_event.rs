//! Control event operations.
//!
//! The latest control event of a case is the one with the highest
//! `(seq, event_id)` pair. Ordering by both columns keeps the pick
//! deterministic even if two rows ever share a sequence index.

use sqlx::SqlitePool;

use crate::error::{DatabaseError, Result};
use crate::models::ControlEvent;

/// Insert a control event.
pub async fn insert_control_event(pool: &SqlitePool, event: &ControlEvent) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO control_events (event_id, case_id, seq, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&event.event_id)
    .bind(&event.case_id)
    .bind(event.seq)
    .bind(event.created_at)
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::on_insert(e, "ControlEvent", &event.event_id))?;

    Ok(())
}

/// Get a control event by its event ID.
pub async fn get_control_event(pool: &SqlitePool, event_id: &str) -> Result<Option<ControlEvent>> {
    let event = sqlx::query_as::<_, ControlEvent>(
        r#"
        SELECT event_id, case_id, seq, created_at
        FROM control_events
        WHERE event_id = ?
        "#,
    )
    .bind(event_id)
    .fetch_optional(pool)
    .await?;

    Ok(event)
}

/// Get the latest control event for a case.
pub async fn latest_control_event(pool: &SqlitePool, case_id: &str) -> Result<Option<ControlEvent>> {
    let event = sqlx::query_as::<_, ControlEvent>(
        r#"
        SELECT event_id, case_id, seq, created_at
        FROM control_events
        WHERE case_id = ?
        ORDER BY seq DESC, event_id DESC
        LIMIT 1
        "#,
    )
    .bind(case_id)
    .fetch_optional(pool)
    .await?;

    Ok(event)
}

/// List every control event of a case, latest first.
pub async fn list_control_events(pool: &SqlitePool, case_id: &str) -> Result<Vec<ControlEvent>> {
    let events = sqlx::query_as::<_, ControlEvent>(
        r#"
        SELECT event_id, case_id, seq, created_at
        FROM control_events
        WHERE case_id = ?
        ORDER BY seq DESC, event_id DESC
        "#,
    )
    .bind(case_id)
    .fetch_all(pool)
    .await?;

    Ok(events)
}
