//! Case accept (claim) operations.

use sqlx::SqlitePool;

use crate::error::{DatabaseError, Result};
use crate::models::CaseAccept;

/// Record a claim.
///
/// Fails with `AlreadyExists` if the event ID is already recorded or the
/// agent already claimed the same control event.
pub async fn insert_accept(pool: &SqlitePool, accept: &CaseAccept) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO case_accepts (event_id, control_event, case_id, user_id)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&accept.event_id)
    .bind(&accept.control_event)
    .bind(&accept.case_id)
    .bind(&accept.user_id)
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::on_insert(e, "CaseAccept", &accept.event_id))?;

    Ok(())
}

/// Get the claim an agent holds on a control event.
pub async fn get_accept(
    pool: &SqlitePool,
    control_event: &str,
    user_id: &str,
) -> Result<Option<CaseAccept>> {
    let accept = sqlx::query_as::<_, CaseAccept>(
        r#"
        SELECT event_id, control_event, case_id, user_id
        FROM case_accepts
        WHERE control_event = ? AND user_id = ?
        "#,
    )
    .bind(control_event)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(accept)
}

/// Get a claim by the event ID that made it.
pub async fn get_accept_by_id(pool: &SqlitePool, event_id: &str) -> Result<Option<CaseAccept>> {
    let accept = sqlx::query_as::<_, CaseAccept>(
        r#"
        SELECT event_id, control_event, case_id, user_id
        FROM case_accepts
        WHERE event_id = ?
        "#,
    )
    .bind(event_id)
    .fetch_optional(pool)
    .await?;

    Ok(accept)
}

/// Delete a claim by the event ID that made it.
pub async fn delete_accept_by_id(pool: &SqlitePool, event_id: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        DELETE FROM case_accepts
        WHERE event_id = ?
        "#,
    )
    .bind(event_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound {
            entity: "CaseAccept",
            id: event_id.to_string(),
        });
    }

    Ok(())
}

/// Delete an agent's claim on a control event.
pub async fn delete_accept_by_ctrl(
    pool: &SqlitePool,
    control_event: &str,
    user_id: &str,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        DELETE FROM case_accepts
        WHERE control_event = ? AND user_id = ?
        "#,
    )
    .bind(control_event)
    .bind(user_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound {
            entity: "CaseAccept",
            id: format!("{}/{}", control_event, user_id),
        });
    }

    Ok(())
}

/// List all claims on a case.
pub async fn list_accepts_for_case(pool: &SqlitePool, case_id: &str) -> Result<Vec<CaseAccept>> {
    let accepts = sqlx::query_as::<_, CaseAccept>(
        r#"
        SELECT event_id, control_event, case_id, user_id
        FROM case_accepts
        WHERE case_id = ?
        ORDER BY event_id
        "#,
    )
    .bind(case_id)
    .fetch_all(pool)
    .await?;

    Ok(accepts)
}
