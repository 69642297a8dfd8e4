//! Case operations.

use sqlx::SqlitePool;

use crate::error::{DatabaseError, Result};
use crate::models::{Case, CaseChanges, ControlEvent};

/// Insert a new case.
pub async fn insert_case(pool: &SqlitePool, case: &Case) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO cases (id, user_id, displayname, room_name, last_bot_msg)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&case.id)
    .bind(&case.user_id)
    .bind(&case.displayname)
    .bind(&case.room_name)
    .bind(case.last_bot_msg)
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::on_insert(e, "Case", &case.id))?;

    Ok(())
}

/// Insert a case together with its first control event in one transaction.
///
/// Either both rows are committed or neither is.
pub async fn open_case(pool: &SqlitePool, case: &Case, control: &ControlEvent) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO cases (id, user_id, displayname, room_name, last_bot_msg)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&case.id)
    .bind(&case.user_id)
    .bind(&case.displayname)
    .bind(&case.room_name)
    .bind(case.last_bot_msg)
    .execute(&mut *tx)
    .await
    .map_err(|e| DatabaseError::on_insert(e, "Case", &case.id))?;

    sqlx::query(
        r#"
        INSERT INTO control_events (event_id, case_id, seq, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&control.event_id)
    .bind(&control.case_id)
    .bind(control.seq)
    .bind(control.created_at)
    .execute(&mut *tx)
    .await
    .map_err(|e| DatabaseError::on_insert(e, "ControlEvent", &control.event_id))?;

    tx.commit().await?;
    Ok(())
}

/// Get a case by room ID.
pub async fn get_case(pool: &SqlitePool, room_id: &str) -> Result<Option<Case>> {
    let case = sqlx::query_as::<_, Case>(
        r#"
        SELECT id, user_id, displayname, room_name, last_bot_msg
        FROM cases
        WHERE id = ?
        "#,
    )
    .bind(room_id)
    .fetch_optional(pool)
    .await?;

    Ok(case)
}

/// Apply a partial update to a case.
pub async fn edit_case(pool: &SqlitePool, room_id: &str, changes: &CaseChanges) -> Result<()> {
    if changes.is_empty() {
        return Ok(());
    }

    let result = sqlx::query(
        r#"
        UPDATE cases
        SET displayname = COALESCE(?, displayname),
            room_name = COALESCE(?, room_name),
            last_bot_msg = COALESCE(?, last_bot_msg)
        WHERE id = ?
        "#,
    )
    .bind(&changes.displayname)
    .bind(&changes.room_name)
    .bind(changes.last_bot_msg)
    .bind(room_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound {
            entity: "Case",
            id: room_id.to_string(),
        });
    }

    Ok(())
}

/// Count all cases.
pub async fn count_cases(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM cases")
        .fetch_one(pool)
        .await?;

    Ok(count)
}
