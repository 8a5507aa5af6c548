// src/activity.rs - Additive-only activity log
use chrono::Utc;
use sqlx::SqliteConnection;
use uuid::Uuid;

/// Append one activity entry. Runs on the caller's connection so the entry
/// commits or rolls back together with the mutation it records.
pub async fn record_activity(
    conn: &mut SqliteConnection,
    user_id: &str,
    action: &str,
    entity_type: &str,
    entity_id: &str,
    details: Option<&serde_json::Value>,
) -> Result<(), sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        r#"INSERT INTO activity_log
           (id, user_id, action, entity_type, entity_id, details, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&id)
    .bind(user_id)
    .bind(action)
    .bind(entity_type)
    .bind(entity_id)
    .bind(details.map(|d| d.to_string()))
    .bind(now)
    .execute(conn)
    .await?;

    Ok(())
}
