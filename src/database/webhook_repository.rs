use crate::database::error::{DatabaseError, DbResult};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const WEBHOOK_COLUMNS: &str =
    "id, event_type, source, payload, processed, attempts, last_error, created_at, processed_at";

/// Journal row for a received provider webhook. Events are persisted before
/// processing so a crash mid-processing can be replayed.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub event_type: String,
    pub source: String,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

pub struct WebhookRepository {
    pool: PgPool,
}

impl WebhookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn log_event(
        &self,
        event_type: &str,
        source: &str,
        payload: serde_json::Value,
    ) -> DbResult<WebhookEvent> {
        sqlx::query_as::<_, WebhookEvent>(&format!(
            "INSERT INTO webhook_events (id, event_type, source, payload, processed, attempts, created_at) \
             VALUES ($1, $2, $3, $4, FALSE, 0, NOW()) \
             RETURNING {WEBHOOK_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(event_type)
        .bind(source)
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn mark_processed(&self, event_id: Uuid) -> DbResult<WebhookEvent> {
        sqlx::query_as::<_, WebhookEvent>(&format!(
            "UPDATE webhook_events SET processed = TRUE, processed_at = NOW() WHERE id = $1 \
             RETURNING {WEBHOOK_COLUMNS}"
        ))
        .bind(event_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn record_failure(&self, event_id: Uuid, error: &str) -> DbResult<WebhookEvent> {
        sqlx::query_as::<_, WebhookEvent>(&format!(
            "UPDATE webhook_events SET attempts = attempts + 1, last_error = $2 WHERE id = $1 \
             RETURNING {WEBHOOK_COLUMNS}"
        ))
        .bind(event_id)
        .bind(error)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Unprocessed events eligible for replay: failed at least once, or
    /// orphaned by a crash mid-processing, and not yet out of attempts.
    /// Brand-new events still in the hands of the receiving handler are
    /// excluded.
    pub async fn get_pending_events(&self, limit: i64) -> DbResult<Vec<WebhookEvent>> {
        sqlx::query_as::<_, WebhookEvent>(&format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhook_events \
             WHERE processed = FALSE AND attempts < 5 \
               AND (attempts > 0 OR created_at < NOW() - INTERVAL '15 minutes') \
             ORDER BY created_at ASC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
