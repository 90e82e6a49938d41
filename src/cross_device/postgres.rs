//! Postgres-backed durable store.
//!
//! Tables are created by `db::init_pool` migrations. Message and stroke
//! inserts ignore an existing id; participant upserts overwrite every
//! column except the first-registration `created_at`.

use sqlx::PgPool;

use super::store::{DurableStore, MessageRow, ParticipantRow, PruneReport, StoreError, StrokeRow};
use crate::config::{RetentionPolicy, duration_ms};
use crate::model::now_ms;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[async_trait::async_trait]
impl DurableStore for PgStore {
    async fn upsert_participant(&self, row: ParticipantRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sync_participants (id, display_name, color, device_id, last_seen, cursor_x, cursor_y, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET \
                 display_name = EXCLUDED.display_name, color = EXCLUDED.color, device_id = EXCLUDED.device_id, \
                 last_seen = EXCLUDED.last_seen, cursor_x = EXCLUDED.cursor_x, cursor_y = EXCLUDED.cursor_y",
        )
        .bind(&row.id)
        .bind(&row.display_name)
        .bind(&row.color)
        .bind(&row.device_id)
        .bind(row.last_seen)
        .bind(row.cursor_x)
        .bind(row.cursor_y)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_participant(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sync_participants WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_message(&self, row: MessageRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sync_messages (id, author_id, author_name, author_color, content, device_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (id) DO NOTHING",
        )
        .bind(&row.id)
        .bind(&row.author_id)
        .bind(&row.author_name)
        .bind(&row.author_color)
        .bind(&row.content)
        .bind(&row.device_id)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_stroke(&self, row: StrokeRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sync_strokes (id, device_id, points_blob, color, thickness, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (id) DO NOTHING",
        )
        .bind(&row.id)
        .bind(&row.device_id)
        .bind(&row.points_blob)
        .bind(&row.color)
        .bind(row.thickness)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_strokes(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sync_strokes").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_active_participants(&self, since: i64) -> Result<Vec<ParticipantRow>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String, String, i64, Option<f64>, Option<f64>)>(
            "SELECT id, display_name, color, device_id, last_seen, cursor_x, cursor_y \
             FROM sync_participants WHERE last_seen >= $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, display_name, color, device_id, last_seen, cursor_x, cursor_y)| ParticipantRow {
                id,
                display_name,
                color,
                device_id,
                last_seen,
                cursor_x,
                cursor_y,
            })
            .collect())
    }

    async fn fetch_recent_messages(&self, n: usize) -> Result<Vec<MessageRow>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String, String, String, String, i64)>(
            "SELECT id, author_id, author_name, author_color, content, device_id, created_at \
             FROM sync_messages ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(limit(n))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .rev()
            .map(|(id, author_id, author_name, author_color, content, device_id, created_at)| MessageRow {
                id,
                author_id,
                author_name,
                author_color,
                content,
                device_id,
                created_at,
            })
            .collect())
    }

    async fn fetch_recent_strokes(&self, n: usize) -> Result<Vec<StrokeRow>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String, String, f64, i64)>(
            "SELECT id, device_id, points_blob, color, thickness, created_at \
             FROM sync_strokes ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(limit(n))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .rev()
            .map(|(id, device_id, points_blob, color, thickness, created_at)| StrokeRow {
                id,
                device_id,
                points_blob,
                color,
                thickness,
                created_at,
            })
            .collect())
    }

    async fn prune(&self, policy: &RetentionPolicy, now: i64) -> Result<PruneReport, StoreError> {
        let cutoff = now - duration_ms(policy.participant_ttl);
        let mut tx = self.pool.begin().await?;

        let participants = sqlx::query("DELETE FROM sync_participants WHERE last_seen < $1")
            .bind(cutoff)
            .execute(tx.as_mut())
            .await?
            .rows_affected();

        let messages = sqlx::query(
            "DELETE FROM sync_messages WHERE id NOT IN \
             (SELECT id FROM sync_messages ORDER BY created_at DESC, id DESC LIMIT $1)",
        )
        .bind(limit(policy.max_messages))
        .execute(tx.as_mut())
        .await?
        .rows_affected();

        let strokes = sqlx::query(
            "DELETE FROM sync_strokes WHERE id NOT IN \
             (SELECT id FROM sync_strokes ORDER BY created_at DESC, id DESC LIMIT $1)",
        )
        .bind(limit(policy.max_strokes))
        .execute(tx.as_mut())
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(PruneReport { participants, messages, strokes })
    }
}

#[cfg(test)]
#[path = "postgres_test.rs"]
mod tests;
