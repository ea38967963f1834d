use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::models::{SyncItem, SyncItemState};
use crate::store::{
    connection::Database,
    helpers::{parse_datetime, parse_json, parse_optional_datetime, parse_sync_kind,
              parse_sync_state},
};

fn row_to_item(row: &Row) -> Result<SyncItem> {
    let kind: String = row.get("kind")?;
    let payload: String = row.get("payload")?;
    let state: String = row.get("state")?;
    let retry_count: i64 = row.get("retry_count")?;
    let enqueued_at: String = row.get("enqueued_at")?;
    let last_attempt_at: Option<String> = row.get("last_attempt_at")?;

    Ok(SyncItem {
        id: row.get("id")?,
        kind: parse_sync_kind(&kind)?,
        payload: parse_json(&payload, "payload")?,
        state: parse_sync_state(&state)?,
        retry_count: retry_count.max(0) as u32,
        enqueued_at: parse_datetime(&enqueued_at, "enqueued_at")?,
        last_attempt_at: parse_optional_datetime(last_attempt_at, "last_attempt_at")?,
    })
}

impl Database {
    /// Upsert by item id. Re-enqueueing refreshes the payload but leaves the
    /// retry bookkeeping untouched.
    pub async fn upsert_sync_item(&self, item: &SyncItem) -> Result<()> {
        let record = item.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sync_queue (id, kind, payload, state, retry_count, enqueued_at, last_attempt_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                     kind = excluded.kind,
                     payload = excluded.payload,
                     enqueued_at = excluded.enqueued_at",
                params![
                    record.id,
                    record.kind.as_str(),
                    serde_json::to_string(&record.payload)?,
                    record.state.as_str(),
                    record.retry_count as i64,
                    record.enqueued_at.to_rfc3339(),
                    record.last_attempt_at.as_ref().map(|dt| dt.to_rfc3339()),
                ],
            )
            .context("failed to upsert sync item")?;
            Ok(())
        })
        .await
    }

    pub async fn get_sync_item(&self, item_id: &str) -> Result<Option<SyncItem>> {
        let item_id = item_id.to_string();
        self.execute(move |conn| {
            conn.query_row(
                "SELECT id, kind, payload, state, retry_count, enqueued_at, last_attempt_at
                 FROM sync_queue WHERE id = ?1",
                params![item_id],
                |row| Ok(row_to_item(row)),
            )
            .optional()
            .context("failed to load sync item")?
            .transpose()
        })
        .await
    }

    pub async fn list_sync_items(&self, state: SyncItemState) -> Result<Vec<SyncItem>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, payload, state, retry_count, enqueued_at, last_attempt_at
                 FROM sync_queue WHERE state = ?1 ORDER BY enqueued_at ASC",
            )?;

            let mut rows = stmt.query(params![state.as_str()])?;
            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                items.push(row_to_item(row)?);
            }
            Ok(items)
        })
        .await
    }

    pub async fn record_sync_attempt(
        &self,
        item_id: &str,
        retry_count: u32,
        state: SyncItemState,
        attempted_at: DateTime<Utc>,
    ) -> Result<()> {
        let item_id = item_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sync_queue
                 SET retry_count = ?1,
                     state = ?2,
                     last_attempt_at = ?3
                 WHERE id = ?4",
                params![
                    retry_count as i64,
                    state.as_str(),
                    attempted_at.to_rfc3339(),
                    item_id,
                ],
            )
            .context("failed to record sync attempt")?;
            Ok(())
        })
        .await
    }

    pub async fn delete_sync_item(&self, item_id: &str) -> Result<()> {
        let item_id = item_id.to_string();
        self.execute(move |conn| {
            conn.execute("DELETE FROM sync_queue WHERE id = ?1", params![item_id])
                .context("failed to delete sync item")?;
            Ok(())
        })
        .await
    }
}
