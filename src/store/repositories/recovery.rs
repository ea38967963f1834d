use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::store::connection::Database;

impl Database {
    /// Overwrite the single snapshot slot.
    pub async fn save_recovery_record(
        &self,
        payload: String,
        saved_at: DateTime<Utc>,
    ) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO recovery_record (slot, payload, saved_at)
                 VALUES (0, ?1, ?2)",
                params![payload, saved_at.to_rfc3339()],
            )
            .context("failed to save recovery record")?;
            Ok(())
        })
        .await
    }

    /// Read-and-delete in one trip to the worker thread, so the record can
    /// never be evaluated twice across restarts.
    pub async fn take_recovery_record(&self) -> Result<Option<String>> {
        self.execute(|conn| {
            let payload: Option<String> = conn
                .query_row(
                    "SELECT payload FROM recovery_record WHERE slot = 0",
                    [],
                    |row| row.get(0),
                )
                .optional()
                .context("failed to read recovery record")?;

            if payload.is_some() {
                conn.execute("DELETE FROM recovery_record WHERE slot = 0", [])
                    .context("failed to delete recovery record")?;
            }

            Ok(payload)
        })
        .await
    }

    pub async fn delete_recovery_record(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute("DELETE FROM recovery_record WHERE slot = 0", [])
                .context("failed to delete recovery record")?;
            Ok(())
        })
        .await
    }
}
