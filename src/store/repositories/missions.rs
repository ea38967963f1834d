use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::models::{Mission, MissionInfo, MissionStats, Sample};
use crate::store::{
    connection::Database,
    helpers::{parse_datetime, parse_json},
};

fn row_to_mission(row: &Row) -> Result<Mission> {
    let started_at: String = row.get("started_at")?;
    let ended_at: String = row.get("ended_at")?;
    let stats: String = row.get("stats")?;
    let samples: String = row.get("samples")?;
    let synced: i64 = row.get("synced")?;

    Ok(Mission {
        id: row.get("id")?,
        name: row.get("name")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_datetime(&ended_at, "ended_at")?,
        frequency: row.get("frequency")?,
        stats: parse_json::<MissionStats>(&stats, "stats")?,
        samples: parse_json::<Vec<Sample>>(&samples, "samples")?,
        manual_context: row.get("manual_context")?,
        automatic_context: row.get("automatic_context")?,
        synced: synced != 0,
    })
}

impl Database {
    /// Upsert keyed on the mission id: completing a recovered session updates
    /// the row a prior completion may have written instead of adding another.
    pub async fn upsert_mission(&self, mission: &Mission) -> Result<()> {
        let record = mission.clone();
        self.execute(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO missions (id, name, started_at, ended_at, frequency, stats, samples,
                                       manual_context, automatic_context, synced, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     ended_at = excluded.ended_at,
                     stats = excluded.stats,
                     samples = excluded.samples,
                     manual_context = excluded.manual_context,
                     automatic_context = excluded.automatic_context,
                     synced = excluded.synced,
                     updated_at = excluded.updated_at",
                params![
                    record.id,
                    record.name,
                    record.started_at.to_rfc3339(),
                    record.ended_at.to_rfc3339(),
                    record.frequency,
                    serde_json::to_string(&record.stats)?,
                    serde_json::to_string(&record.samples)?,
                    record.manual_context,
                    record.automatic_context,
                    record.synced as i64,
                    now,
                ],
            )
            .context("failed to upsert mission")?;
            Ok(())
        })
        .await
    }

    pub async fn get_mission(&self, mission_id: &str) -> Result<Option<Mission>> {
        let mission_id = mission_id.to_string();
        self.execute(move |conn| {
            conn.query_row(
                "SELECT id, name, started_at, ended_at, frequency, stats, samples,
                        manual_context, automatic_context, synced
                 FROM missions WHERE id = ?1",
                params![mission_id],
                |row| Ok(row_to_mission(row)),
            )
            .optional()
            .context("failed to load mission")?
            .transpose()
        })
        .await
    }

    pub async fn list_missions(&self) -> Result<Vec<MissionInfo>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, started_at, ended_at, stats, synced
                 FROM missions ORDER BY started_at DESC",
            )?;

            let mut rows = stmt.query([])?;
            let mut missions = Vec::new();
            while let Some(row) = rows.next()? {
                let started_at: String = row.get("started_at")?;
                let ended_at: String = row.get("ended_at")?;
                let stats: String = row.get("stats")?;
                let synced: i64 = row.get("synced")?;
                let stats = parse_json::<MissionStats>(&stats, "stats")?;
                missions.push(MissionInfo {
                    id: row.get("id")?,
                    name: row.get("name")?,
                    started_at: parse_datetime(&started_at, "started_at")?,
                    ended_at: parse_datetime(&ended_at, "ended_at")?,
                    measurements_count: stats.measurements_count,
                    synced: synced != 0,
                });
            }
            Ok(missions)
        })
        .await
    }

    pub async fn delete_mission(&self, mission_id: &str) -> Result<bool> {
        let mission_id = mission_id.to_string();
        self.execute(move |conn| {
            let deleted = conn
                .execute("DELETE FROM missions WHERE id = ?1", params![mission_id])
                .context("failed to delete mission")?;
            Ok(deleted > 0)
        })
        .await
    }

    pub async fn mark_mission_synced(
        &self,
        mission_id: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let mission_id = mission_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE missions SET synced = 1, updated_at = ?1 WHERE id = ?2",
                params![updated_at.to_rfc3339(), mission_id],
            )
            .context("failed to mark mission synced")?;
            Ok(())
        })
        .await
    }

    pub async fn count_missions(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM missions", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }
}
