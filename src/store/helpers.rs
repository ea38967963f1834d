use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::models::{SyncItemKind, SyncItemState};

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_json<T: DeserializeOwned>(value: &str, field: &str) -> Result<T> {
    serde_json::from_str(value).with_context(|| format!("failed to parse {field}"))
}

pub fn parse_sync_kind(value: &str) -> Result<SyncItemKind> {
    match value {
        "Mission" => Ok(SyncItemKind::Mission),
        "MeasurementBatch" => Ok(SyncItemKind::MeasurementBatch),
        other => Err(anyhow!("unknown sync item kind {other}")),
    }
}

pub fn parse_sync_state(value: &str) -> Result<SyncItemState> {
    match value {
        "Pending" => Ok(SyncItemState::Pending),
        "Failed" => Ok(SyncItemState::Failed),
        other => Err(anyhow!("unknown sync item state {other}")),
    }
}
