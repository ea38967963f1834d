use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};

use crate::error::RecorderError;

/// Parse a user-facing frequency label ("10s", "1m") into a period in ms.
pub fn parse_frequency(label: &str) -> Result<u64, RecorderError> {
    let trimmed = label.trim();
    let invalid = || RecorderError::InvalidFrequency(label.to_string());

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (digits, unit) = trimmed.split_at(split);
    let value: u64 = digits.parse().map_err(|_| invalid())?;
    if value == 0 {
        return Err(invalid());
    }

    match unit {
        "s" => Ok(value * 1_000),
        "m" => Ok(value * 60_000),
        "h" => Ok(value * 3_600_000),
        _ => Err(invalid()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderSettings {
    pub frequency: String,
    pub gps_enabled: bool,
    pub auto_sync: bool,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            frequency: "10s".into(),
            gps_enabled: true,
            auto_sync: true,
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<RecorderSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            RecorderSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn current(&self) -> RecorderSettings {
        self.data.read().unwrap().clone()
    }

    pub fn update(&self, settings: RecorderSettings) -> Result<(), RecorderError> {
        parse_frequency(&settings.frequency)?;
        let mut guard = self.data.write().unwrap();
        *guard = settings;
        self.persist(&guard).map_err(RecorderError::Storage)?;
        Ok(())
    }

    fn persist(&self, data: &RecorderSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_labels() {
        assert_eq!(parse_frequency("10s").unwrap(), 10_000);
        assert_eq!(parse_frequency("5s").unwrap(), 5_000);
        assert_eq!(parse_frequency("1m").unwrap(), 60_000);
        assert_eq!(parse_frequency("2h").unwrap(), 7_200_000);
    }

    #[test]
    fn rejects_malformed_labels() {
        for label in ["", "s", "10", "0s", "10x", "-5s", "10 s"] {
            assert!(
                parse_frequency(label).is_err(),
                "label '{label}' should be rejected"
            );
        }
    }
}
