//! Engine settings persisted as JSON.
//!
//! Missing fields fall back to defaults (`#[serde(default)]`), so settings
//! files from older versions keep loading.

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::frame_cache::CacheStrategy;
use crate::entities::EngineError;

/// Settings file name inside the config dir
pub const SETTINGS_FILE: &str = "nodeplay.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Desired interactive playback rate
    pub fps: f64,
    pub loop_enabled: bool,
    /// Row worker threads, 0 = auto
    pub workers: usize,
    /// Share of available memory the frame cache may use (0-100)
    pub cache_memory_percent: f64,
    /// Memory kept free for the rest of the system
    pub cache_reserve_gb: f64,
    pub cache_strategy: CacheStrategy,
    /// Capacity of the per-node row cache, in rows
    pub node_cache_rows: usize,
    /// Presented frames between FPS readouts
    pub fps_refresh_interval: u32,
    /// Decode the next source frame on a helper thread
    pub lookahead: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            fps: 24.0,
            loop_enabled: true,
            workers: 0,
            cache_memory_percent: 75.0,
            cache_reserve_gb: 2.0,
            cache_strategy: CacheStrategy::All,
            node_cache_rows: 4096,
            fps_refresh_interval: 24,
            lookahead: true,
        }
    }
}

impl EngineSettings {
    /// Effective worker count: explicit, or 3/4 of the cores (at least one).
    pub fn worker_threads(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            (num_cpus::get() * 3 / 4).max(1)
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(EngineError::InvalidSettings(format!("fps must be positive, got {}", self.fps)));
        }
        if self.fps_refresh_interval == 0 {
            return Err(EngineError::InvalidSettings("fps_refresh_interval must be at least 1".into()));
        }
        if self.node_cache_rows == 0 {
            return Err(EngineError::InvalidSettings("node_cache_rows must be at least 1".into()));
        }
        if !(0.0..=100.0).contains(&self.cache_memory_percent) {
            return Err(EngineError::InvalidSettings(format!(
                "cache_memory_percent out of range: {}",
                self.cache_memory_percent
            )));
        }
        Ok(())
    }

    /// Load from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        let settings: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse settings: {}", path.display()))?;
        settings.validate()?;
        info!("Settings loaded from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write settings: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let s = EngineSettings::default();
        assert!(s.validate().is_ok());
        assert!(s.worker_threads() >= 1);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let s: EngineSettings = serde_json::from_str(r#"{"fps": 30.0, "cache_strategy": "ClearOnAdvance"}"#).unwrap();
        assert_eq!(s.fps, 30.0);
        assert_eq!(s.cache_strategy, CacheStrategy::ClearOnAdvance);
        assert_eq!(s.node_cache_rows, 4096);
        assert!(s.loop_enabled);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let s = EngineSettings { fps: 0.0, ..Default::default() };
        assert!(matches!(s.validate(), Err(EngineError::InvalidSettings(_))));
        let s = EngineSettings { fps_refresh_interval: 0, ..Default::default() };
        assert!(s.validate().is_err());
        let s = EngineSettings { node_cache_rows: 0, ..Default::default() };
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        let s = EngineSettings { workers: 3, lookahead: false, ..Default::default() };
        s.save(&path).unwrap();
        assert_eq!(EngineSettings::load(&path).unwrap(), s);
        assert_eq!(
            EngineSettings::load(&dir.path().join("missing.json")).unwrap(),
            EngineSettings::default()
        );
    }
}
