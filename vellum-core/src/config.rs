use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

/// Source that produced the sync configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Top-level engine settings. Use these to tune how aggressively bursts of
/// filesystem notifications are coalesced, how long a delete waits for a
/// matching create before it is treated as genuine, and how often the full
/// tree is rescanned.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period (ms) a path must stay silent before its pending
    /// create/write burst collapses into one effective event. Lower values
    /// process changes sooner but risk reading half-written files.
    pub debounce_window_ms: u64,
    /// Correlation window (ms) within which a delete followed by a create of
    /// the same basename is inferred to be one move. Must comfortably exceed
    /// the debounce window, since creates are debounced before correlation.
    pub move_window_ms: u64,
    /// Interval (seconds) between full scan passes once the engine is
    /// running. Each pass also reconciles catalog rows against disk.
    pub scan_interval_secs: u64,
    /// Delay (seconds) before the first scan pass after startup, giving
    /// other subsystems time to initialize.
    pub startup_scan_delay_secs: u64,
    /// Upper bound (bytes) on the UTF-8 text preview stored per file.
    pub preview_max_bytes: usize,
    /// Capacity of the channel buffering raw watcher notifications.
    pub event_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_window_ms: 200,
            move_window_ms: 600,
            scan_interval_secs: 3_600,
            startup_scan_delay_secs: 5,
            preview_max_bytes: 512,
            event_channel_capacity: 4_096,
        }
    }
}

impl SyncConfig {
    /// Load configuration overrides using environment variables.
    /// Evaluation order:
    /// 1) `$VELLUM_SYNC_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$VELLUM_SYNC_CONFIG_JSON` (inline JSON),
    /// 3) defaults if neither is set.
    pub fn load_from_env() -> anyhow::Result<(Self, SyncConfigSource)> {
        if let Ok(path_str) = env::var("VELLUM_SYNC_CONFIG_PATH")
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            let config = Self::load_from_file(&path)?;
            return Ok((config, SyncConfigSource::EnvPath(path)));
        }

        if let Ok(raw) = env::var("VELLUM_SYNC_CONFIG_JSON")
            && !raw.trim().is_empty()
        {
            let parsed: Self = serde_json::from_str(&raw)
                .context("failed to parse VELLUM_SYNC_CONFIG_JSON")?;
            return Ok((parsed, SyncConfigSource::EnvInline));
        }

        Ok((Self::default(), SyncConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read sync config from {}", path.display())
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => {
                serde_json::from_str(&contents).with_context(|| {
                    format!("invalid sync config {}", path.display())
                })
            }
            Some("toml") | Some("tml") => {
                toml::from_str(&contents).map_err(|err| {
                    anyhow!("invalid sync config {}: {}", path.display(), err)
                })
            }
            _ => Err(anyhow!(
                "unsupported sync config extension for {}",
                path.display()
            )),
        }
    }

    /// Debounce quiet period. Clamped to at least one millisecond.
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms.max(1))
    }

    /// Delete/create correlation window. Clamped to at least one millisecond.
    pub fn move_window(&self) -> Duration {
        Duration::from_millis(self.move_window_ms.max(1))
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn startup_scan_delay(&self) -> Duration {
        Duration::from_secs(self.startup_scan_delay_secs)
    }
}
