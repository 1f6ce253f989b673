//! Service configuration.
//!
//! Loaded from a JSON file; every section and field has a default so a
//! partial file (or none at all) yields a working service.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::Principal;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Config JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Corridor matching radii.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Vehicle preemption corridor radius.
    pub threshold_meters: f64,
    /// Lockdown corridor radius.
    pub lockdown_threshold_meters: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold_meters: 30.0,
            lockdown_threshold_meters: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreemptionConfig {
    /// Added to a signal's ETA to get its claim expiry.
    pub grace_period_secs: u64,
    /// Priority used when a request does not name one.
    pub default_priority: u32,
}

impl Default for PreemptionConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 120,
            default_priority: 5,
        }
    }
}

/// Straight-line route used for navigation when the provider is down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub duration_secs: u64,
    pub distance_meters: f64,
    /// Assumed average speed over the fallback route.
    pub speed_mps: f64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            duration_secs: 600,
            distance_meters: 2000.0,
            speed_mps: 8.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Longest the expiry scheduler sleeps between checks.
    pub tick_millis: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_millis: 1000 }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub osrm_base_url: String,
    pub timeout_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            osrm_base_url: "https://router.project-osrm.org".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Bearer token to principal.
    pub tokens: BTreeMap<String, Principal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub detection: DetectionConfig,
    pub preemption: PreemptionConfig,
    pub fallback: FallbackConfig,
    pub scheduler: SchedulerConfig,
    pub routing: RoutingConfig,
    pub auth: AuthConfig,
    /// Signal catalog JSON.
    pub catalog_path: PathBuf,
    /// Where live claims, lockdowns and the audit log are persisted.
    pub state_path: Option<PathBuf>,
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            preemption: PreemptionConfig::default(),
            fallback: FallbackConfig::default(),
            scheduler: SchedulerConfig::default(),
            routing: RoutingConfig::default(),
            auth: AuthConfig::default(),
            catalog_path: PathBuf::from("signals.json"),
            state_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("detection.threshold_meters", self.detection.threshold_meters),
            (
                "detection.lockdown_threshold_meters",
                self.detection.lockdown_threshold_meters,
            ),
            ("fallback.distance_meters", self.fallback.distance_meters),
            ("fallback.speed_mps", self.fallback.speed_mps),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{name} must be positive, got {value}")));
            }
        }
        if self.scheduler.tick_millis == 0 {
            return Err(ConfigError::Invalid("scheduler.tick_millis must be positive".into()));
        }
        if self.routing.timeout_secs == 0 {
            return Err(ConfigError::Invalid("routing.timeout_secs must be positive".into()));
        }
        Ok(())
    }
}
