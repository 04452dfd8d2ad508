use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::workflows::Workflow;

/// Main configuration structure for fieldflow
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FieldflowConfig {
    /// Session store backend
    pub store: StoreConfig,
    /// Inactivity windows
    pub timeouts: TimeoutConfig,
    /// Side-effect dispatch retry and throttling
    pub dispatch: DispatchConfig,
    /// Identity lookup cache
    pub identity: IdentityConfig,
    /// Approval broadcast settings
    pub approvals: ApprovalConfig,
    /// Input handling
    pub input: InputConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendKind {
    Memory,
    File,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackendKind,
    /// Directory for the file backend
    pub path: String,
    /// Database URL for the sqlite backend
    pub url: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::File,
            path: ".fieldflow/sessions".to_string(),
            url: "sqlite://.fieldflow/sessions.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub default_window_secs: u64,
    /// Window for sessions parked at AwaitingApproval
    pub approval_window_secs: u64,
    /// Per-workflow overrides keyed by workflow name
    pub overrides: HashMap<String, u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_window_secs: 600,
            approval_window_secs: 86_400,
            overrides: HashMap::new(),
        }
    }
}

impl TimeoutConfig {
    pub fn window_for(&self, workflow: Workflow) -> Duration {
        let secs = self
            .overrides
            .get(workflow.as_str())
            .copied()
            .unwrap_or(self.default_window_secs);
        Duration::from_secs(secs)
    }

    pub fn approval_window(&self) -> Duration {
        Duration::from_secs(self.approval_window_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    pub requests_per_second: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            jitter: true,
            requests_per_second: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub cache_ttl_secs: u64,
    pub cache_capacity: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 60,
            cache_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// How long resolved approvals are remembered for "already resolved" answers
    pub history_retention_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            history_retention_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InputConfig {
    /// Consecutive rejections before the retry prompt suggests cancelling. 0 disables.
    pub nudge_after_rejections: u32,
    /// A per-actor mailbox with nothing queued for this long is closed.
    pub mailbox_idle_secs: u64,
    /// Sequence watermarks of actors without a session are forgotten after this.
    pub sequence_retention_secs: u64,
    pub housekeeping_interval_secs: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            nudge_after_rejections: 3,
            mailbox_idle_secs: 300,
            sequence_retention_secs: 3600,
            housekeeping_interval_secs: 60,
        }
    }
}

impl InputConfig {
    pub fn mailbox_idle(&self) -> Duration {
        Duration::from_secs(self.mailbox_idle_secs.max(1))
    }

    pub fn sequence_retention(&self) -> Duration {
        Duration::from_secs(self.sequence_retention_secs)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.housekeeping_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
        }
    }
}

impl FieldflowConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. fieldflow.toml in the working directory
    /// 3. Environment variables (prefixed with FIELDFLOW_, nested with __)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("fieldflow.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if path.exists() {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("FIELDFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<FieldflowConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = FieldflowConfig::load_env_file();
        FieldflowConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static FieldflowConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FieldflowConfig::default();
        assert_eq!(config.timeouts.default_window_secs, 600);
        assert_eq!(config.dispatch.max_attempts, 3);
        assert_eq!(config.input.nudge_after_rejections, 3);
        assert_eq!(config.store.backend, StoreBackendKind::File);
    }

    #[test]
    fn test_per_workflow_timeout_override() {
        let mut timeouts = TimeoutConfig::default();
        timeouts.overrides.insert("driver_route".to_string(), 7_200);

        assert_eq!(
            timeouts.window_for(Workflow::DriverRoute),
            Duration::from_secs(7_200)
        );
        assert_eq!(
            timeouts.window_for(Workflow::WarehouseReceive),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn test_load_from_toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fieldflow.toml");
        std::fs::write(
            &path,
            "[store]\nbackend = \"memory\"\n\n[dispatch]\nmax_attempts = 5\n",
        )
        .unwrap();

        let config = FieldflowConfig::load_from(&path).unwrap();
        assert_eq!(config.store.backend, StoreBackendKind::Memory);
        assert_eq!(config.dispatch.max_attempts, 5);
        assert_eq!(config.dispatch.base_delay_ms, 200);
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.toml");
        let mut config = FieldflowConfig::default();
        config.approvals.history_retention_secs = 42;
        config.save_to_file(&path).unwrap();

        let reloaded = FieldflowConfig::load_from(&path).unwrap();
        assert_eq!(reloaded.approvals.history_retention_secs, 42);
    }
}
