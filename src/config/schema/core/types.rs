use super::super::{
    AutonomyConfig, BoundaryConfig, GatewayConfig, ObservabilityConfig, OrchestratorConfig,
    ProviderConfig, StorageConfig, orchestrator::MAX_TOOL_ITERATIONS_CAP,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub autonomy: AutonomyConfig,

    #[serde(default)]
    pub boundaries: BoundaryConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Resolved database location.
    pub fn db_path(&self) -> PathBuf {
        if let Some(path) = &self.storage.db_path {
            return path.clone();
        }
        self.config_path
            .parent()
            .map_or_else(|| PathBuf::from("semblance.db"), |dir| dir.join("semblance.db"))
    }

    pub fn validate(&self) -> Result<()> {
        self.autonomy.validate()?;
        self.boundaries.validate()?;
        if self.provider.model.trim().is_empty() {
            anyhow::bail!("provider.model must not be empty");
        }
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            anyhow::bail!("provider.temperature must be in [0.0, 2.0]");
        }
        if self.orchestrator.max_tool_iterations == 0
            || self.orchestrator.max_tool_iterations > MAX_TOOL_ITERATIONS_CAP
        {
            anyhow::bail!(
                "orchestrator.max_tool_iterations must be in [1, {MAX_TOOL_ITERATIONS_CAP}]"
            );
        }
        if self.gateway.call_timeout_secs == 0 {
            anyhow::bail!("gateway.call_timeout_secs must be at least 1");
        }
        if self.orchestrator.claim_lease_secs <= self.gateway.call_timeout_secs {
            anyhow::bail!(
                "orchestrator.claim_lease_secs must exceed gateway.call_timeout_secs ({})",
                self.gateway.call_timeout_secs
            );
        }
        if self.observability.tracing_level().is_none() {
            anyhow::bail!(
                "observability.log_level {:?} is not a known level",
                self.observability.log_level
            );
        }
        Ok(())
    }
}
