use crate::security::autonomy::{ActionClass, AutonomyTier, is_well_formed_action};
use crate::store::DEFAULT_AUTO_EXECUTE_THRESHOLD;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutonomyConfig {
    #[serde(default)]
    pub default_tier: AutonomyTier,
    /// Replaces `default_tier` for the named domain only.
    #[serde(default)]
    pub domain_overrides: BTreeMap<String, AutonomyTier>,
    /// Consecutive approvals after which a pair is treated as routine.
    #[serde(default = "default_auto_execute_threshold")]
    pub auto_execute_threshold: u32,
    /// Extra or replacement entries for the action classification table.
    #[serde(default)]
    pub classifications: BTreeMap<String, ActionClass>,
}

fn default_auto_execute_threshold() -> u32 {
    DEFAULT_AUTO_EXECUTE_THRESHOLD
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            default_tier: AutonomyTier::default(),
            domain_overrides: BTreeMap::new(),
            auto_execute_threshold: default_auto_execute_threshold(),
            classifications: BTreeMap::new(),
        }
    }
}

impl AutonomyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.auto_execute_threshold == 0 {
            anyhow::bail!("autonomy.auto_execute_threshold must be at least 1");
        }
        if let Some(domain) = self
            .domain_overrides
            .keys()
            .find(|domain| domain.is_empty() || domain.contains('.'))
        {
            anyhow::bail!("autonomy.domain_overrides has invalid domain {domain:?}");
        }
        if let Some(action) = self
            .classifications
            .keys()
            .find(|action| !is_well_formed_action(action))
        {
            anyhow::bail!("autonomy.classifications has malformed action type {action:?}");
        }
        Ok(())
    }
}
