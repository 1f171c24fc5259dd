mod catalog;
mod types;

pub use catalog::{ActionCatalog, domain_of, is_well_formed_action};
pub use types::{ActionClass, AutonomyDecision, AutonomyTier, AutonomyVerdict};

use crate::config::AutonomyConfig;
use std::sync::{PoisonError, RwLock};

/// Tier policy consulted for every side-effecting action.
///
/// A pure function of configuration and action metadata: no history, no
/// payload inspection, no I/O. The configuration is owned here and mutated
/// only through the explicit setters below.
#[derive(Debug)]
pub struct AutonomyManager {
    config: RwLock<AutonomyConfig>,
    catalog: ActionCatalog,
}

impl AutonomyManager {
    pub fn new(config: AutonomyConfig) -> Self {
        let catalog = ActionCatalog::with_overrides(&config.classifications);
        Self {
            config: RwLock::new(config),
            catalog,
        }
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> AutonomyConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Tier in effect for `domain`: its override, else the default tier.
    pub fn tier_for(&self, domain: &str) -> AutonomyTier {
        let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
        config
            .domain_overrides
            .get(domain)
            .copied()
            .unwrap_or(config.default_tier)
    }

    pub fn classify(&self, action: &str) -> ActionClass {
        self.catalog.classify(action)
    }

    /// Whether `action` has a built-in or configured classification.
    pub fn is_classified(&self, action: &str) -> bool {
        self.catalog.is_known(action)
    }

    /// Base decision for an action of `class` in `domain`.
    pub fn decide(&self, domain: &str, class: ActionClass) -> AutonomyDecision {
        self.tier_for(domain).decision_for(class)
    }

    /// Classify `action`, resolve its domain and tier, and decide in one pass.
    ///
    /// The tier is read once so the recorded tier always matches the decision.
    pub fn evaluate(&self, action: &str) -> AutonomyVerdict {
        let domain = domain_of(action);
        let class = self.classify(action);
        let tier = self.tier_for(domain);
        AutonomyVerdict {
            domain: domain.to_string(),
            class,
            tier,
            decision: tier.decision_for(class),
        }
    }

    pub fn auto_execute_threshold(&self) -> u32 {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .auto_execute_threshold
    }

    pub fn set_default_tier(&self, tier: AutonomyTier) {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        tracing::info!(from = %config.default_tier, to = %tier, "default autonomy tier changed");
        config.default_tier = tier;
    }

    pub fn set_domain_tier(&self, domain: &str, tier: AutonomyTier) {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        tracing::info!(domain, to = %tier, "domain autonomy tier changed");
        config.domain_overrides.insert(domain.to_string(), tier);
    }

    /// Drop a domain override. Returns whether one existed.
    pub fn clear_domain_tier(&self, domain: &str) -> bool {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        let removed = config.domain_overrides.remove(domain);
        if let Some(tier) = removed {
            tracing::info!(domain, from = %tier, "domain autonomy override cleared");
        }
        removed.is_some()
    }
}

#[cfg(test)]
mod tests;
