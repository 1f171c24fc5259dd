use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Thresholds and term lists for the hard safety checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryConfig {
    /// Payload `amount` above this always needs a human (currency units).
    #[serde(default = "default_financial_threshold")]
    pub financial_threshold: f64,
    /// Model confidence below this always needs a human.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Case-insensitive terms matched against subject and body text.
    #[serde(default = "default_legal_terms")]
    pub legal_terms: Vec<String>,
    /// Action types that cannot be undone.
    #[serde(default = "default_irreversible_actions")]
    pub irreversible_actions: Vec<String>,
}

fn default_financial_threshold() -> f64 {
    500.0
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_legal_terms() -> Vec<String> {
    [
        "contract",
        "nda",
        "non-disclosure",
        "binding",
        "agreement",
        "legally",
        "liability",
        "indemnify",
        "terms and conditions",
        "settlement",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_irreversible_actions() -> Vec<String> {
    [
        "email.delete",
        "calendar.delete",
        "contacts.delete",
        "reminders.delete",
        "finance.pay",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            financial_threshold: default_financial_threshold(),
            confidence_threshold: default_confidence_threshold(),
            legal_terms: default_legal_terms(),
            irreversible_actions: default_irreversible_actions(),
        }
    }
}

impl BoundaryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.financial_threshold.is_nan() || self.financial_threshold <= 0.0 {
            anyhow::bail!("boundaries.financial_threshold must be a positive number");
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            anyhow::bail!("boundaries.confidence_threshold must be in [0.0, 1.0]");
        }
        if self.legal_terms.iter().any(|term| term.trim().is_empty()) {
            anyhow::bail!("boundaries.legal_terms must not contain empty terms");
        }
        Ok(())
    }
}
