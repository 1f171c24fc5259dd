use serde::{Deserialize, Serialize};

/// How to reach the process that performs side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Sidecar executable. When unset every side effect fails as unavailable.
    #[serde(default)]
    pub sidecar_command: Option<String>,
    #[serde(default)]
    pub sidecar_args: Vec<String>,
    /// Per-call timeout for sidecar requests (default: 120)
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_call_timeout_secs() -> u64 {
    120
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            sidecar_command: None,
            sidecar_args: Vec::new(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}
