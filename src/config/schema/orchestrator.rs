use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on model round-trips per message, whatever the config says.
pub const MAX_TOOL_ITERATIONS_CAP: u32 = 25;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
    /// Knowledge chunks retrieved as context before the first model call.
    #[serde(default = "default_context_limit")]
    pub context_limit: u32,
    /// Prior turns of the conversation replayed to the model.
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Age after which an execution claim is presumed abandoned by a crashed
    /// process. Must outlast the gateway call timeout.
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,
}

fn default_max_tool_iterations() -> u32 {
    8
}

fn default_context_limit() -> u32 {
    5
}

fn default_history_limit() -> u32 {
    20
}

fn default_claim_lease_secs() -> u64 {
    300
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            context_limit: default_context_limit(),
            history_limit: default_history_limit(),
            system_prompt: None,
            claim_lease_secs: default_claim_lease_secs(),
        }
    }
}

impl OrchestratorConfig {
    pub fn effective_max_tool_iterations(&self) -> u32 {
        self.max_tool_iterations.clamp(1, MAX_TOOL_ITERATIONS_CAP)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_secs)
    }
}
