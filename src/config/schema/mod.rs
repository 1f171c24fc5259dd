mod autonomy;
mod boundaries;
mod core;
mod gateway;
mod observability;
mod orchestrator;
mod provider;
mod storage;

pub use autonomy::AutonomyConfig;
pub use boundaries::BoundaryConfig;
pub use core::Config;
pub use gateway::GatewayConfig;
pub use observability::ObservabilityConfig;
pub use orchestrator::{MAX_TOOL_ITERATIONS_CAP, OrchestratorConfig};
pub use provider::ProviderConfig;
pub use storage::StorageConfig;
