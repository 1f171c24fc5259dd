pub mod schema;

pub use schema::{
    AutonomyConfig, BoundaryConfig, Config, GatewayConfig, ObservabilityConfig,
    OrchestratorConfig, ProviderConfig, StorageConfig,
};
