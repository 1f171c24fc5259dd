use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file. Defaults to `semblance.db` next to the config file.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}
