use super::Config;
use crate::security::autonomy::AutonomyTier;
use std::path::PathBuf;
use std::str::FromStr;

impl Config {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("SEMBLANCE_MODEL")
            && !model.is_empty()
        {
            self.provider.model = model;
        }

        if let Ok(url) = std::env::var("SEMBLANCE_OLLAMA_URL")
            && !url.is_empty()
        {
            self.provider.ollama_url = url;
        }

        if let Ok(db_path) = std::env::var("SEMBLANCE_DB_PATH")
            && !db_path.is_empty()
        {
            self.storage.db_path = Some(PathBuf::from(db_path));
        }

        if let Ok(tier_str) = std::env::var("SEMBLANCE_DEFAULT_TIER")
            && let Ok(tier) = AutonomyTier::from_str(tier_str.trim())
        {
            self.autonomy.default_tier = tier;
        }

        if let Ok(level) = std::env::var("SEMBLANCE_LOG_LEVEL")
            && !level.is_empty()
        {
            self.observability.log_level = level;
        }
    }
}
