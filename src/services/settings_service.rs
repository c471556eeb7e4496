use std::path::Path;
use std::sync::RwLock;

use tracing::{info, warn};

use crate::db::repositories::settings_repository::SettingsRepository;
use crate::db::DbPool;
use crate::error::AppResult;
use crate::models::settings::ScoringConfig;

const KEY_SCORING_CONFIG: &str = "scoring_config";

/// Persists the scoring configuration in `app_settings` and caches it.
pub struct SettingsService {
    db: DbPool,
    cache: RwLock<Option<ScoringConfig>>,
}

impl SettingsService {
    pub fn new(db: DbPool) -> Self {
        Self {
            db,
            cache: RwLock::new(None),
        }
    }

    /// The stored configuration, or the defaults when nothing was saved yet.
    pub fn get(&self) -> AppResult<ScoringConfig> {
        if let Ok(guard) = self.cache.read() {
            if let Some(config) = guard.as_ref() {
                return Ok(config.clone());
            }
        }

        let stored = self
            .db
            .with_connection(|conn| SettingsRepository::get_json::<ScoringConfig>(conn, KEY_SCORING_CONFIG))?;
        let config = match stored {
            Some(config) => {
                if let Err(err) = config.validate() {
                    warn!(target: "app::config", error = %err, "stored scoring config is invalid, using defaults");
                    ScoringConfig::default()
                } else {
                    config
                }
            }
            None => ScoringConfig::default(),
        };

        self.store_cache(config.clone());
        Ok(config)
    }

    pub fn update(&self, config: ScoringConfig) -> AppResult<ScoringConfig> {
        config.validate()?;
        self.db
            .with_connection(|conn| SettingsRepository::put_json(conn, KEY_SCORING_CONFIG, &config))?;
        info!(
            target: "app::config",
            weight_sum = %config.weights.sum(),
            policy = ?config.weight_sum_policy,
            "scoring config updated"
        );
        self.store_cache(config.clone());
        Ok(config)
    }

    /// Loads a YAML file, validates it and stores it as the active configuration.
    pub fn import_yaml(&self, path: impl AsRef<Path>) -> AppResult<ScoringConfig> {
        let config = ScoringConfig::from_yaml_file(path)?;
        self.update(config)
    }

    pub fn reset(&self) -> AppResult<ScoringConfig> {
        self.db
            .with_connection(|conn| SettingsRepository::delete(conn, KEY_SCORING_CONFIG))?;
        let config = ScoringConfig::default();
        self.store_cache(config.clone());
        Ok(config)
    }

    fn store_cache(&self, config: ScoringConfig) {
        if let Ok(mut guard) = self.cache.write() {
            *guard = Some(config);
        }
    }
}
