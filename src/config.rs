use std::path::PathBuf;

pub const DEFAULT_DB_NAME: &str = "flashdeck.db";
pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const DEFAULT_LOW_WATER_MARK: usize = 3;

pub const DB_PATH_ENV: &str = "FLASHDECK_DB";
pub const BATCH_SIZE_ENV: &str = "FLASHDECK_BATCH_SIZE";

/// Where the store lives and how a study session pages through due cards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    /// Cards fetched per due query
    pub batch_size: usize,
    /// Queue length at or below which a session fetches more cards
    pub low_water_mark: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            batch_size: DEFAULT_BATCH_SIZE,
            low_water_mark: DEFAULT_LOW_WATER_MARK,
        }
    }
}

impl Config {
    /// Defaults overridden by `FLASHDECK_DB` and `FLASHDECK_BATCH_SIZE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var(DB_PATH_ENV) {
            config.db_path = PathBuf::from(path);
        }

        if let Ok(raw) = std::env::var(BATCH_SIZE_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.batch_size = n,
                _ => tracing::warn!(value = %raw, "ignoring invalid {}", BATCH_SIZE_ENV),
            }
        }

        config
    }
}

// Falls back to the working directory when the platform has no data dir
fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flashdeck")
        .join(DEFAULT_DB_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    // Both cases touch the same process-wide variables, so they run as one test.
    #[test]
    fn env_overrides_and_defaults() {
        env::remove_var(DB_PATH_ENV);
        env::remove_var(BATCH_SIZE_ENV);

        let config = Config::from_env();
        assert!(config.db_path.ends_with("flashdeck/flashdeck.db"));
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.low_water_mark, 3);

        env::set_var(DB_PATH_ENV, "/tmp/test_flashdeck.db");
        env::set_var(BATCH_SIZE_ENV, "50");
        let config = Config::from_env();
        assert_eq!(config.db_path.to_str().unwrap(), "/tmp/test_flashdeck.db");
        assert_eq!(config.batch_size, 50);

        env::set_var(BATCH_SIZE_ENV, "zero");
        assert_eq!(Config::from_env().batch_size, DEFAULT_BATCH_SIZE);

        env::set_var(BATCH_SIZE_ENV, "0");
        assert_eq!(Config::from_env().batch_size, DEFAULT_BATCH_SIZE);

        env::remove_var(DB_PATH_ENV);
        env::remove_var(BATCH_SIZE_ENV);
    }
}
