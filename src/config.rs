use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SETUP_CONFIG_PATH: &str = "/etc/mats-middle/config.json";

/// Tuning knobs for one verification engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub epoch_batch_size: usize,
    pub station_batch_size: usize,
    pub lead_chunk_size: usize,
    pub dieoff_lead_step: i64,
    pub daily_cycle_max_lead: i64,
    pub query_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            epoch_batch_size: 100,
            station_batch_size: 100,
            lead_chunk_size: 3,
            dieoff_lead_step: 3,
            daily_cycle_max_lead: 24,
            query_timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub db_pool_size: u32,
    pub engine: EngineConfig,
}

pub(crate) fn setup_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("MATS_SETUP_CONFIG_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    PathBuf::from(DEFAULT_SETUP_CONFIG_PATH)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct SetupConfigOverrides {
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    db_pool_size: Option<u32>,
    #[serde(default)]
    epoch_batch_size: Option<usize>,
    #[serde(default)]
    station_batch_size: Option<usize>,
    #[serde(default)]
    lead_chunk_size: Option<usize>,
    #[serde(default)]
    dieoff_lead_step: Option<i64>,
    #[serde(default)]
    query_timeout_ms: Option<u64>,
}

pub(crate) fn load_setup_config_overrides(path: &Path) -> Option<SetupConfigOverrides> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let overrides = load_setup_config_overrides(&setup_config_path());
        Self::resolve(|key| std::env::var(key).ok(), overrides.as_ref())
    }

    /// Env values win; setup-file values fill in only where the env var is unset.
    pub(crate) fn resolve<F>(lookup: F, overrides: Option<&SetupConfigOverrides>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = EngineConfig::default();

        let database_url = env("MATS_DATABASE_URL")
            .or_else(|| env("DATABASE_URL"))
            .or_else(|| {
                overrides
                    .and_then(|ov| ov.database_url.as_deref())
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
            });

        let db_pool_size = parse_env(&env, "MATS_DB_POOL_SIZE")?
            .or_else(|| overrides.and_then(|ov| ov.db_pool_size))
            .unwrap_or(10)
            .clamp(1, 256);
        let epoch_batch_size = parse_env(&env, "MATS_EPOCH_BATCH_SIZE")?
            .or_else(|| overrides.and_then(|ov| ov.epoch_batch_size))
            .unwrap_or(defaults.epoch_batch_size)
            .max(1);
        let station_batch_size = parse_env(&env, "MATS_STATION_BATCH_SIZE")?
            .or_else(|| overrides.and_then(|ov| ov.station_batch_size))
            .unwrap_or(defaults.station_batch_size)
            .max(1);
        let lead_chunk_size = parse_env(&env, "MATS_LEAD_CHUNK_SIZE")?
            .or_else(|| overrides.and_then(|ov| ov.lead_chunk_size))
            .unwrap_or(defaults.lead_chunk_size)
            .max(1);
        let dieoff_lead_step = parse_env(&env, "MATS_DIEOFF_LEAD_STEP")?
            .or_else(|| overrides.and_then(|ov| ov.dieoff_lead_step))
            .unwrap_or(defaults.dieoff_lead_step);
        if dieoff_lead_step < 1 {
            anyhow::bail!("MATS_DIEOFF_LEAD_STEP must be at least 1");
        }
        let query_timeout = parse_env::<u64, _>(&env, "MATS_QUERY_TIMEOUT_MS")?
            .or_else(|| overrides.and_then(|ov| ov.query_timeout_ms))
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        Ok(Self {
            database_url,
            db_pool_size,
            engine: EngineConfig {
                epoch_batch_size,
                station_batch_size,
                lead_chunk_size,
                dieoff_lead_step,
                daily_cycle_max_lead: defaults.daily_cycle_max_lead,
                query_timeout,
            },
        })
    }
}

fn parse_env<T, F>(env: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("{key} has an invalid value: {value:?}"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_env() {
        let config = Config::resolve(lookup(&[]), None).expect("config");
        assert_eq!(config.engine, EngineConfig::default());
        assert!(config.database_url.is_none());
        assert_eq!(config.db_pool_size, 10);
    }

    #[test]
    fn env_values_override_setup_file() {
        let overrides = SetupConfigOverrides {
            database_url: Some("postgres://file/db".to_string()),
            epoch_batch_size: Some(50),
            lead_chunk_size: Some(4),
            ..Default::default()
        };
        let config = Config::resolve(
            lookup(&[
                ("MATS_EPOCH_BATCH_SIZE", "25"),
                ("MATS_QUERY_TIMEOUT_MS", "1500"),
            ]),
            Some(&overrides),
        )
        .expect("config");
        assert_eq!(config.database_url.as_deref(), Some("postgres://file/db"));
        assert_eq!(config.engine.epoch_batch_size, 25);
        assert_eq!(config.engine.lead_chunk_size, 4);
        assert_eq!(config.engine.query_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn mats_database_url_wins_over_generic_one() {
        let config = Config::resolve(
            lookup(&[
                ("DATABASE_URL", "postgres://generic/db"),
                ("MATS_DATABASE_URL", " postgres://mats/db "),
            ]),
            None,
        )
        .expect("config");
        assert_eq!(config.database_url.as_deref(), Some("postgres://mats/db"));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = Config::resolve(lookup(&[("MATS_STATION_BATCH_SIZE", "lots")]), None)
            .expect_err("invalid");
        assert!(err.to_string().contains("MATS_STATION_BATCH_SIZE"));
        assert!(Config::resolve(lookup(&[("MATS_DIEOFF_LEAD_STEP", "0")]), None).is_err());
    }

    #[test]
    fn setup_file_is_loaded_and_bad_json_ignored() {
        let mut good = tempfile::NamedTempFile::new().expect("tempfile");
        write!(good, r#"{{"station_batch_size": 40, "query_timeout_ms": 0}}"#).expect("write");
        let overrides = load_setup_config_overrides(good.path()).expect("parsed");
        let config = Config::resolve(lookup(&[]), Some(&overrides)).expect("config");
        assert_eq!(config.engine.station_batch_size, 40);
        assert!(config.engine.query_timeout.is_none());

        let mut bad = tempfile::NamedTempFile::new().expect("tempfile");
        write!(bad, "not json").expect("write");
        assert!(load_setup_config_overrides(bad.path()).is_none());
        assert!(load_setup_config_overrides(Path::new("/nonexistent/mats.json")).is_none());
    }
}
