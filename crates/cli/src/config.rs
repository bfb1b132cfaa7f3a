use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use writers_backup_core::BackupSettings;

pub const ENV_ROOT: &str = "WRITERS_BACKUP_ROOT";
pub const ENV_MAX_PER_FILE: &str = "WRITERS_BACKUP_MAX_PER_FILE";
pub const ENV_INTERVAL_MS: &str = "WRITERS_BACKUP_INTERVAL_MS";
pub const ENV_RETENTION_DAYS: &str = "WRITERS_BACKUP_RETENTION_DAYS";
pub const ENV_EXTENSION: &str = "WRITERS_BACKUP_EXTENSION";

const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub backup: BackupConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct BackupConfig {
    pub max_backups_per_file: Option<usize>,
    pub backup_interval_ms: Option<u64>,
    pub retention_days: Option<RetentionDays>,
    pub backup_extension: Option<String>,
    pub exclude_patterns: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub root: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: Option<String>,
}

impl LoggingConfig {
    pub fn filter(&self) -> &str {
        self.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }
}

/// `retention_days = 30` or `retention_days = "off"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RetentionDays {
    Days(u32),
    Keyword(String),
}

impl RetentionDays {
    fn resolve(&self) -> Result<Option<u32>> {
        match self {
            RetentionDays::Days(days) => Ok(Some(*days)),
            RetentionDays::Keyword(word) => parse_retention(word),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading config file {path:?}"))?;
    toml::from_str(&contents).with_context(|| format!("parsing config file {path:?}"))
}

/// Settings from the config file, overridden by the process environment.
pub fn resolve_settings(cfg: &Config) -> Result<BackupSettings> {
    resolve_settings_with(cfg, |key| env::var(key).ok())
}

pub fn resolve_settings_with<F>(cfg: &Config, lookup: F) -> Result<BackupSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = BackupSettings::default();

    let max_backups_per_file = env_parsed(&lookup, ENV_MAX_PER_FILE)?
        .or(cfg.backup.max_backups_per_file)
        .unwrap_or(defaults.max_backups_per_file);

    let backup_interval_ms = env_parsed(&lookup, ENV_INTERVAL_MS)?
        .or(cfg.backup.backup_interval_ms)
        .unwrap_or(defaults.backup_interval_ms);

    let retention_days = match lookup(ENV_RETENTION_DAYS) {
        Some(raw) => parse_retention(&raw).with_context(|| format!("{ENV_RETENTION_DAYS}={raw}"))?,
        None => match &cfg.backup.retention_days {
            Some(value) => value.resolve().context("[backup] retention_days")?,
            None => defaults.retention_days,
        },
    };

    let backup_extension = lookup(ENV_EXTENSION)
        .or_else(|| cfg.backup.backup_extension.clone())
        .unwrap_or(defaults.backup_extension);

    let data_root = lookup(ENV_ROOT)
        .or_else(|| cfg.storage.root.clone())
        .map(PathBuf::from)
        .unwrap_or(defaults.data_root);

    let exclude_patterns = cfg
        .backup
        .exclude_patterns
        .clone()
        .unwrap_or(defaults.exclude_patterns);

    let settings = BackupSettings {
        max_backups_per_file,
        backup_interval_ms,
        retention_days,
        backup_extension,
        data_root,
        exclude_patterns,
    };
    settings.validate()?;
    Ok(settings)
}

fn env_parsed<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {key}: {raw:?}"))
        })
        .transpose()
}

/// A day count, or `off` to disable age-based cleanup.
fn parse_retention(raw: &str) -> Result<Option<u32>> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    match raw.parse::<u32>() {
        Ok(days) => Ok(Some(days)),
        Err(_) => bail!("retention days must be a number or \"off\", got {raw:?}"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_config_gives_defaults() {
        let settings = resolve_settings_with(&Config::default(), env_of(&[])).unwrap();
        assert_eq!(settings, BackupSettings::default());
    }

    #[test]
    fn file_values_are_used() {
        let cfg: Config = toml::from_str(
            r#"
            [backup]
            max_backups_per_file = 3
            backup_interval_ms = 120000
            retention_days = "off"
            backup_extension = ".bak"
            exclude_patterns = ["*.swp"]

            [storage]
            root = "/var/lib/writers"

            [logging]
            filter = "debug"
            "#,
        )
        .unwrap();
        let settings = resolve_settings_with(&cfg, env_of(&[])).unwrap();
        assert_eq!(settings.max_backups_per_file, 3);
        assert_eq!(settings.backup_interval_ms, 120_000);
        assert_eq!(settings.retention_days, None);
        assert_eq!(settings.extension(), "bak");
        assert_eq!(settings.data_root, PathBuf::from("/var/lib/writers"));
        assert_eq!(settings.exclude_patterns, vec!["*.swp".to_owned()]);
        assert_eq!(cfg.logging.filter(), "debug");
    }

    #[test]
    fn env_overrides_file() {
        let cfg: Config = toml::from_str(
            r#"
            [backup]
            max_backups_per_file = 3
            retention_days = 7
            "#,
        )
        .unwrap();
        let settings = resolve_settings_with(
            &cfg,
            env_of(&[
                (ENV_MAX_PER_FILE, "5"),
                (ENV_RETENTION_DAYS, "off"),
                (ENV_ROOT, "/tmp/wb"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.max_backups_per_file, 5);
        assert_eq!(settings.retention_days, None);
        assert_eq!(settings.data_root, PathBuf::from("/tmp/wb"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cfg = Config::default();
        let err = resolve_settings_with(&cfg, env_of(&[(ENV_INTERVAL_MS, "1000")])).unwrap_err();
        assert!(err.to_string().contains("invalid configuration"), "{err:#}");

        let err = resolve_settings_with(&cfg, env_of(&[(ENV_MAX_PER_FILE, "many")])).unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_PER_FILE), "{err:#}");

        let err = resolve_settings_with(&cfg, env_of(&[(ENV_RETENTION_DAYS, "forever")])).unwrap_err();
        assert!(format!("{err:#}").contains("off"), "{err:#}");
    }

    #[test]
    fn load_config_reports_the_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("writers-backup.toml");
        std::fs::write(&path, "[backup\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("parsing config file"));
        assert!(load_config(&tmp.path().join("missing.toml")).is_err());
    }
}
