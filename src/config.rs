use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::paging::{PagingConfig, DEFAULT_ITEMS_PER_PAGE};

const DEFAULT_ENV_PREFIX: &str = "V2EX_PAGER";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub paging: PagingSettings,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_search_url")]
    pub search_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            search_url: default_search_url(),
            token: String::new(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    crate::v2ex::DEFAULT_BASE_URL.to_string()
}

fn default_search_url() -> String {
    crate::v2ex::DEFAULT_SEARCH_URL.to_string()
}

fn default_user_agent() -> String {
    format!("v2ex-pager/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    crate::v2ex::DEFAULT_TIMEOUT
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PagingSettings {
    #[serde(default = "default_items_per_page")]
    pub items_per_page: u32,
    /// Page sizes of listings that differ from `items_per_page`, by listing name.
    #[serde(default)]
    pub listings: HashMap<String, u32>,
}

impl Default for PagingSettings {
    fn default() -> Self {
        Self {
            items_per_page: default_items_per_page(),
            listings: HashMap::new(),
        }
    }
}

impl PagingSettings {
    pub fn for_listing(&self, name: &str) -> PagingConfig {
        let size = self
            .listings
            .get(name)
            .copied()
            .filter(|size| *size > 0)
            .unwrap_or(self.items_per_page);
        PagingConfig::new(size)
    }
}

fn default_items_per_page() -> u32 {
    DEFAULT_ITEMS_PER_PAGE
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "warn".into()
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = merge_config(cfg, load_env(prefix));

    anyhow::ensure!(
        cfg.paging.items_per_page > 0,
        "config: paging.items_per_page must be positive"
    );
    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    let defaults = Config::default();

    if other.api.base_url != defaults.api.base_url {
        base.api.base_url = other.api.base_url;
    }
    if other.api.search_url != defaults.api.search_url {
        base.api.search_url = other.api.search_url;
    }
    if !other.api.token.is_empty() {
        base.api.token = other.api.token;
    }
    if other.api.user_agent != defaults.api.user_agent && !other.api.user_agent.is_empty() {
        base.api.user_agent = other.api.user_agent;
    }
    if other.api.timeout != defaults.api.timeout {
        base.api.timeout = other.api.timeout;
    }

    if other.paging.items_per_page != defaults.paging.items_per_page {
        base.paging.items_per_page = other.paging.items_per_page;
    }
    base.paging.listings.extend(other.paging.listings);

    if other.log.filter != defaults.log.filter && !other.log.filter.is_empty() {
        base.log.filter = other.log.filter;
    }

    base
}

fn load_env(prefix: &str) -> Config {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    let mut cfg = Config::default();
    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }
    cfg
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.search_url" => cfg.api.search_url = value,
        "api.token" => cfg.api.token = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "api.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.api.timeout = duration;
            }
        }
        "paging.items_per_page" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.paging.items_per_page = parsed;
            }
        }
        "log.filter" => cfg.log.filter = value,
        _ => {
            if let Some(listing) = key.strip_prefix("paging.listings.") {
                if let Ok(parsed) = value.parse::<u32>() {
                    cfg.paging.listings.insert(listing.to_string(), parsed);
                }
            }
        }
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("v2ex-pager").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn isolated(path: PathBuf, prefix: &str) -> LoadOptions {
        LoadOptions {
            config_file: Some(path),
            env_prefix: Some(prefix.into()),
        }
    }

    #[test]
    fn load_defaults_without_files() {
        let dir = tempdir().unwrap();
        let cfg = load(isolated(dir.path().join("missing.yaml"), "V2EX_PAGER_T1")).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.paging.items_per_page, 50);
        assert_eq!(cfg.api.base_url, crate::v2ex::DEFAULT_BASE_URL);
        assert_eq!(cfg.log.filter, "warn");
    }

    #[test]
    fn reads_yaml_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "api:\n  token: secret\n  timeout: 5s\npaging:\n  items_per_page: 20\n  listings:\n    replies: 100\n",
        )
        .unwrap();

        let cfg = load(isolated(path, "V2EX_PAGER_T2")).unwrap();
        assert_eq!(cfg.api.token, "secret");
        assert_eq!(cfg.api.timeout, Duration::from_secs(5));
        assert_eq!(cfg.paging.for_listing("replies").items_per_page, 100);
        assert_eq!(cfg.paging.for_listing("topics").items_per_page, 20);
    }

    #[test]
    fn rejects_zero_page_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "paging:\n  items_per_page: 0\n").unwrap();
        assert!(load(isolated(path, "V2EX_PAGER_T3")).is_err());
    }

    #[test]
    fn env_overrides() {
        let dir = tempdir().unwrap();
        env::set_var("V2EX_PAGER_T4_LOG__FILTER", "debug");
        env::set_var("V2EX_PAGER_T4_PAGING__LISTINGS__NOTIFICATIONS", "10");
        env::set_var("V2EX_PAGER_T4_API__SEARCH_URL", "http://localhost:9200/search");
        let cfg = load(isolated(dir.path().join("none.yaml"), "V2EX_PAGER_T4")).unwrap();
        assert_eq!(cfg.log.filter, "debug");
        assert_eq!(cfg.api.search_url, "http://localhost:9200/search");
        assert_eq!(cfg.paging.for_listing("notifications").items_per_page, 10);
        env::remove_var("V2EX_PAGER_T4_LOG__FILTER");
        env::remove_var("V2EX_PAGER_T4_PAGING__LISTINGS__NOTIFICATIONS");
        env::remove_var("V2EX_PAGER_T4_API__SEARCH_URL");
    }
}
