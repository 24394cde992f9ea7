use crate::utils::bytes::gib_to_bytes;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub client: ClientConfig,
    pub budget: BudgetConfig,
    pub policy: PolicyConfig,
    #[serde(default)]
    pub categories: HashMap<String, CategoryConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Downloader instance connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Instance name, also the prefix of its environment variables
    pub name: String,
    pub url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_login_attempts")]
    pub login_attempts: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Disk and slot budget of the downloader instance
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetConfig {
    pub disk_space_gb: f64,
    /// Free space that must remain after an admission
    #[serde(default)]
    pub reserve_space_gb: f64,
    pub limit_active_torrents: usize,
    /// Largest download a torrent may claim without being split
    pub limit_download_size_gb: f64,
}

/// Global policy lists and split filters
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub split_filter_min_gb: f64,
    pub split_filter_max_gb: f64,
    pub black_domains: Vec<String>,
    pub hr_domains: Vec<String>,
    pub trusted_groups: Vec<String>,
}

/// Per-category policy. Every field is optional: an absent setting disables
/// the check that depends on it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryConfig {
    pub domain: Option<String>,
    #[serde(default)]
    pub trusted_groups: Vec<String>,
    #[serde(default)]
    pub hr_groups: Vec<String>,
    /// Seeding progress percentage the HR site demands (informational)
    pub hr_progress: Option<f64>,
    pub split: Option<SplitRule>,
    pub min_incomplete: Option<u64>,
    pub min_leechs: Option<u64>,
}

/// How the split ceiling of a category is computed
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SplitRule {
    /// Fixed amount of GiB
    Absolute { gb: f64 },
    /// Percentage of the torrent's total size
    Relative { percent: f64 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifierConfig {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusConfig {
    pub port: Option<u16>,
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_console")]
    pub console: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
            max_samples: default_max_samples(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            console: default_console(),
        }
    }
}

// Default value functions
fn default_login_attempts() -> u32 {
    5
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("torrents")
}

fn default_max_samples() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_console() -> bool {
    false
}

/// Globals whose names collide with the per-category suffixes
const GLOBAL_PREFIXES: [&str; 3] = ["HR", "ALL", "BLACK_TORRENT"];

/// Longest suffix first so `<CAT>_HR_GROUP` is not read as category `<CAT>_HR`
const CATEGORY_SUFFIXES: [&str; 9] = [
    "HR_PROGRESS",
    "SPLIT_NUMBER",
    "SPLIT_TYTPE",
    "SPLIT_TYPE",
    "INCOMPLETE",
    "HR_GROUP",
    "DOMAIN",
    "LEECHS",
    "GROUP",
];

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).context("Failed to parse config file")?;

        config.categories = config
            .categories
            .into_iter()
            .map(|(name, mut category)| {
                category.min_leechs = category.min_leechs.or(category.min_incomplete);
                (name.to_uppercase(), category)
            })
            .collect();

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from the process environment for downloader `qb_name`.
    pub fn from_env(qb_name: &str) -> Result<Self> {
        Self::from_vars(qb_name, std::env::vars())
    }

    /// Build the configuration from `KEY=value` pairs using the environment naming scheme.
    pub fn from_vars<I>(qb_name: &str, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let qb = qb_name.to_uppercase();
        let key = |suffix: &str| format!("{}_{}", qb, suffix);

        let client = ClientConfig {
            name: qb_name.to_string(),
            url: required(&vars, &key("URL"))?,
            username: required(&vars, &key("USERNAME"))?,
            password: required(&vars, &key("PASSWORD"))?,
            login_attempts: optional(&vars, &key("LOGIN_ATTEMPTS"))?
                .unwrap_or_else(default_login_attempts),
            timeout_secs: optional(&vars, &key("TIMEOUT"))?.unwrap_or_else(default_timeout_secs),
        };

        let reserve_key = if vars.contains_key(&key("LESS_DISK_SPACE")) {
            key("LESS_DISK_SPACE")
        } else {
            key("LESS_DOSK_SPACE")
        };

        let budget = BudgetConfig {
            disk_space_gb: parse_required(&vars, &key("DISK_SPACE"))?,
            reserve_space_gb: parse_required(&vars, &reserve_key)?,
            limit_active_torrents: parse_required(&vars, &key("LIMIT_ACTIVE_TORRENT_NUM"))?,
            limit_download_size_gb: parse_required(&vars, &key("LIMIT_TORRENT_DOWNLOAD_SIZE"))?,
        };

        let policy = PolicyConfig {
            split_filter_min_gb: parse_required(&vars, "TORRENT_SPLIT_FILTER_MIN_SIZE")?,
            split_filter_max_gb: parse_required(&vars, "TORRENT_SPLIT_FILTER_MAX_SIZE")?,
            black_domains: split_list(&required(&vars, "BLACK_TORRENT_DOMAIN")?),
            hr_domains: split_list(&required(&vars, "HR_DOMAIN")?),
            trusted_groups: split_list(&required(&vars, "ALL_GROUP")?),
        };

        let mut categories = HashMap::new();
        for name in category_names(&vars, &qb) {
            let category = category_from_vars(&vars, &name)
                .context(format!("Invalid settings for category {}", name))?;
            categories.insert(name, category);
        }

        let store = StoreConfig {
            dir: vars
                .get("SEEDWARDEN_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_store_dir),
            max_samples: optional(&vars, "SEEDWARDEN_MAX_SAMPLES")?
                .unwrap_or_else(default_max_samples),
        };

        let notifier = NotifierConfig {
            webhook_url: non_empty(&vars, "SEEDWARDEN_WEBHOOK_URL"),
        };

        let status = StatusConfig {
            port: optional(&vars, "SEEDWARDEN_STATUS_PORT")?,
            api_key: vars
                .get("SEEDWARDEN_STATUS_API_KEY")
                .cloned()
                .unwrap_or_default(),
        };

        let logging = LoggingConfig {
            level: non_empty(&vars, "LOG_LEVEL").unwrap_or_else(default_log_level),
            format: non_empty(&vars, "LOG_FORMAT").unwrap_or_else(default_log_format),
            console: default_console(),
        };

        let config = Config {
            client,
            budget,
            policy,
            categories,
            store,
            notifier,
            status,
            logging,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Validate client config
        if self.client.name.is_empty() {
            bail!("client name must not be empty");
        }

        url::Url::parse(&self.client.url)
            .context(format!("Invalid downloader url '{}'", self.client.url))?;

        if self.client.username.is_empty() {
            bail!("username must not be empty");
        }

        if self.client.login_attempts == 0 {
            bail!("login_attempts must be greater than 0");
        }

        if self.client.timeout_secs == 0 {
            bail!("timeout_secs must be greater than 0");
        }

        // Validate budget config
        if self.budget.disk_space_gb <= 0.0 {
            bail!("disk_space_gb must be greater than 0");
        }

        if self.budget.reserve_space_gb < 0.0 {
            bail!("reserve_space_gb must be non-negative");
        }

        if self.budget.reserve_space_gb >= self.budget.disk_space_gb {
            bail!(
                "reserve_space_gb ({}) must be smaller than disk_space_gb ({})",
                self.budget.reserve_space_gb,
                self.budget.disk_space_gb
            );
        }

        if self.budget.limit_download_size_gb <= 0.0 {
            bail!("limit_download_size_gb must be greater than 0");
        }

        // Validate policy config
        if self.policy.split_filter_min_gb < 0.0 {
            bail!("split_filter_min_gb must be non-negative");
        }

        if self.policy.split_filter_max_gb <= self.policy.split_filter_min_gb {
            bail!(
                "split_filter_max_gb ({}) must be greater than split_filter_min_gb ({})",
                self.policy.split_filter_max_gb,
                self.policy.split_filter_min_gb
            );
        }

        for (name, category) in &self.categories {
            if let Some(progress) = category.hr_progress {
                if !(0.0..=100.0).contains(&progress) {
                    bail!("{}: hr_progress must be between 0 and 100", name);
                }
            }

            match category.split {
                Some(SplitRule::Absolute { gb }) if gb <= 0.0 => {
                    bail!("{}: absolute split size must be greater than 0", name);
                }
                Some(SplitRule::Relative { percent }) if percent <= 0.0 || percent > 100.0 => {
                    bail!("{}: relative split percent must be in (0, 100]", name);
                }
                _ => {}
            }
        }

        // The slow-torrent check needs at least one full window of samples
        if self.store.max_samples < crate::policy::health::SAMPLE_WINDOW {
            bail!(
                "max_samples must be at least {}",
                crate::policy::health::SAMPLE_WINDOW
            );
        }

        if self.status.port == Some(0) {
            bail!("status port must be greater than 0");
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            bail!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            );
        }

        let valid_formats = ["json", "console"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            bail!(
                "Invalid log format '{}'. Must be one of: json, console",
                self.logging.format
            );
        }

        Ok(())
    }

    /// Category policy, looked up case-insensitively.
    pub fn category(&self, name: &str) -> Option<&CategoryConfig> {
        self.categories.get(&name.to_uppercase())
    }

    pub fn disk_budget_bytes(&self) -> u64 {
        gib_to_bytes(self.budget.disk_space_gb)
    }

    pub fn reserve_bytes(&self) -> u64 {
        gib_to_bytes(self.budget.reserve_space_gb)
    }

    pub fn download_limit_bytes(&self) -> u64 {
        gib_to_bytes(self.budget.limit_download_size_gb)
    }

    pub fn split_min_bytes(&self) -> u64 {
        gib_to_bytes(self.policy.split_filter_min_gb)
    }

    pub fn split_max_bytes(&self) -> u64 {
        gib_to_bytes(self.policy.split_filter_max_gb)
    }

    pub fn is_black_domain(&self, domain: &str) -> bool {
        !domain.is_empty() && self.policy.black_domains.iter().any(|d| d == domain)
    }

    pub fn is_hr_domain(&self, domain: &str) -> bool {
        !domain.is_empty() && self.policy.hr_domains.iter().any(|d| d == domain)
    }
}

fn required(vars: &HashMap<String, String>, key: &str) -> Result<String> {
    vars.get(key)
        .cloned()
        .context(format!("Missing required environment variable {}", key))
}

fn parse_required<T>(vars: &HashMap<String, String>, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = required(vars, key)?;
    raw.trim()
        .parse()
        .context(format!("Invalid value '{}' for {}", raw, key))
}

fn optional<T>(vars: &HashMap<String, String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty(vars, key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .context(format!("Invalid value '{}' for {}", raw, key)),
        None => Ok(None),
    }
}

fn non_empty(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key).filter(|v| !v.trim().is_empty()).cloned()
}

/// Comma separated list, blanks dropped.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Category names that have at least one `<CAT>_<SUFFIX>` variable.
fn category_names(vars: &HashMap<String, String>, qb: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();

    for key in vars.keys() {
        for suffix in CATEGORY_SUFFIXES {
            let Some(prefix) = key
                .strip_suffix(suffix)
                .and_then(|rest| rest.strip_suffix('_'))
            else {
                continue;
            };

            if !prefix.is_empty() && prefix != qb && !GLOBAL_PREFIXES.contains(&prefix) {
                names.insert(prefix.to_string());
            }
            break;
        }
    }

    names
}

fn category_from_vars(vars: &HashMap<String, String>, name: &str) -> Result<CategoryConfig> {
    let key = |suffix: &str| format!("{}_{}", name, suffix);

    let split_type = non_empty(vars, &key("SPLIT_TYPE")).or_else(|| non_empty(vars, &key("SPLIT_TYTPE")));
    let split = match split_type {
        Some(kind) => {
            let number: f64 = parse_required(vars, &key("SPLIT_NUMBER"))?;
            if kind.trim() == "0" {
                Some(SplitRule::Absolute { gb: number })
            } else {
                Some(SplitRule::Relative { percent: number })
            }
        }
        None => None,
    };

    let min_incomplete = optional(vars, &key("INCOMPLETE"))?;
    let min_leechs = optional(vars, &key("LEECHS"))?.or(min_incomplete);

    Ok(CategoryConfig {
        domain: non_empty(vars, &key("DOMAIN")),
        trusted_groups: vars.get(&key("GROUP")).map(|v| split_list(v)).unwrap_or_default(),
        hr_groups: vars.get(&key("HR_GROUP")).map(|v| split_list(v)).unwrap_or_default(),
        hr_progress: optional(vars, &key("HR_PROGRESS"))?,
        split,
        min_incomplete,
        min_leechs,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::utils::bytes::GIB;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn base_vars() -> Vec<(String, String)> {
        [
            ("QB1_URL", "http://127.0.0.1:8080"),
            ("QB1_USERNAME", "admin"),
            ("QB1_PASSWORD", "secret"),
            ("QB1_DISK_SPACE", "500"),
            ("QB1_LESS_DOSK_SPACE", "20"),
            ("QB1_LIMIT_ACTIVE_TORRENT_NUM", "8"),
            ("QB1_LIMIT_TORRENT_DOWNLOAD_SIZE", "100"),
            ("TORRENT_SPLIT_FILTER_MIN_SIZE", "0.1"),
            ("TORRENT_SPLIT_FILTER_MAX_SIZE", "60"),
            ("BLACK_TORRENT_DOMAIN", "black.example.org, shady.example.net"),
            ("HR_DOMAIN", "hr.example.org"),
            ("ALL_GROUP", "FRDS,CMCT"),
            ("MOVIE_DOMAIN", "pt.example.org"),
            ("MOVIE_GROUP", "WiKi,CHD"),
            ("MOVIE_HR_GROUP", "HRGRP"),
            ("MOVIE_HR_PROGRESS", "80"),
            ("MOVIE_SPLIT_TYTPE", "0"),
            ("MOVIE_SPLIT_NUMBER", "50"),
            ("MOVIE_INCOMPLETE", "5"),
            ("TV_SPLIT_TYPE", "1"),
            ("TV_SPLIT_NUMBER", "30"),
            ("TV_LEECHS", "2"),
            ("PATH", "/usr/bin"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    /// Minimal valid configuration for tests across the crate.
    pub(crate) fn test_config() -> Config {
        Config::from_toml_str(
            r#"
            [client]
            name = "qb1"
            url = "http://127.0.0.1:8080"
            username = "admin"
            password = "secret"

            [budget]
            disk_space_gb = 100
            reserve_space_gb = 2
            limit_active_torrents = 4
            limit_download_size_gb = 30

            [policy]
            split_filter_min_gb = 0
            split_filter_max_gb = 100
            black_domains = ["black.example.org"]
            hr_domains = ["hr.example.org"]
            trusted_groups = ["GLOBAL"]

            [categories.movie]
            domain = "pt.example.org"
            trusted_groups = ["WiKi"]
            min_incomplete = 5

            [categories.hr]
            domain = "hr.example.org"
            hr_groups = ["HRG"]
            hr_progress = 80

            [categories.black]
            domain = "black.example.org"
            split = { type = "absolute", gb = 10 }
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_from_vars_reads_instance_and_globals() {
        let config = Config::from_vars("qb1", base_vars()).unwrap();

        assert_eq!(config.client.url, "http://127.0.0.1:8080");
        assert_eq!(config.client.login_attempts, 5);
        assert_eq!(config.disk_budget_bytes(), 500 * GIB);
        assert_eq!(config.reserve_bytes(), 20 * GIB);
        assert_eq!(config.budget.limit_active_torrents, 8);
        assert_eq!(config.download_limit_bytes(), 100 * GIB);
        assert_eq!(
            config.policy.black_domains,
            vec!["black.example.org".to_string(), "shady.example.net".to_string()]
        );
        assert!(config.is_hr_domain("hr.example.org"));
        assert!(!config.is_black_domain(""));
    }

    #[test]
    fn test_from_vars_discovers_categories() {
        let config = Config::from_vars("qb1", base_vars()).unwrap();

        let mut names: Vec<_> = config.categories.keys().cloned().collect();
        names.sort();
        assert_eq!(names, vec!["MOVIE".to_string(), "TV".to_string()]);

        let movie = config.category("movie").unwrap();
        assert_eq!(movie.domain.as_deref(), Some("pt.example.org"));
        assert_eq!(movie.trusted_groups, vec!["WiKi".to_string(), "CHD".to_string()]);
        assert_eq!(movie.hr_groups, vec!["HRGRP".to_string()]);
        assert_eq!(movie.hr_progress, Some(80.0));
        assert_eq!(movie.split, Some(SplitRule::Absolute { gb: 50.0 }));
        assert_eq!(movie.min_incomplete, Some(5));
        // Leecher minimum falls back to the incomplete minimum
        assert_eq!(movie.min_leechs, Some(5));

        let tv = config.category("TV").unwrap();
        assert_eq!(tv.split, Some(SplitRule::Relative { percent: 30.0 }));
        assert_eq!(tv.min_incomplete, None);
        assert_eq!(tv.min_leechs, Some(2));
        assert!(tv.trusted_groups.is_empty());
    }

    #[test]
    fn test_from_vars_missing_required_is_fatal() {
        let vars: Vec<_> = base_vars()
            .into_iter()
            .filter(|(k, _)| k != "HR_DOMAIN")
            .collect();

        let err = Config::from_vars("qb1", vars).unwrap_err();
        assert!(err.to_string().contains("HR_DOMAIN"));
    }

    #[test]
    fn test_from_vars_split_type_requires_number() {
        let vars: Vec<_> = base_vars()
            .into_iter()
            .filter(|(k, _)| k != "TV_SPLIT_NUMBER")
            .collect();

        assert!(Config::from_vars("qb1", vars).is_err());
    }

    #[test]
    fn test_from_vars_prefers_correct_reserve_spelling() {
        let mut vars = base_vars();
        vars.push(("QB1_LESS_DISK_SPACE".to_string(), "30".to_string()));

        let config = Config::from_vars("qb1", vars).unwrap();
        assert_eq!(config.reserve_bytes(), 30 * GIB);
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [client]
            name = "qb2"
            url = "http://10.0.0.2:8080"
            username = "u"
            password = "p"

            [budget]
            disk_space_gb = 200
            limit_active_torrents = 3
            limit_download_size_gb = 40

            [policy]
            split_filter_max_gb = 50
            black_domains = []
            hr_domains = []
            trusted_groups = []

            [categories.Anime]
            split = {{ type = "relative", percent = 25 }}

            [logging]
            format = "console"
            "#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.client.name, "qb2");
        assert_eq!(config.reserve_bytes(), 0);
        assert_eq!(config.store.dir, PathBuf::from("torrents"));
        assert_eq!(config.logging.format, "console");
        assert_eq!(
            config.category("anime").unwrap().split,
            Some(SplitRule::Relative { percent: 25.0 })
        );
    }

    #[test]
    fn test_validate_rejects_inverted_filters() {
        let mut config = test_config();
        config.policy.split_filter_min_gb = 10.0;
        config.policy.split_filter_max_gb = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_split_percent() {
        let mut config = test_config();
        config.categories.insert(
            "TV".to_string(),
            CategoryConfig {
                split: Some(SplitRule::Relative { percent: 150.0 }),
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_small_sample_retention() {
        let mut config = test_config();
        config.store.max_samples = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_log_level() {
        let mut config = test_config();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("a, b,,c ,"), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }
}
