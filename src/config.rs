//! Application configuration (spec §1.1): TOML file, then `APP_*`
//! environment overrides, then CLI flag overrides, validated before use.

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::utils::StringExt;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub catalog: CatalogConfig,
    pub cache: CacheConfig,
    pub session: SessionConfig,
    pub dashboard: DashboardConfig,
    pub orchestrator: OrchestratorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Whether the optional HTTP mirror surface is started alongside the
    /// tool-protocol server.
    pub http_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub path: String,
    pub reload_on_sighup: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub ttl_seconds: u64,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub ttl_seconds: u64,
    pub max_sessions: usize,
    pub history_len: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub path: String,
    pub sweep_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    #[serde(deserialize_with = "deserialize_duration_secs")]
    pub call_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// Command line arguments for configuration overrides.
#[derive(Parser, Debug, Clone)]
#[command(name = "semantic-layer")]
#[command(version, about = "Conversational analytics semantic layer")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Start the optional HTTP mirror surface (overrides config file)
    #[arg(long, value_name = "BOOL")]
    pub http_enabled: Option<bool>,

    /// Path to the semantic-model catalog YAML (overrides config file)
    #[arg(long, value_name = "PATH")]
    pub catalog_path: Option<String>,

    /// Query cache TTL (overrides config file, e.g. "30m", "1800")
    #[arg(long, value_name = "DURATION")]
    pub cache_ttl_seconds: Option<String>,

    /// Query cache max entries (overrides config file)
    #[arg(long, value_name = "N")]
    pub cache_max_entries: Option<usize>,

    /// Session TTL (overrides config file, e.g. "1h", "3600")
    #[arg(long, value_name = "DURATION")]
    pub session_ttl_seconds: Option<String>,

    /// Dashboard artifact directory (overrides config file)
    #[arg(long, value_name = "PATH")]
    pub dashboard_path: Option<String>,

    /// Dashboard TTL sweep age in days (overrides config file)
    #[arg(long, value_name = "DAYS")]
    pub dashboard_sweep_days: Option<u32>,

    /// Per-turn orchestrator wall-clock budget (overrides config file)
    #[arg(long, value_name = "DURATION")]
    pub call_timeout_seconds: Option<String>,

    /// Logging level (overrides config file, e.g. "info,semantic_layer=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Config {
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with `APP_`, plus the spec-named
    ///    `CATALOG_PATH`/`CACHE_TTL_SECONDS`/etc.)
    /// 3. Configuration file (`conf/config.toml` / `config.toml`)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();

        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(&cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Supported environment variables (spec §6): `CATALOG_PATH`,
    /// `CACHE_TTL_SECONDS`, `CACHE_MAX_ENTRIES`, `SESSION_TTL_SECONDS`,
    /// `DASHBOARD_PATH`, `DASHBOARD_SWEEP_DAYS`, plus `APP_SERVER_HOST`,
    /// `APP_SERVER_PORT`, `APP_HTTP_ENABLED`, `APP_CALL_TIMEOUT_SECONDS`,
    /// `APP_LOG_LEVEL`. No value may contain a null byte or exceed 4 KiB.
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = env_var_checked("APP_SERVER_HOST")
            && let Some(host) = host.clean()
        {
            self.server.host = host;
            tracing::info!("override server.host from env: {}", self.server.host);
        }
        if let Ok(port) = env_var_checked("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
            tracing::info!("override server.port from env: {}", self.server.port);
        }
        if let Ok(enabled) = env_var_checked("APP_HTTP_ENABLED")
            && let Ok(val) = enabled.parse()
        {
            self.server.http_enabled = val;
            tracing::info!("override server.http_enabled from env: {}", self.server.http_enabled);
        }

        if let Ok(path) = env_var_checked("CATALOG_PATH")
            && let Some(path) = path.clean()
        {
            self.catalog.path = path;
            tracing::info!("override catalog.path from env: {}", self.catalog.path);
        }

        if let Ok(ttl) = env_var_checked("CACHE_TTL_SECONDS") {
            match parse_duration_to_secs(&ttl) {
                Ok(val) => self.cache.ttl_seconds = val,
                Err(e) => tracing::warn!("invalid CACHE_TTL_SECONDS '{ttl}': {e}"),
            }
        }
        if let Ok(max) = env_var_checked("CACHE_MAX_ENTRIES")
            && let Ok(val) = max.parse()
        {
            self.cache.max_entries = val;
        }

        if let Ok(ttl) = env_var_checked("SESSION_TTL_SECONDS") {
            match parse_duration_to_secs(&ttl) {
                Ok(val) => self.session.ttl_seconds = val,
                Err(e) => tracing::warn!("invalid SESSION_TTL_SECONDS '{ttl}': {e}"),
            }
        }

        if let Ok(path) = env_var_checked("DASHBOARD_PATH")
            && let Some(path) = path.clean()
        {
            self.dashboard.path = path;
            tracing::info!("override dashboard.path from env: {}", self.dashboard.path);
        }
        if let Ok(days) = env_var_checked("DASHBOARD_SWEEP_DAYS")
            && let Ok(val) = days.parse()
        {
            self.dashboard.sweep_days = val;
        }

        if let Ok(timeout) = env_var_checked("APP_CALL_TIMEOUT_SECONDS") {
            match parse_duration_to_secs(&timeout) {
                Ok(val) => self.orchestrator.call_timeout_seconds = val,
                Err(e) => tracing::warn!("invalid APP_CALL_TIMEOUT_SECONDS '{timeout}': {e}"),
            }
        }

        if let Ok(level) = env_var_checked("APP_LOG_LEVEL")
            && let Some(level) = level.clean()
        {
            self.logging.level = level;
            tracing::info!("override logging.level from env: {}", self.logging.level);
        }
    }

    /// Apply command line argument overrides (highest priority).
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.server_port {
            self.server.port = port;
        }
        if let Some(enabled) = args.http_enabled {
            self.server.http_enabled = enabled;
        }
        if let Some(path) = &args.catalog_path {
            self.catalog.path = path.clone();
        }
        if let Some(ttl) = &args.cache_ttl_seconds {
            match parse_duration_to_secs(ttl) {
                Ok(val) => self.cache.ttl_seconds = val,
                Err(e) => tracing::warn!("invalid --cache-ttl-seconds '{ttl}': {e}"),
            }
        }
        if let Some(max) = args.cache_max_entries {
            self.cache.max_entries = max;
        }
        if let Some(ttl) = &args.session_ttl_seconds {
            match parse_duration_to_secs(ttl) {
                Ok(val) => self.session.ttl_seconds = val,
                Err(e) => tracing::warn!("invalid --session-ttl-seconds '{ttl}': {e}"),
            }
        }
        if let Some(path) = &args.dashboard_path {
            self.dashboard.path = path.clone();
        }
        if let Some(days) = args.dashboard_sweep_days {
            self.dashboard.sweep_days = days;
        }
        if let Some(timeout) = &args.call_timeout_seconds {
            match parse_duration_to_secs(timeout) {
                Ok(val) => self.orchestrator.call_timeout_seconds = val,
                Err(e) => tracing::warn!("invalid --call-timeout-seconds '{timeout}': {e}"),
            }
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Exit code 4 (configuration invalid, spec §6) is surfaced by the
    /// caller mapping this `Err` at `main`'s top level.
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("server.port cannot be 0");
        }
        if self.catalog.path.is_empty() {
            anyhow::bail!("catalog.path cannot be empty");
        }
        if self.cache.ttl_seconds == 0 {
            anyhow::bail!("cache.ttl_seconds must be > 0");
        }
        if self.cache.max_entries == 0 {
            anyhow::bail!("cache.max_entries must be > 0");
        }
        if self.session.ttl_seconds == 0 {
            anyhow::bail!("session.ttl_seconds must be > 0");
        }
        if self.orchestrator.call_timeout_seconds == 0 {
            anyhow::bail!("orchestrator.call_timeout_seconds must be > 0");
        }
        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths = ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];
        possible_paths.iter().find(|p| Path::new(p).exists()).map(|p| p.to_string())
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8090, http_enabled: false }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self { path: "catalog.yaml".to_string(), reload_on_sighup: true }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_seconds: 1800, max_entries: 500 }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl_seconds: 3600, max_sessions: 1000, history_len: 10 }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self { path: "dashboards".to_string(), sweep_days: 7 }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { call_timeout_seconds: 15 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info,semantic_layer=debug".to_string(), file: Some("logs/analyst.log".to_string()) }
    }
}

/// Rejects null bytes and over-long values (spec §1.1/§6) before a value
/// from the environment is trusted anywhere in the config.
fn env_var_checked(key: &str) -> Result<String, std::env::VarError> {
    let value = std::env::var(key)?;
    if value.contains('\0') || value.len() > 4 * 1024 {
        tracing::warn!(key, "rejecting invalid environment value");
        return Err(std::env::VarError::NotPresent);
    }
    Ok(value)
}

fn parse_duration_to_secs(input: &str) -> Result<u64, String> {
    if let Ok(val) = input.parse::<u64>() {
        return Ok(val);
    }
    let s = input.trim().to_lowercase();
    let (num_str, unit) = s.split_at(s.chars().take_while(|c| c.is_ascii_digit()).count());
    if num_str.is_empty() || unit.is_empty() {
        return Err("missing number or unit".into());
    }
    let n: u64 = num_str.parse().map_err(|_| "invalid number".to_string())?;
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(n),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(n * 60),
        "h" | "hr" | "hour" | "hours" => Ok(n * 60 * 60),
        "d" | "day" | "days" => Ok(n * 60 * 60 * 24),
        _ => Err(format!("unsupported unit: {unit}")),
    }
}

fn deserialize_duration_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = u64;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a number of seconds or a string like '30s', '5m', '1h'")
        }
        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(v)
        }
        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if v >= 0 { Ok(v as u64) } else { Err(E::custom("negative not allowed")) }
        }
        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(v).map_err(E::custom)
        }
        fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            parse_duration_to_secs(&v).map_err(E::custom)
        }
    }
    deserializer.deserialize_any(Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_cache_ttl() {
        let mut config = Config::default();
        config.cache.ttl_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_human_friendly_duration_strings() {
        assert_eq!(parse_duration_to_secs("30s").unwrap(), 30);
        assert_eq!(parse_duration_to_secs("5m").unwrap(), 300);
        assert_eq!(parse_duration_to_secs("1h").unwrap(), 3600);
        assert_eq!(parse_duration_to_secs("1800").unwrap(), 1800);
    }

    #[test]
    fn env_override_is_trimmed_and_blank_values_are_ignored() {
        // Both assertions share one test (rather than racing on the same
        // process-global env var across parallel tests).
        unsafe { std::env::set_var("APP_SERVER_HOST", "  example.internal  ") };
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.server.host, "example.internal");

        unsafe { std::env::set_var("APP_SERVER_HOST", "   ") };
        let before = config.server.host.clone();
        config.apply_env_overrides();
        assert_eq!(config.server.host, before);

        unsafe { std::env::remove_var("APP_SERVER_HOST") };
    }
}
