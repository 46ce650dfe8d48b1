use std::path::{Path, PathBuf};

use serde::Deserialize;

use cascadia_engine::{DEFAULT_MAX_CASCADE_DEPTH, SessionConfig, StrategyChoice};

use crate::CliError;

/// File read when `--config` is not given, if present.
pub const DEFAULT_CONFIG_FILE: &str = "cascadia.toml";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    pub log: LogConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `cascadia_engine=debug`.
    pub level: String,
    pub format: LogFormat,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub url: Option<String>,
    pub strategy: StrategyChoice,
    pub max_connections: u32,
    pub max_cascade_depth: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            strategy: StrategyChoice::Auto,
            max_connections: 5,
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
        }
    }
}

impl StoreConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_strategy(self.strategy)
            .with_max_cascade_depth(self.max_cascade_depth)
    }

    /// Connection string from the flag, the config file, then `DATABASE_URL`.
    pub fn resolve_url(&self, flag: Option<String>) -> Result<String, CliError> {
        flag.or_else(|| self.url.clone())
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                CliError::InvalidConfig(
                    "connection string is required (--url, [store].url or DATABASE_URL)"
                        .to_string(),
                )
            })
    }
}

impl CliConfig {
    pub fn parse(text: &str) -> Result<Self, CliError> {
        Ok(toml::from_str(text)?)
    }

    /// Load `path`, or the default file when it exists, or defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, CliError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.exists() {
                    return Ok(Self::default());
                }
                fallback
            }
        };
        let text = std::fs::read_to_string(&path).map_err(|err| {
            CliError::InvalidConfig(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::parse(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sections() {
        let config = CliConfig::parse(
            r#"
[log]
level = "cascadia_engine=debug"
format = "json"

[store]
url = "postgres://localhost/app"
strategy = "emulated"
max_connections = 2
"#,
        )
        .unwrap();

        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.log.level, "cascadia_engine=debug");
        assert_eq!(config.store.strategy, StrategyChoice::Emulated);
        assert_eq!(config.store.max_connections, 2);
        assert_eq!(config.store.max_cascade_depth, DEFAULT_MAX_CASCADE_DEPTH);
        assert_eq!(
            config.store.resolve_url(None).unwrap(),
            "postgres://localhost/app"
        );
    }

    #[test]
    fn flag_wins_over_file() {
        let config = CliConfig::parse("[store]\nurl = \"postgres://file\"\n").unwrap();
        let url = config
            .store
            .resolve_url(Some("postgres://flag".to_string()))
            .unwrap();
        assert_eq!(url, "postgres://flag");
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(CliConfig::parse("[store]\npool = 3\n").is_err());
    }
}
