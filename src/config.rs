// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for repository activity collection and reporting.

use crate::error::ConfigError;
use anyhow::{Context, Result};
use camino::Utf8Path;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;

/// Environment variable holding the API token.
pub const GITHUB_TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RepositoryConfig {
    pub owner: String,
    pub name: String,
    /// Organization whose members are treated as maintainers, alongside the
    /// repository's collaborators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    pub per_page: u32,
    pub timeout_secs: u64,
    /// Lower bound passed to the commits and issues endpoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<NaiveDate>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            per_page: 100,
            timeout_secs: 30,
            since: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Calendar months shown in charts, ending with the current one. Zero
    /// shows all history.
    pub months: u32,
    pub leaderboard_size: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: None,
            months: 6,
            leaderboard_size: 20,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let content = fs::read_to_string(path.as_std_path())
            .with_context(|| format!("failed to read config file at {}", path))?;

        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file at {}", path))
    }

    /// Organizations whose members count as maintainers.
    pub fn organizations(&self) -> impl Iterator<Item = &str> {
        self.repository.organization.as_deref().into_iter()
    }

    /// Title shown at the top of the report.
    pub fn report_title(&self) -> String {
        self.report
            .title
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.repository.owner, self.repository.name))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repository: RepositoryConfig {
                owner: "mlflow".to_string(),
                name: "mlflow".to_string(),
                organization: Some("mlflow".to_string()),
            },
            client: ClientConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

/// Read the API token from the environment.
pub fn github_token() -> Result<String, ConfigError> {
    token_from_value(std::env::var(GITHUB_TOKEN_ENV_VAR).ok())
}

/// Unset, empty and whitespace-only values are all missing.
fn token_from_value(value: Option<String>) -> Result<String, ConfigError> {
    match value {
        Some(token) if !token.trim().is_empty() => Ok(token),
        _ => Err(ConfigError::MissingToken {
            var: GITHUB_TOKEN_ENV_VAR,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_lookup() {
        for missing in [None, Some(String::new()), Some(" \t".to_string())] {
            let err = token_from_value(missing).unwrap_err();
            assert!(matches!(err, ConfigError::MissingToken { var: "GITHUB_TOKEN" }));
        }
        assert_eq!(
            token_from_value(Some("ghp_abc".to_string())).unwrap(),
            "ghp_abc"
        );
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();

        assert_eq!(parsed.repository.owner, "mlflow");
        assert_eq!(parsed.client.per_page, config.client.per_page);
        assert_eq!(parsed.report.months, 6);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[repository]
owner = "nextest-rs"
name = "nextest"
organization = "nextest-rs"

[client]
per_page = 50
since = "2022-07-01"

[report]
title = "nextest"
leaderboard_size = 5
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.repository.owner, "nextest-rs");
        assert_eq!(config.client.per_page, 50);
        assert_eq!(config.client.timeout_secs, 30);
        assert_eq!(
            config.client.since,
            Some(NaiveDate::from_ymd_opt(2022, 7, 1).unwrap())
        );
        assert_eq!(config.report.months, 6);
        assert_eq!(config.report.leaderboard_size, 5);
        assert_eq!(config.report_title(), "nextest");

        let orgs: Vec<_> = config.organizations().collect();
        assert_eq!(orgs, vec!["nextest-rs"]);
    }

    #[test]
    fn test_minimal_config() {
        let toml = r#"
[repository]
owner = "octo"
name = "widgets"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.organizations().count(), 0);
        assert_eq!(config.report_title(), "octo/widgets");
        assert_eq!(config.client.per_page, 100);
    }
}
