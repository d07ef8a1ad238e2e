// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing and command dispatch.

use crate::commands::{self, CollectOptions};
use crate::{config, db, query};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the SQLite snapshot file
    #[arg(short, long, default_value = "github.sqlite", global = true)]
    database: Utf8PathBuf,

    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: Utf8PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug)]
enum Command {
    /// Rebuild the snapshot from the GitHub API
    Collect {
        /// Skip discussions (GraphQL)
        #[arg(long)]
        skip_discussions: bool,

        /// Skip stargazers
        #[arg(long)]
        skip_stargazers: bool,
    },

    /// Generate the static report from the snapshot
    Report {
        /// Output directory, replaced on every run
        #[arg(short, long, default_value = "dist")]
        output: Utf8PathBuf,

        /// Calendar months to show, overriding the configuration
        #[arg(short, long, conflicts_with = "all_time")]
        months: Option<u32>,

        /// Show the full history
        #[arg(long)]
        all_time: bool,
    },

    /// Show the current API rate limit
    RateLimit,

    /// Query the snapshot
    Query {
        #[command(subcommand)]
        query_type: QueryType,
    },

    /// Export snapshot tables to various formats
    Export {
        #[command(subcommand)]
        export_type: ExportType,
    },
}

#[derive(Parser, Debug)]
enum QueryType {
    /// Show row counts and date coverage per table
    Summary,
}

#[derive(Parser, Debug)]
enum ExportType {
    /// Export to CSV format
    Csv {
        /// Output file path
        #[arg(short, long)]
        output: Utf8PathBuf,

        /// Table to export: users, org_members, commits, issues, discussions
        /// or stargazers
        #[arg(short = 't', long, default_value = "commits")]
        table: String,
    },

    /// Export to JSON format
    Json {
        /// Output file path
        #[arg(short, long)]
        output: Utf8PathBuf,

        /// Table to export: users, org_members, commits, issues, discussions
        /// or stargazers
        #[arg(short = 't', long, default_value = "commits")]
        table: String,
    },
}

fn load_config(path: &Utf8Path) -> Result<config::Config> {
    if !path.as_std_path().exists() {
        tracing::warn!(path = %path, "configuration file not found, using defaults");
        return Ok(config::Config::default());
    }
    config::Config::load(path).context("failed to load configuration")
}

/// Parse arguments and dispatch to the appropriate command.
pub async fn dispatch() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Collect {
            skip_discussions,
            skip_stargazers,
        } => {
            let config = load_config(&args.config)?;
            let options = CollectOptions {
                skip_discussions,
                skip_stargazers,
            };
            commands::run_collect(&args.database, &config, options).await?;
        }
        Command::Report {
            output,
            months,
            all_time,
        } => {
            let config = load_config(&args.config)?;
            commands::run_report(&args.database, &config, &output, months, all_time)?;
        }
        Command::RateLimit => {
            let config = load_config(&args.config)?;
            commands::run_rate_limit(&config).await?;
        }
        Command::Query { query_type } => {
            let conn = db::open_snapshot(&args.database).context("failed to open snapshot")?;
            let query_kind = match query_type {
                QueryType::Summary => query::QueryKind::Summary,
            };
            query::run_query(&conn, query_kind)?;
        }
        Command::Export { export_type } => {
            let conn = db::open_snapshot(&args.database).context("failed to open snapshot")?;
            let export_kind = match export_type {
                ExportType::Csv { output, table } => query::ExportKind::Csv {
                    output: output.to_string(),
                    table,
                },
                ExportType::Json { output, table } => query::ExportKind::Json {
                    output: output.to_string(),
                    table,
                },
            };
            query::run_export(&conn, export_kind)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_arguments() {
        let args = Args::try_parse_from(["repo-stats", "report", "--months", "12"]).unwrap();
        assert_eq!(args.database, "github.sqlite");
        match args.command {
            Command::Report {
                output,
                months,
                all_time,
            } => {
                assert_eq!(output, "dist");
                assert_eq!(months, Some(12));
                assert!(!all_time);
            }
            other => panic!("unexpected command {other:?}"),
        }

        assert!(
            Args::try_parse_from(["repo-stats", "report", "--months", "3", "--all-time"]).is_err()
        );
    }

    #[test]
    fn test_global_database_flag() {
        let args =
            Args::try_parse_from(["repo-stats", "collect", "--database", "snap.db", "--skip-stargazers"])
                .unwrap();
        assert_eq!(args.database, "snap.db");
        assert!(matches!(
            args.command,
            Command::Collect {
                skip_discussions: false,
                skip_stargazers: true
            }
        ));
    }
}
