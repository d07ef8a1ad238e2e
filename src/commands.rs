// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command implementations.

use crate::charts::BitmapRenderer;
use crate::config::Config;
use crate::db::{self, Record, Snapshot};
use crate::github::{GithubClient, Paginate};
use crate::models::{Commit, Discussion, Issue, OrgMember, Stargazer, User};
use crate::normalize::{FromGithub, UserRegistry, union_members};
use crate::query::format_number;
use crate::report::{self, ReportOptions};
use anyhow::{Context, Result};
use camino::Utf8Path;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::time::Duration;
use tracing::{info, warn};

/// Optional stages of a collect run.
#[derive(Debug, Default, Clone, Copy)]
pub struct CollectOptions {
    pub skip_discussions: bool,
    pub skip_stargazers: bool,
}

/// Rows written by one collect run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CollectSummary {
    pub users: usize,
    pub org_members: usize,
    pub commits: usize,
    pub issues: usize,
    pub discussions: usize,
    pub stargazers: usize,
}

fn client_from_config(config: &Config) -> Result<GithubClient> {
    GithubClient::from_env(
        config.client.per_page,
        Duration::from_secs(config.client.timeout_secs),
    )
    .context("failed to configure GitHub client")
}

/// Run the collect command.
pub async fn run_collect(database: &Utf8Path, config: &Config, options: CollectOptions) -> Result<()> {
    // Fail on a missing token before touching the filesystem.
    let client = client_from_config(config)?;
    log_rate_limit(&client).await?;

    println!(
        "\nCollecting {}/{} into {}...",
        config.repository.owner, config.repository.name, database
    );
    let summary = collect_into(&client, database, config, options).await?;

    println!("  Users:        {:>10}", format_number(summary.users as u64));
    println!("  Maintainers:  {:>10}", format_number(summary.org_members as u64));
    println!("  Commits:      {:>10}", format_number(summary.commits as u64));
    println!("  Issues/PRs:   {:>10}", format_number(summary.issues as u64));
    println!("  Discussions:  {:>10}", format_number(summary.discussions as u64));
    println!("  Stargazers:   {:>10}", format_number(summary.stargazers as u64));

    log_rate_limit(&client).await?;

    println!("\nCollection complete.");
    Ok(())
}

/// Build a fresh snapshot next to `database` and swap it in on success.
///
/// A failed run removes the partial build; any previous snapshot at
/// `database` is left as it was.
pub async fn collect_into(
    client: &GithubClient,
    database: &Utf8Path,
    config: &Config,
    options: CollectOptions,
) -> Result<CollectSummary> {
    let staging = db::staging_path(database);
    let mut conn = db::create_snapshot(&staging).context("failed to initialize snapshot")?;

    match collect_snapshot(client, &mut conn, config, options).await {
        Ok(summary) => {
            db::publish_snapshot(conn, &staging, database)?;
            Ok(summary)
        }
        Err(err) => {
            drop(conn);
            if let Err(cleanup) = db::discard_snapshot(&staging) {
                warn!(path = %staging, error = %cleanup, "failed to remove partial snapshot");
            }
            Err(err)
        }
    }
}

/// Fetch every entity into an empty snapshot within one transaction.
///
/// Users are written last: the registry only knows every referenced account
/// once all pages have been seen, so foreign keys are checked at commit.
pub async fn collect_snapshot(
    client: &GithubClient,
    conn: &mut Connection,
    config: &Config,
    options: CollectOptions,
) -> Result<CollectSummary> {
    let owner = config.repository.owner.as_str();
    let repo = config.repository.name.as_str();
    let since = config.client.since;

    let tx = conn.transaction()?;
    tx.execute_batch("PRAGMA defer_foreign_keys = ON;")?;

    let mut registry = UserRegistry::new();
    let mut summary = CollectSummary {
        commits: load_pages::<Commit, _>(&tx, client.commits(owner, repo, since), &mut registry)
            .await?,
        ..CollectSummary::default()
    };

    let contributors = client
        .contributors(owner, repo)
        .collect_all()
        .await
        .context("failed to fetch contributors")?;
    registry.extend(User::from_gh_objects(&contributors)?);

    let mut member_groups = Vec::new();
    for org in config.organizations() {
        let members = client
            .organization_members(org)
            .collect_all()
            .await
            .with_context(|| format!("failed to fetch members of {}", org))?;
        member_groups.push(OrgMember::from_gh_objects(&members)?);
    }
    let collaborators = client
        .collaborators(owner, repo)
        .collect_all()
        .await
        .context("failed to fetch collaborators")?;
    member_groups.push(OrgMember::from_gh_objects(&collaborators)?);
    summary.org_members = db::bulk_insert(&tx, &union_members(member_groups))?;

    summary.issues =
        load_pages::<Issue, _>(&tx, client.issues(owner, repo, since), &mut registry).await?;

    if !options.skip_discussions {
        summary.discussions =
            load_pages::<Discussion, _>(&tx, client.discussions(owner, repo), &mut registry)
                .await?;
    }

    if !options.skip_stargazers {
        summary.stargazers =
            load_pages::<Stargazer, _>(&tx, client.stargazers(owner, repo), &mut registry).await?;
    }

    summary.users = db::bulk_insert(&tx, &registry.into_users())?;
    tx.commit().context("failed to commit snapshot")?;

    info!(?summary, "snapshot complete");
    Ok(summary)
}

/// Stream pages from `pager` into the table of `T`, one batch per page.
async fn load_pages<T, P>(conn: &Connection, mut pager: P, registry: &mut UserRegistry) -> Result<usize>
where
    T: FromGithub + Record,
    P: Paginate,
{
    let mut inserted = 0;
    while let Some(page) = pager
        .next_page()
        .await
        .with_context(|| format!("failed to fetch {}", pager.endpoint()))?
    {
        registry.register_embedded::<T>(&page);
        let records = T::from_gh_objects(&page)?;
        inserted += db::bulk_insert(conn, &records)?;
    }

    info!(table = T::TABLE, endpoint = pager.endpoint(), inserted, "stored records");
    Ok(inserted)
}

async fn log_rate_limit(client: &GithubClient) -> Result<()> {
    let limit = client
        .rate_limit()
        .await
        .context("failed to query rate limit")?;
    let core = &limit.resources.core;
    info!(
        remaining = core.remaining,
        limit = core.limit,
        reset = %format_reset(core.reset),
        "core rate limit"
    );
    Ok(())
}

fn format_reset(reset: i64) -> String {
    DateTime::<Utc>::from_timestamp(reset, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| reset.to_string())
}

/// Run the report command.
pub fn run_report(
    database: &Utf8Path,
    config: &Config,
    output_dir: &Utf8Path,
    months: Option<u32>,
    all_time: bool,
) -> Result<()> {
    let conn = db::open_snapshot(database)?;
    let snapshot = Snapshot::load(&conn).context("failed to load snapshot")?;

    let options = ReportOptions {
        title: config.report_title(),
        months: if all_time {
            0
        } else {
            months.unwrap_or(config.report.months)
        },
        leaderboard_size: config.report.leaderboard_size,
        now: Utc::now().naive_utc(),
    };

    let report = report::build_report(&snapshot, &options)?;
    let artifacts = report::write_report(&report, output_dir, &BitmapRenderer)?;

    println!(
        "Generated {} charts for {} to {}",
        artifacts.charts.len(),
        report.title,
        artifacts.index
    );
    Ok(())
}

/// Run the rate-limit command.
pub async fn run_rate_limit(config: &Config) -> Result<()> {
    let client = client_from_config(config)?;
    let limit = client
        .rate_limit()
        .await
        .context("failed to query rate limit")?;

    println!("\n{:<10} {:>10} {:>10} {:>10}  {}", "Resource", "Limit", "Used", "Remaining", "Resets");
    println!("{}", "=".repeat(68));

    let windows = std::iter::once(("core", &limit.resources.core))
        .chain(limit.resources.graphql.as_ref().map(|w| ("graphql", w)));
    for (name, window) in windows {
        println!(
            "{:<10} {:>10} {:>10} {:>10}  {}",
            name,
            format_number(window.limit),
            format_number(window.used),
            format_number(window.remaining),
            format_reset(window.reset)
        );
    }

    Ok(())
}
