// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Static activity report built from a snapshot.
//!
//! [`build_report`] turns a loaded [`Snapshot`] into charts and a contributor
//! leaderboard; [`write_report`] lays them out as a directory:
//!
//! ```text
//! index.html
//! assets/plots/<metric>.png
//! assets/data/<metric>.json
//! assets/tables/active-contributors.html
//! ```

use crate::aggregate::{
    MembershipSet, align, bucket_by_month, cumulative, first_event_per_actor, month_start,
    month_ticks, months_before, next_month, partition_by_membership, total_before,
};
use crate::charts::{Chart, ChartRenderer, Series};
use crate::db::Snapshot;
use crate::models::{Commit, Issue, IssueState};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{NaiveDate, NaiveDateTime};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use tracing::info;

pub const CONTRIBUTORS: &str = "contributors";
pub const TOTAL_CONTRIBUTORS: &str = "total-contributors";
pub const ISSUES: &str = "issues";
pub const PULL_REQUESTS: &str = "pull-requests";
pub const DISCUSSIONS: &str = "discussions";
pub const STARGAZERS: &str = "stargazers";
pub const COMMITS: &str = "commits";
pub const ACTIVE_CONTRIBUTORS: &str = "active-contributors";

/// Chart artifacts, in page order.
pub const CHART_SLUGS: [&str; 7] = [
    ISSUES,
    PULL_REQUESTS,
    CONTRIBUTORS,
    TOTAL_CONTRIBUTORS,
    DISCUSSIONS,
    STARGAZERS,
    COMMITS,
];

const PAGE_STYLE: &str = r#"
body { font-family: Inter, Arial, sans-serif; margin: 0 auto; max-width: 1280px; color: #0f172a; }
header { text-align: center; padding: 24px 0; }
.row { display: flex; gap: 16px; }
.row figure { flex: 1; margin: 0 0 16px 0; }
.row img { width: 100%; border: 1px solid #e2e8f0; }
table { border-collapse: collapse; width: 100%; }
th, td { text-align: left; padding: 6px 12px; border-bottom: 1px solid #e2e8f0; }
td img { vertical-align: middle; border-radius: 50%; margin-right: 8px; }
.badge { font-size: 12px; color: #64748b; }
iframe { border: none; width: 100%; height: 640px; }
"#;

#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub title: String,
    /// Calendar months shown, ending with the current one. Zero shows all
    /// history.
    pub months: u32,
    pub leaderboard_size: usize,
    pub now: NaiveDateTime,
}

/// One row of the active contributor table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub login: String,
    pub commits: u64,
    pub maintainer: bool,
}

impl LeaderboardEntry {
    pub fn avatar_url(&self) -> String {
        format!("https://avatars.githubusercontent.com/u/{}?s=64", self.user_id)
    }

    pub fn profile_url(&self) -> String {
        format!("https://github.com/{}", self.login)
    }
}

#[derive(Debug, Clone)]
pub struct Report {
    pub title: String,
    pub generated_at: NaiveDateTime,
    /// First day of the first and last months shown.
    pub window: (NaiveDate, NaiveDate),
    pub charts: Vec<Chart>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

impl Report {
    pub fn chart(&self, slug: &str) -> Option<&Chart> {
        self.charts.iter().find(|c| c.slug == slug)
    }
}

/// Files written by [`write_report`].
#[derive(Debug)]
pub struct ReportArtifacts {
    pub index: Utf8PathBuf,
    pub charts: Vec<Utf8PathBuf>,
    pub data: Vec<Utf8PathBuf>,
    pub tables: Vec<Utf8PathBuf>,
}

/// Compute every chart and the leaderboard.
pub fn build_report(snapshot: &Snapshot, options: &ReportOptions) -> Result<Report> {
    let end = month_start(options.now.date());
    let start = if options.months == 0 {
        earliest_event(snapshot).map_or(end, month_start).min(end)
    } else {
        months_before(end, options.months - 1)
    };
    let ticks = month_ticks(start, end);
    let members = MembershipSet::new(snapshot.org_members.iter().map(|m| m.id));

    info!(
        %start,
        %end,
        members = snapshot.org_members.len(),
        "building report"
    );

    let window = MonthWindow {
        start,
        ticks: &ticks,
    };
    let charts: Vec<Chart> = vec![
        issues_chart(&snapshot.issues, &window)?,
        pull_requests_chart(&snapshot.issues, &members, &window)?,
    ]
    .into_iter()
    .chain(contributor_charts(&snapshot.commits, &members, &window)?)
    .chain([
        window.chart(
            DISCUSSIONS,
            "Discussions",
            vec![Series::new(
                "Created",
                window.counts(&snapshot.discussions, |d| Some(d.created_at)),
            )],
        )?,
        window.chart(
            STARGAZERS,
            "Stargazers",
            vec![Series::new(
                "Total",
                window.running_total(&snapshot.stargazers, |s| Some(s.starred_at)),
            )],
        )?,
        window.chart(
            COMMITS,
            "Commits",
            vec![Series::new(
                "Commits",
                window.counts(&snapshot.commits, |c| Some(c.date)),
            )],
        )?,
    ])
    .collect();

    let leaderboard = active_contributors(
        &snapshot.commits,
        &members,
        start,
        next_month(end),
        options.leaderboard_size,
    );

    Ok(Report {
        title: options.title.clone(),
        generated_at: options.now,
        window: (start, end),
        charts,
        leaderboard,
    })
}

fn earliest_event(snapshot: &Snapshot) -> Option<NaiveDate> {
    let commits = snapshot.commits.iter().map(|c| c.date);
    let issues = snapshot.issues.iter().map(|i| i.created_at);
    let discussions = snapshot.discussions.iter().map(|d| d.created_at);
    let stars = snapshot.stargazers.iter().map(|s| s.starred_at);
    commits
        .chain(issues)
        .chain(discussions)
        .chain(stars)
        .min()
        .map(|ts| ts.date())
}

struct MonthWindow<'a> {
    start: NaiveDate,
    ticks: &'a [NaiveDate],
}

impl MonthWindow<'_> {
    fn counts<T>(&self, rows: &[T], timestamp: impl Fn(&T) -> Option<NaiveDateTime>) -> Vec<u64> {
        align(&bucket_by_month(rows, timestamp), self.ticks)
    }

    /// Running total including everything before the window.
    fn running_total<T>(
        &self,
        rows: &[T],
        timestamp: impl Fn(&T) -> Option<NaiveDateTime>,
    ) -> Vec<u64> {
        let buckets = bucket_by_month(rows, timestamp);
        let base = total_before(&buckets, self.start);
        cumulative(&align(&buckets, self.ticks))
            .into_iter()
            .map(|total| total + base)
            .collect()
    }

    fn chart(&self, slug: &'static str, title: &str, series: Vec<Series>) -> Result<Chart> {
        Chart::new(slug, title, self.ticks.to_vec(), series)
            .with_context(|| format!("failed to build chart '{}'", slug))
    }
}

fn issues_chart(issues: &[Issue], window: &MonthWindow<'_>) -> Result<Chart> {
    let opened: Vec<Issue> = issues.iter().filter(|i| !i.is_pr).cloned().collect();
    let closed: Vec<Issue> = opened
        .iter()
        .filter(|i| i.state == IssueState::Closed)
        .cloned()
        .collect();

    window.chart(
        ISSUES,
        "Issues",
        vec![
            Series::new("Opened", window.counts(&opened, |i| Some(i.created_at))),
            Series::new("Closed", window.counts(&closed, |i| i.closed_at)),
        ],
    )
}

fn pull_requests_chart(
    issues: &[Issue],
    members: &MembershipSet,
    window: &MonthWindow<'_>,
) -> Result<Chart> {
    let pulls: Vec<Issue> = issues.iter().filter(|i| i.is_pr).cloned().collect();
    let (by_maintainers, by_others) = partition_by_membership(&pulls, members, |i| Some(i.user_id));
    let closed: Vec<Issue> = pulls
        .iter()
        .filter(|i| i.state == IssueState::Closed)
        .cloned()
        .collect();

    window.chart(
        PULL_REQUESTS,
        "Pull Requests",
        vec![
            Series::new(
                "Opened by maintainers",
                window.counts(&by_maintainers, |i| Some(i.created_at)),
            ),
            Series::new(
                "Opened by non-maintainers",
                window.counts(&by_others, |i| Some(i.created_at)),
            ),
            Series::new("Closed", window.counts(&closed, |i| i.closed_at)),
        ],
    )
}

fn contributor_charts(
    commits: &[Commit],
    members: &MembershipSet,
    window: &MonthWindow<'_>,
) -> Result<[Chart; 2]> {
    let authored: Vec<Commit> = commits
        .iter()
        .filter(|c| c.user_id.is_some())
        .cloned()
        .collect();
    let first_commits = first_event_per_actor(&authored, |c| c.user_id, |c| c.date);
    let (_, external) = partition_by_membership(&first_commits, members, |c| c.user_id);

    Ok([
        window.chart(
            CONTRIBUTORS,
            "Contributors (excluding maintainers)",
            vec![Series::new(
                "New contributors",
                window.counts(&external, |c| Some(c.date)),
            )],
        )?,
        window.chart(
            TOTAL_CONTRIBUTORS,
            "Total Contributors (excluding maintainers)",
            vec![Series::new(
                "Total",
                window.running_total(&external, |c| Some(c.date)),
            )],
        )?,
    ])
}

/// Authors ranked by commits made in `[from, until)`.
fn active_contributors(
    commits: &[Commit],
    members: &MembershipSet,
    from: NaiveDate,
    until: NaiveDate,
    limit: usize,
) -> Vec<LeaderboardEntry> {
    let mut by_user: HashMap<i64, LeaderboardEntry> = HashMap::new();
    for commit in commits {
        let Some(user_id) = commit.user_id else {
            continue;
        };
        let day = commit.date.date();
        if day < from || day >= until {
            continue;
        }
        by_user
            .entry(user_id)
            .or_insert_with(|| LeaderboardEntry {
                user_id,
                login: commit.user_login.clone(),
                commits: 0,
                maintainer: members.contains(user_id),
            })
            .commits += 1;
    }

    let mut entries: Vec<LeaderboardEntry> = by_user.into_values().collect();
    entries.sort_by(|a, b| b.commits.cmp(&a.commits).then_with(|| a.login.cmp(&b.login)));
    entries.truncate(limit);
    entries
}

/// Write `report` under `output_dir`, replacing anything already there.
pub fn write_report(
    report: &Report,
    output_dir: &Utf8Path,
    renderer: &dyn ChartRenderer,
) -> Result<ReportArtifacts> {
    if output_dir.as_std_path().exists() {
        fs::remove_dir_all(output_dir.as_std_path())
            .with_context(|| format!("failed to remove {}", output_dir))?;
    }

    let plots_dir = output_dir.join("assets").join("plots");
    let data_dir = output_dir.join("assets").join("data");
    let tables_dir = output_dir.join("assets").join("tables");
    for dir in [&plots_dir, &data_dir, &tables_dir] {
        fs::create_dir_all(dir.as_std_path())
            .with_context(|| format!("failed to create output directory at {}", dir))?;
    }

    let mut artifacts = ReportArtifacts {
        index: output_dir.join("index.html"),
        charts: Vec::new(),
        data: Vec::new(),
        tables: Vec::new(),
    };

    for chart in &report.charts {
        let plot_path = plots_dir.join(format!("{}.{}", chart.slug, renderer.extension()));
        renderer.render(chart, &plot_path)?;
        info!(path = %plot_path, "wrote chart");
        artifacts.charts.push(plot_path);

        let data_path = data_dir.join(format!("{}.json", chart.slug));
        let json = serde_json::to_string_pretty(chart)?;
        fs::write(data_path.as_std_path(), json)
            .with_context(|| format!("failed to write {}", data_path))?;
        artifacts.data.push(data_path);
    }

    let table_path = tables_dir.join(format!("{}.html", ACTIVE_CONTRIBUTORS));
    fs::write(table_path.as_std_path(), leaderboard_page(report).into_string())
        .with_context(|| format!("failed to write {}", table_path))?;
    info!(path = %table_path, "wrote leaderboard");
    artifacts.tables.push(table_path);

    let relative = |path: &Utf8Path| -> Result<String> {
        Ok(path
            .strip_prefix(output_dir)
            .with_context(|| format!("{} is outside {}", path, output_dir))?
            .as_str()
            .replace('\\', "/"))
    };
    let figures = report
        .charts
        .iter()
        .zip(&artifacts.charts)
        .map(|(chart, path)| Ok((chart.title.clone(), relative(path)?)))
        .collect::<Result<Vec<_>>>()?;
    let tables = artifacts
        .tables
        .iter()
        .map(|path| relative(path))
        .collect::<Result<Vec<_>>>()?;

    fs::write(
        artifacts.index.as_std_path(),
        index_page(report, &figures, &tables).into_string(),
    )
    .with_context(|| format!("failed to write {}", artifacts.index))?;
    info!(path = %artifacts.index, "wrote index");

    Ok(artifacts)
}

fn index_page(report: &Report, figures: &[(String, String)], tables: &[String]) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (report.title) " - Repository Status" }
                style { (PreEscaped(PAGE_STYLE)) }
            }
            body {
                header {
                    h1 { (report.title) " Repository Status" }
                    p.badge {
                        "Updated at " (report.generated_at.format("%Y-%m-%d %H:%M:%S"))
                        " · " (report.window.0.format("%Y-%m")) " to " (report.window.1.format("%Y-%m"))
                    }
                }
                @for row in figures.chunks(2) {
                    div.row {
                        @for (title, src) in row {
                            figure {
                                img src=(src) alt=(title);
                            }
                        }
                    }
                }
                @for src in tables {
                    section {
                        h2 { "Active Contributors" }
                        iframe src=(src) {}
                    }
                }
            }
        }
    }
}

fn leaderboard_page(report: &Report) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                title { (report.title) " - Active Contributors" }
                style { (PreEscaped(PAGE_STYLE)) }
            }
            body {
                table {
                    thead {
                        tr {
                            th { "#" }
                            th { "Contributor" }
                            th { "Commits" }
                        }
                    }
                    tbody {
                        @for (rank, entry) in report.leaderboard.iter().enumerate() {
                            tr {
                                td { (rank + 1) }
                                td {
                                    a href=(entry.profile_url()) target="_blank" {
                                        img src=(entry.avatar_url()) alt=(entry.login) width="32" height="32";
                                        (entry.login)
                                    }
                                    @if entry.maintainer {
                                        " "
                                        span.badge { "maintainer" }
                                    }
                                }
                                td { (entry.commits) }
                            }
                        }
                    }
                }
            }
        }
    }
}
