// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query and export of snapshot tables.

use crate::db::{self, SNAPSHOT_TABLES};
use anyhow::{Context, Result};
use camino::Utf8Path;
use rusqlite::Connection;
use rusqlite::types::ValueRef;
use std::{fs::File, io::Write};

pub enum QueryKind {
    Summary,
}

pub enum ExportKind {
    Csv { output: String, table: String },
    Json { output: String, table: String },
}

pub fn run_query(conn: &Connection, query: QueryKind) -> Result<()> {
    match query {
        QueryKind::Summary => query_summary(conn)?,
    }
    Ok(())
}

pub fn run_export(conn: &Connection, export: ExportKind) -> Result<()> {
    match export {
        ExportKind::Csv { output, table } => export_csv(conn, output.as_ref(), &table)?,
        ExportKind::Json { output, table } => export_json(conn, output.as_ref(), &table)?,
    }
    Ok(())
}

/// Row count and time coverage of one table.
#[derive(Debug, PartialEq, Eq)]
pub struct TableSummary {
    pub table: &'static str,
    pub rows: u64,
    /// Earliest and latest value of the table's main timestamp column.
    pub coverage: Option<(String, String)>,
}

/// Timestamp column that dates each row, for tables that have one.
fn timestamp_column(table: &str) -> Option<&'static str> {
    match table {
        "commits" => Some("date"),
        "issues" | "discussions" => Some("created_at"),
        "stargazers" => Some("starred_at"),
        _ => None,
    }
}

pub fn summarize(conn: &Connection) -> Result<Vec<TableSummary>> {
    SNAPSHOT_TABLES
        .iter()
        .map(|&table| {
            let rows = db::row_count(conn, table)?;
            let coverage = match timestamp_column(table) {
                Some(column) => conn
                    .query_row(
                        &format!("SELECT MIN({column}), MAX({column}) FROM {table}"),
                        [],
                        |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
                    )
                    .with_context(|| format!("failed to read coverage of {}", table))?,
                None => (None, None),
            };
            Ok(TableSummary {
                table,
                rows,
                coverage: coverage.0.zip(coverage.1),
            })
        })
        .collect()
}

fn query_summary(conn: &Connection) -> Result<()> {
    println!("\n{:<12} {:>10}  {}", "Table", "Rows", "Coverage");
    println!("{}", "=".repeat(64));

    for summary in summarize(conn)? {
        let coverage = match &summary.coverage {
            Some((first, last)) => format!("{} to {}", first, last),
            None => "-".to_string(),
        };
        println!(
            "{:<12} {:>10}  {}",
            summary.table,
            format_number(summary.rows),
            coverage
        );
    }

    Ok(())
}

/// `SELECT *` over a snapshot table in a stable order.
fn table_query(table: &str) -> Result<String> {
    if !SNAPSHOT_TABLES.contains(&table) {
        anyhow::bail!(
            "Unknown table: {}. Use one of: {}",
            table,
            SNAPSHOT_TABLES.join(", ")
        );
    }
    let order = match timestamp_column(table) {
        Some(column) => format!("{column}, id"),
        None => "id".to_string(),
    };
    Ok(format!("SELECT * FROM {table} ORDER BY {order}"))
}

/// Quote a CSV field if it contains a separator, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn export_csv(conn: &Connection, output: &Utf8Path, table: &str) -> Result<()> {
    let query = table_query(table)?;

    let mut stmt = conn.prepare(&query)?;
    let column_count = stmt.column_count();
    let column_names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut file = File::create(output.as_std_path())
        .with_context(|| format!("failed to create file at {}", output))?;

    writeln!(file, "{}", column_names.join(","))?;

    let rows = stmt.query_map([], |row| {
        let mut values = Vec::new();
        for i in 0..column_count {
            let value = match row.get_ref(i)? {
                ValueRef::Null => String::new(),
                ValueRef::Integer(i) => i.to_string(),
                ValueRef::Real(f) => f.to_string(),
                ValueRef::Text(s) => csv_field(&String::from_utf8_lossy(s)),
                ValueRef::Blob(b) => format!("{:?}", b),
            };
            values.push(value);
        }
        Ok(values)
    })?;

    let mut exported = 0u64;
    for row in rows {
        let values = row?;
        writeln!(file, "{}", values.join(","))?;
        exported += 1;
    }

    println!("Exported {} rows to {}.", format_number(exported), output);
    Ok(())
}

fn export_json(conn: &Connection, output: &Utf8Path, table: &str) -> Result<()> {
    let query = table_query(table)?;

    let mut stmt = conn.prepare(&query)?;
    let column_names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let rows = stmt.query_map([], |row| {
        let mut map = serde_json::Map::new();
        for (i, name) in column_names.iter().enumerate() {
            let value = match row.get_ref(i)? {
                ValueRef::Null => serde_json::Value::Null,
                ValueRef::Integer(n) => serde_json::Value::Number(n.into()),
                ValueRef::Real(f) => serde_json::Number::from_f64(f)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null),
                ValueRef::Text(s) => {
                    serde_json::Value::String(String::from_utf8_lossy(s).into_owned())
                }
                ValueRef::Blob(b) => serde_json::Value::String(format!("{:?}", b)),
            };
            map.insert(name.clone(), value);
        }
        Ok(serde_json::Value::Object(map))
    })?;

    let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    let json = serde_json::to_string_pretty(&records)?;

    let mut file = File::create(output.as_std_path())
        .with_context(|| format!("failed to create file at {}", output))?;
    file.write_all(json.as_bytes())?;

    println!(
        "Exported {} rows to {}.",
        format_number(records.len() as u64),
        output
    );
    Ok(())
}

/// Format a number with thousands separators.
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Snapshot;
    use crate::models::{Commit, Issue, IssueState, User};
    use camino::Utf8PathBuf;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn populated() -> Connection {
        let conn = db::in_memory_snapshot().unwrap();
        let snapshot = Snapshot {
            users: vec![User {
                id: 7,
                login: "octocat".to_string(),
            }],
            commits: vec![
                Commit {
                    id: "a".repeat(40),
                    html_url: String::new(),
                    url: String::new(),
                    user_id: Some(7),
                    user_name: "Octo Cat".to_string(),
                    user_login: "octocat".to_string(),
                    user_email: "octo@example.com".to_string(),
                    date: ts(2023, 4, 2),
                },
                Commit {
                    id: "b".repeat(40),
                    html_url: String::new(),
                    url: String::new(),
                    user_id: None,
                    user_name: String::new(),
                    user_login: String::new(),
                    user_email: String::new(),
                    date: ts(2022, 9, 30),
                },
            ],
            issues: vec![Issue {
                id: 1,
                user_id: 7,
                number: 12,
                title: "Crash, then \"hang\"".to_string(),
                body: None,
                state: IssueState::Open,
                closed_at: None,
                created_at: ts(2023, 1, 1),
                updated_at: ts(2023, 1, 1),
                html_url: String::new(),
                is_pr: false,
            }],
            ..Snapshot::default()
        };
        snapshot.store(&conn).unwrap();
        conn
    }

    #[test]
    fn test_summarize_counts_and_coverage() {
        let conn = populated();
        let summary = summarize(&conn).unwrap();

        assert_eq!(summary.len(), SNAPSHOT_TABLES.len());
        let commits = summary.iter().find(|s| s.table == "commits").unwrap();
        assert_eq!(commits.rows, 2);
        assert_eq!(
            commits.coverage,
            Some((
                "2022-09-30 08:00:00".to_string(),
                "2023-04-02 08:00:00".to_string()
            ))
        );

        let users = summary.iter().find(|s| s.table == "users").unwrap();
        assert_eq!(users.rows, 1);
        assert_eq!(users.coverage, None);

        let stargazers = summary.iter().find(|s| s.table == "stargazers").unwrap();
        assert_eq!(stargazers.rows, 0);
        assert_eq!(stargazers.coverage, None);
    }

    #[test]
    fn test_export_csv_quotes_fields() {
        let conn = populated();
        let dir = tempfile::tempdir().unwrap();
        let output = Utf8PathBuf::try_from(dir.path().join("issues.csv")).unwrap();

        export_csv(&conn, &output, "issues").unwrap();

        let csv = std::fs::read_to_string(&output).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("id,user_id,number,title,body,state,closed_at,created_at,updated_at,html_url,is_pr")
        );
        assert_eq!(
            lines.next(),
            Some(r#"1,7,12,"Crash, then ""hang""",,open,,2023-01-01 08:00:00,2023-01-01 08:00:00,,0"#)
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_export_json_orders_by_timestamp() {
        let conn = populated();
        let dir = tempfile::tempdir().unwrap();
        let output = Utf8PathBuf::try_from(dir.path().join("commits.json")).unwrap();

        export_json(&conn, &output, "commits").unwrap();

        let records: Vec<serde_json::Value> =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["user_id"], serde_json::Value::Null);
        assert_eq!(records[1]["user_login"], "octocat");
    }

    #[test]
    fn test_export_rejects_unknown_table() {
        let conn = populated();
        let err = table_query("sqlite_master").unwrap_err();
        assert!(err.to_string().contains("Unknown table"));

        let dir = tempfile::tempdir().unwrap();
        let output = Utf8PathBuf::try_from(dir.path().join("x.csv")).unwrap();
        assert!(export_csv(&conn, &output, "weekly").is_err());
        assert!(!output.as_std_path().exists());
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
