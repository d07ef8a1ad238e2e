// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Snapshot store.
//!
//! A snapshot is rebuilt from scratch on every collect run: the previous
//! database file is deleted, the schema is recreated and each entity type is
//! bulk inserted. Readers only ever scan whole tables.

use crate::models::{Commit, Discussion, Issue, IssueState, OrgMember, Stargazer, User};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Statement, params};

/// Format of timestamp columns.
pub const STORE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Every table in a snapshot, parents first.
pub const SNAPSHOT_TABLES: &[&str] = &[
    "users",
    "org_members",
    "commits",
    "issues",
    "discussions",
    "stargazers",
];

/// Where a snapshot for `path` is built before it replaces `path`.
pub fn staging_path(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{}.tmp", path))
}

/// Remove the database file at `path` along with its WAL side files.
fn remove_snapshot_files(path: &Utf8Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let file = format!("{}{}", path, suffix);
        match std::fs::remove_file(&file) {
            Ok(()) => tracing::info!(path = %file, "removed snapshot file"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("failed to remove {}", file));
            }
        }
    }
    Ok(())
}

/// Delete any snapshot at `path` and create an empty one.
pub fn create_snapshot(path: &Utf8Path) -> Result<Connection> {
    remove_snapshot_files(path)?;

    let conn = Connection::open(path.as_std_path())
        .with_context(|| format!("failed to open database at {}", path))?;
    configure(&conn)?;
    rebuild(&conn)?;
    Ok(conn)
}

/// Close the snapshot built at `staging` and move it over `target`.
///
/// Until this returns, readers of `target` keep seeing the previous snapshot.
pub fn publish_snapshot(conn: Connection, staging: &Utf8Path, target: &Utf8Path) -> Result<()> {
    conn.close()
        .map_err(|(_, err)| err)
        .with_context(|| format!("failed to close {}", staging))?;

    remove_snapshot_files(target)?;
    std::fs::rename(staging.as_std_path(), target.as_std_path())
        .with_context(|| format!("failed to move {} to {}", staging, target))?;
    remove_snapshot_files(staging)?;

    tracing::info!(path = %target, "published snapshot");
    Ok(())
}

/// Delete a partially built snapshot.
pub fn discard_snapshot(staging: &Utf8Path) -> Result<()> {
    remove_snapshot_files(staging)
}

/// Open an existing snapshot for reading.
pub fn open_snapshot(path: &Utf8Path) -> Result<Connection> {
    if !path.as_std_path().exists() {
        anyhow::bail!("no snapshot at {}; run `collect` first", path);
    }

    let conn = Connection::open(path.as_std_path())
        .with_context(|| format!("failed to open database at {}", path))?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    // journal_mode and synchronous persist in the file; the rest are
    // per-connection.
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -64000;
        PRAGMA temp_store = MEMORY;
        "#,
    )
    .context("failed to set database pragmas")
}

/// Drop and recreate every snapshot table.
pub fn rebuild(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS stargazers;
        DROP TABLE IF EXISTS discussions;
        DROP TABLE IF EXISTS issues;
        DROP TABLE IF EXISTS commits;
        DROP TABLE IF EXISTS org_members;
        DROP TABLE IF EXISTS users;

        CREATE TABLE users (
            id INTEGER PRIMARY KEY,
            login TEXT NOT NULL UNIQUE
        );

        -- Organization members and repository collaborators
        CREATE TABLE org_members (
            id INTEGER PRIMARY KEY,
            login TEXT NOT NULL UNIQUE
        );

        CREATE TABLE commits (
            id TEXT PRIMARY KEY,             -- 40 character SHA
            html_url TEXT NOT NULL,
            url TEXT NOT NULL,
            user_id INTEGER REFERENCES users(id),  -- NULL for unlinked authors
            user_name TEXT NOT NULL,
            user_login TEXT NOT NULL,
            user_email TEXT NOT NULL,
            date TEXT NOT NULL               -- YYYY-MM-DD HH:MM:SS, UTC
        );

        -- Issues and pull requests
        CREATE TABLE issues (
            id INTEGER NOT NULL,
            user_id INTEGER NOT NULL REFERENCES users(id),
            number INTEGER NOT NULL,
            title TEXT NOT NULL,
            body TEXT,
            state TEXT NOT NULL CHECK (state IN ('open', 'closed')),
            closed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            html_url TEXT NOT NULL,
            is_pr INTEGER NOT NULL,
            PRIMARY KEY (id, user_id)
        ) WITHOUT ROWID;

        CREATE TABLE discussions (
            id TEXT PRIMARY KEY,             -- GraphQL node id
            number INTEGER NOT NULL,
            url TEXT NOT NULL,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE stargazers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            starred_at TEXT NOT NULL,
            user_id INTEGER NOT NULL REFERENCES users(id)
        );

        CREATE INDEX idx_commits_date ON commits(date);
        CREATE INDEX idx_issues_created ON issues(created_at);
        CREATE INDEX idx_stargazers_starred ON stargazers(starred_at);
        "#,
    )
    .context("failed to create snapshot schema")
}

/// An entity type with a table in the snapshot.
pub trait Record: Sized {
    const TABLE: &'static str;
    const INSERT: &'static str;
    const SELECT: &'static str;

    fn insert(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize>;
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Append a batch of one entity type. Returns the number of rows written.
pub fn bulk_insert<T: Record>(conn: &Connection, records: &[T]) -> Result<usize> {
    let mut stmt = conn
        .prepare_cached(T::INSERT)
        .with_context(|| format!("failed to prepare insert into {}", T::TABLE))?;
    for record in records {
        record
            .insert(&mut stmt)
            .with_context(|| format!("failed to insert into {}", T::TABLE))?;
    }
    Ok(records.len())
}

/// Read a whole table.
pub fn scan<T: Record>(conn: &Connection) -> Result<Vec<T>> {
    let mut stmt = conn
        .prepare(T::SELECT)
        .with_context(|| format!("failed to prepare scan of {}", T::TABLE))?;
    let rows = stmt
        .query_map([], |row| T::from_row(row))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("failed to scan {}", T::TABLE))?;
    Ok(rows)
}

/// Number of rows in a snapshot table.
pub fn row_count(conn: &Connection, table: &str) -> Result<u64> {
    if !SNAPSHOT_TABLES.contains(&table) {
        anyhow::bail!("unknown snapshot table '{}'", table);
    }
    let count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
        .with_context(|| format!("failed to count rows in {}", table))?;
    Ok(count as u64)
}

fn timestamp_to_sql(ts: NaiveDateTime) -> String {
    ts.format(STORE_TIMESTAMP_FORMAT).to_string()
}

fn timestamp_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let value: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&value, STORE_TIMESTAMP_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_timestamp_from_row(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDateTime>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => timestamp_from_row(row, idx).map(Some),
        None => Ok(None),
    }
}

impl Record for User {
    const TABLE: &'static str = "users";
    const INSERT: &'static str = "INSERT INTO users (id, login) VALUES (?1, ?2)";
    const SELECT: &'static str = "SELECT id, login FROM users ORDER BY id";

    fn insert(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![self.id, self.login])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            login: row.get(1)?,
        })
    }
}

impl Record for OrgMember {
    const TABLE: &'static str = "org_members";
    const INSERT: &'static str = "INSERT INTO org_members (id, login) VALUES (?1, ?2)";
    const SELECT: &'static str = "SELECT id, login FROM org_members ORDER BY id";

    fn insert(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![self.id, self.login])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(OrgMember {
            id: row.get(0)?,
            login: row.get(1)?,
        })
    }
}

impl Record for Commit {
    const TABLE: &'static str = "commits";
    const INSERT: &'static str = "INSERT INTO commits
         (id, html_url, url, user_id, user_name, user_login, user_email, date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";
    const SELECT: &'static str = "SELECT id, html_url, url, user_id, user_name, user_login, user_email, date
         FROM commits ORDER BY date, id";

    fn insert(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![
            self.id,
            self.html_url,
            self.url,
            self.user_id,
            self.user_name,
            self.user_login,
            self.user_email,
            timestamp_to_sql(self.date),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Commit {
            id: row.get(0)?,
            html_url: row.get(1)?,
            url: row.get(2)?,
            user_id: row.get(3)?,
            user_name: row.get(4)?,
            user_login: row.get(5)?,
            user_email: row.get(6)?,
            date: timestamp_from_row(row, 7)?,
        })
    }
}

impl Record for Issue {
    const TABLE: &'static str = "issues";
    const INSERT: &'static str = "INSERT INTO issues
         (id, user_id, number, title, body, state, closed_at, created_at, updated_at, html_url, is_pr)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";
    const SELECT: &'static str = "SELECT id, user_id, number, title, body, state, closed_at,
                created_at, updated_at, html_url, is_pr
         FROM issues ORDER BY created_at, id";

    fn insert(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![
            self.id,
            self.user_id,
            self.number,
            self.title,
            self.body,
            self.state.as_str(),
            self.closed_at.map(timestamp_to_sql),
            timestamp_to_sql(self.created_at),
            timestamp_to_sql(self.updated_at),
            self.html_url,
            self.is_pr,
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let state: String = row.get(5)?;
        let state = IssueState::parse(&state).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                Type::Text,
                format!("invalid issue state '{}'", state).into(),
            )
        })?;

        Ok(Issue {
            id: row.get(0)?,
            user_id: row.get(1)?,
            number: row.get(2)?,
            title: row.get(3)?,
            body: row.get(4)?,
            state,
            closed_at: optional_timestamp_from_row(row, 6)?,
            created_at: timestamp_from_row(row, 7)?,
            updated_at: timestamp_from_row(row, 8)?,
            html_url: row.get(9)?,
            is_pr: row.get(10)?,
        })
    }
}

impl Record for Discussion {
    const TABLE: &'static str = "discussions";
    const INSERT: &'static str = "INSERT INTO discussions
         (id, number, url, title, body, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";
    const SELECT: &'static str = "SELECT id, number, url, title, body, created_at, updated_at
         FROM discussions ORDER BY created_at, id";

    fn insert(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![
            self.id,
            self.number,
            self.url,
            self.title,
            self.body,
            timestamp_to_sql(self.created_at),
            timestamp_to_sql(self.updated_at),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Discussion {
            id: row.get(0)?,
            number: row.get(1)?,
            url: row.get(2)?,
            title: row.get(3)?,
            body: row.get(4)?,
            created_at: timestamp_from_row(row, 5)?,
            updated_at: timestamp_from_row(row, 6)?,
        })
    }
}

impl Record for Stargazer {
    const TABLE: &'static str = "stargazers";
    const INSERT: &'static str = "INSERT INTO stargazers (id, starred_at, user_id) VALUES (?1, ?2, ?3)";
    const SELECT: &'static str = "SELECT id, starred_at, user_id FROM stargazers ORDER BY starred_at, id";

    fn insert(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![self.id, timestamp_to_sql(self.starred_at), self.user_id])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Stargazer {
            id: row.get(0)?,
            starred_at: timestamp_from_row(row, 1)?,
            user_id: row.get(2)?,
        })
    }
}

/// Every table of a snapshot, loaded into memory.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub users: Vec<User>,
    pub org_members: Vec<OrgMember>,
    pub commits: Vec<Commit>,
    pub issues: Vec<Issue>,
    pub discussions: Vec<Discussion>,
    pub stargazers: Vec<Stargazer>,
}

impl Snapshot {
    pub fn load(conn: &Connection) -> Result<Self> {
        Ok(Self {
            users: scan(conn)?,
            org_members: scan(conn)?,
            commits: scan(conn)?,
            issues: scan(conn)?,
            discussions: scan(conn)?,
            stargazers: scan(conn)?,
        })
    }

    /// Write every table. Users go first so foreign keys resolve.
    pub fn store(&self, conn: &Connection) -> Result<()> {
        bulk_insert(conn, &self.users)?;
        bulk_insert(conn, &self.org_members)?;
        bulk_insert(conn, &self.commits)?;
        bulk_insert(conn, &self.issues)?;
        bulk_insert(conn, &self.discussions)?;
        bulk_insert(conn, &self.stargazers)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn in_memory_snapshot() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    rebuild(&conn)?;
    Ok(conn)
}
