// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversion of raw GitHub payloads into snapshot entities.
//!
//! Each entity implements [`FromGithub`], which either builds one entity from
//! one raw record, declines the record (it is then dropped from the batch),
//! or fails the whole batch with a [`ParseError`].

use crate::error::ParseError;
use crate::models::{Commit, Discussion, Issue, IssueState, OrgMember, Stargazer, User};
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// Timestamp format used by every GitHub payload field we read.
pub const WIRE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Parse a timestamp in [`WIRE_TIMESTAMP_FORMAT`].
pub fn parse_timestamp(field: &'static str, value: &str) -> Result<NaiveDateTime, ParseError> {
    NaiveDateTime::parse_from_str(value, WIRE_TIMESTAMP_FORMAT).map_err(|source| {
        ParseError::Timestamp {
            field,
            value: value.to_string(),
            source,
        }
    })
}

/// Construct-or-skip conversion from one raw API record.
pub trait FromGithub: Sized {
    /// Entity name used in errors and logs.
    const ENTITY: &'static str;

    /// Build the entity, or return `Ok(None)` to drop the record.
    fn from_gh_object(raw: &Value) -> Result<Option<Self>, ParseError>;

    /// The account embedded in the record, if any.
    fn embedded_user(_raw: &Value) -> Option<User> {
        None
    }

    /// Convert a batch, preserving order and omitting dropped records.
    fn from_gh_objects<'a, I>(raws: I) -> Result<Vec<Self>, ParseError>
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut entities = Vec::new();
        for raw in raws {
            match Self::from_gh_object(raw)? {
                Some(entity) => entities.push(entity),
                None => debug!(entity = Self::ENTITY, "skipping record"),
            }
        }
        Ok(entities)
    }
}

fn decode<'a, T: Deserialize<'a>>(entity: &'static str, raw: &'a Value) -> Result<T, ParseError> {
    T::deserialize(raw).map_err(|source| ParseError::Payload { entity, source })
}

fn required<T>(entity: &'static str, field: &'static str, value: Option<T>) -> Result<T, ParseError> {
    value.ok_or(ParseError::MissingField { entity, field })
}

#[derive(Debug, Deserialize)]
struct AccountPayload {
    id: i64,
    login: String,
}

impl From<AccountPayload> for User {
    fn from(account: AccountPayload) -> Self {
        User {
            id: account.id,
            login: account.login,
        }
    }
}

// Commit authors can be null, or an empty object for unlinked accounts.
#[derive(Debug, Default, Deserialize)]
struct LinkedAuthorPayload {
    id: Option<i64>,
    login: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommitPayload {
    sha: String,
    url: String,
    html_url: String,
    #[serde(default)]
    author: Option<LinkedAuthorPayload>,
    commit: GitCommitPayload,
}

#[derive(Debug, Deserialize)]
struct GitCommitPayload {
    #[serde(default)]
    author: Option<GitActorPayload>,
    #[serde(default)]
    committer: Option<GitActorPayload>,
}

#[derive(Debug, Default, Deserialize)]
struct GitActorPayload {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IssuePayload {
    id: i64,
    number: i64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    state: IssueState,
    user: AccountPayload,
    #[serde(default)]
    closed_at: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    html_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscussionPayload {
    id: String,
    number: i64,
    url: String,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StargazerPayload {
    #[serde(default)]
    starred_at: Option<String>,
    #[serde(default)]
    user: Option<AccountPayload>,
}

impl FromGithub for User {
    const ENTITY: &'static str = "user";

    fn from_gh_object(raw: &Value) -> Result<Option<Self>, ParseError> {
        let account: AccountPayload = decode(Self::ENTITY, raw)?;
        Ok(Some(account.into()))
    }
}

impl FromGithub for OrgMember {
    const ENTITY: &'static str = "org member";

    fn from_gh_object(raw: &Value) -> Result<Option<Self>, ParseError> {
        let account: AccountPayload = decode(Self::ENTITY, raw)?;
        Ok(Some(OrgMember {
            id: account.id,
            login: account.login,
        }))
    }
}

impl FromGithub for Commit {
    const ENTITY: &'static str = "commit";

    fn from_gh_object(raw: &Value) -> Result<Option<Self>, ParseError> {
        let payload: CommitPayload = decode(Self::ENTITY, raw)?;
        let linked = payload.author.unwrap_or_default();
        let git_author = payload.commit.author.unwrap_or_default();
        let committer = required(Self::ENTITY, "commit.committer", payload.commit.committer)?;
        let date = required(Self::ENTITY, "commit.committer.date", committer.date)?;

        Ok(Some(Commit {
            id: payload.sha,
            html_url: payload.html_url,
            url: payload.url,
            user_id: linked.id,
            user_name: git_author.name.unwrap_or_default(),
            user_login: linked.login.unwrap_or_default(),
            user_email: git_author.email.unwrap_or_default(),
            date: parse_timestamp("commit.committer.date", &date)?,
        }))
    }

    fn embedded_user(raw: &Value) -> Option<User> {
        let author: LinkedAuthorPayload = raw
            .get("author")
            .and_then(|a| LinkedAuthorPayload::deserialize(a).ok())?;
        Some(User {
            id: author.id?,
            login: author.login?,
        })
    }
}

impl FromGithub for Issue {
    const ENTITY: &'static str = "issue";

    fn from_gh_object(raw: &Value) -> Result<Option<Self>, ParseError> {
        let payload: IssuePayload = decode(Self::ENTITY, raw)?;
        let created_at = required(Self::ENTITY, "created_at", payload.created_at)?;
        let updated_at = required(Self::ENTITY, "updated_at", payload.updated_at)?;
        let closed_at = payload
            .closed_at
            .as_deref()
            .map(|value| parse_timestamp("closed_at", value))
            .transpose()?;

        Ok(Some(Issue {
            id: payload.id,
            user_id: payload.user.id,
            number: payload.number,
            title: payload.title,
            body: payload.body,
            state: payload.state,
            closed_at,
            created_at: parse_timestamp("created_at", &created_at)?,
            updated_at: parse_timestamp("updated_at", &updated_at)?,
            html_url: payload.html_url,
            // The issues endpoint marks pull requests only by this key's presence.
            is_pr: raw.get("pull_request").is_some(),
        }))
    }

    fn embedded_user(raw: &Value) -> Option<User> {
        raw.get("user")
            .and_then(|u| AccountPayload::deserialize(u).ok())
            .map(User::from)
    }
}

impl FromGithub for Discussion {
    const ENTITY: &'static str = "discussion";

    fn from_gh_object(raw: &Value) -> Result<Option<Self>, ParseError> {
        let payload: DiscussionPayload = decode(Self::ENTITY, raw)?;
        let created_at = required(Self::ENTITY, "createdAt", payload.created_at)?;
        let updated_at = required(Self::ENTITY, "updatedAt", payload.updated_at)?;

        Ok(Some(Discussion {
            id: payload.id,
            number: payload.number,
            url: payload.url,
            title: payload.title,
            body: payload.body.unwrap_or_default(),
            created_at: parse_timestamp("createdAt", &created_at)?,
            updated_at: parse_timestamp("updatedAt", &updated_at)?,
        }))
    }
}

impl FromGithub for Stargazer {
    const ENTITY: &'static str = "stargazer";

    fn from_gh_object(raw: &Value) -> Result<Option<Self>, ParseError> {
        let payload: StargazerPayload = decode(Self::ENTITY, raw)?;
        // Deleted accounts come back with a null user.
        let Some(user) = payload.user else {
            return Ok(None);
        };
        let starred_at = required(Self::ENTITY, "starred_at", payload.starred_at)?;

        Ok(Some(Stargazer {
            id: None,
            starred_at: parse_timestamp("starred_at", &starred_at)?,
            user_id: user.id,
        }))
    }

    fn embedded_user(raw: &Value) -> Option<User> {
        raw.get("user")
            .and_then(|u| AccountPayload::deserialize(u).ok())
            .map(User::from)
    }
}

/// Distinct users in first-seen order.
#[derive(Debug, Default)]
pub struct UserRegistry {
    users: Vec<User>,
    seen: HashSet<i64>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user unless one with the same id is already present.
    pub fn insert(&mut self, user: User) -> bool {
        if !self.seen.insert(user.id) {
            return false;
        }
        self.users.push(user);
        true
    }

    pub fn extend(&mut self, users: impl IntoIterator<Item = User>) {
        for user in users {
            self.insert(user);
        }
    }

    /// Register the account embedded in each raw record of type `T`.
    pub fn register_embedded<'a, T: FromGithub>(&mut self, raws: impl IntoIterator<Item = &'a Value>) {
        self.extend(raws.into_iter().filter_map(T::embedded_user));
    }

    pub fn into_users(self) -> Vec<User> {
        self.users
    }
}

/// Union of several member lists, deduplicated by id in first-seen order.
pub fn union_members(groups: impl IntoIterator<Item = Vec<OrgMember>>) -> Vec<OrgMember> {
    let mut seen = HashSet::new();
    groups
        .into_iter()
        .flatten()
        .filter(|member| seen.insert(member.id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn ts(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    fn commit_json(author: Value) -> Value {
        json!({
            "sha": "0123456789abcdef0123456789abcdef01234567",
            "url": "https://api.github.com/repos/octo/widgets/commits/0123",
            "html_url": "https://github.com/octo/widgets/commit/0123",
            "author": author,
            "commit": {
                "author": { "name": "Ada", "email": "ada@example.com", "date": "2023-01-04T10:00:00Z" },
                "committer": { "name": "GitHub", "email": "noreply@github.com", "date": "2023-01-05T12:30:00Z" }
            }
        })
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(
            parse_timestamp("date", "2023-01-05T12:30:45Z").unwrap(),
            ts(2023, 1, 5, 12, 30, 45)
        );

        let err = parse_timestamp("date", "2023-01-05 12:30:45").unwrap_err();
        assert!(matches!(err, ParseError::Timestamp { field: "date", .. }));
    }

    #[test]
    fn test_commit_with_linked_author() {
        let raw = commit_json(json!({ "id": 42, "login": "ada" }));
        let commit = Commit::from_gh_object(&raw).unwrap().unwrap();

        assert_eq!(commit.id, "0123456789abcdef0123456789abcdef01234567");
        assert_eq!(commit.user_id, Some(42));
        assert_eq!(commit.user_login, "ada");
        assert_eq!(commit.user_name, "Ada");
        assert_eq!(commit.user_email, "ada@example.com");
        // The committer date is the one recorded.
        assert_eq!(commit.date, ts(2023, 1, 5, 12, 30, 0));
        assert_eq!(
            Commit::embedded_user(&raw),
            Some(User {
                id: 42,
                login: "ada".to_string()
            })
        );
    }

    #[test]
    fn test_commit_without_author_is_kept() {
        for author in [Value::Null, json!({})] {
            let raw = commit_json(author);
            let commit = Commit::from_gh_object(&raw).unwrap().unwrap();
            assert_eq!(commit.user_id, None);
            assert_eq!(commit.user_login, "");
            assert_eq!(commit.user_name, "Ada");
            assert_eq!(Commit::embedded_user(&raw), None);
        }
    }

    #[test]
    fn test_commit_missing_date_fails() {
        let mut raw = commit_json(Value::Null);
        raw["commit"]["committer"] = json!({ "name": "GitHub" });

        let err = Commit::from_gh_objects([&raw]).unwrap_err();
        assert!(matches!(
            err,
            ParseError::MissingField {
                entity: "commit",
                field: "commit.committer.date"
            }
        ));
    }

    fn issue_json(id: i64, extra: Value) -> Value {
        let mut raw = json!({
            "id": id,
            "number": id + 1000,
            "title": "Crash on startup",
            "body": null,
            "state": "closed",
            "user": { "id": 7, "login": "grace" },
            "closed_at": "2023-02-01T00:00:00Z",
            "created_at": "2023-01-20T08:00:00Z",
            "updated_at": "2023-02-01T00:00:00Z",
            "html_url": "https://github.com/octo/widgets/issues/1",
        });
        if let (Some(obj), Value::Object(extra)) = (raw.as_object_mut(), extra) {
            obj.extend(extra);
        }
        raw
    }

    #[test]
    fn test_issue_and_pull_request() {
        let issue = Issue::from_gh_object(&issue_json(1, json!({}))).unwrap().unwrap();
        assert!(!issue.is_pr);
        assert_eq!(issue.user_id, 7);
        assert_eq!(issue.state, IssueState::Closed);
        assert_eq!(issue.body, None);
        assert_eq!(issue.closed_at, Some(ts(2023, 2, 1, 0, 0, 0)));

        let pr = Issue::from_gh_object(&issue_json(2, json!({ "pull_request": { "url": "x" } })))
            .unwrap()
            .unwrap();
        assert!(pr.is_pr);
    }

    #[test]
    fn test_open_issue_without_closed_at() {
        let raw = issue_json(3, json!({ "state": "open", "closed_at": null }));
        let issue = Issue::from_gh_object(&raw).unwrap().unwrap();
        assert_eq!(issue.state, IssueState::Open);
        assert_eq!(issue.closed_at, None);
    }

    #[test]
    fn test_issue_unknown_state_fails() {
        let raw = issue_json(4, json!({ "state": "merged" }));
        let err = Issue::from_gh_object(&raw).unwrap_err();
        assert!(matches!(err, ParseError::Payload { entity: "issue", .. }));
    }

    #[test]
    fn test_discussion() {
        let raw = json!({
            "id": "D_kwDOA",
            "number": 12,
            "url": "https://github.com/octo/widgets/discussions/12",
            "title": "Roadmap",
            "body": "Thoughts?",
            "createdAt": "2023-03-01T09:00:00Z",
            "updatedAt": "2023-03-02T09:00:00Z",
        });
        let discussion = Discussion::from_gh_object(&raw).unwrap().unwrap();
        assert_eq!(discussion.id, "D_kwDOA");
        assert_eq!(discussion.created_at, ts(2023, 3, 1, 9, 0, 0));
        assert_eq!(discussion.updated_at, ts(2023, 3, 2, 9, 0, 0));
    }

    #[test]
    fn test_stargazers_skip_deleted_users() {
        let raws = vec![
            json!({ "starred_at": "2023-01-01T00:00:00Z", "user": { "id": 1, "login": "a" } }),
            json!({ "starred_at": "2023-01-02T00:00:00Z", "user": null }),
            json!({ "starred_at": "2023-01-03T00:00:00Z", "user": { "id": 3, "login": "c" } }),
        ];

        let stargazers = Stargazer::from_gh_objects(&raws).unwrap();
        let user_ids: Vec<_> = stargazers.iter().map(|s| s.user_id).collect();
        assert_eq!(user_ids, vec![1, 3]);
        assert!(stargazers.iter().all(|s| s.id.is_none()));

        let mut registry = UserRegistry::new();
        registry.register_embedded::<Stargazer>(&raws);
        assert_eq!(registry.into_users().len(), 2);
    }

    #[test]
    fn test_user_registry_dedupes_by_id() {
        let mut registry = UserRegistry::new();
        assert!(registry.insert(User { id: 1, login: "a".into() }));
        assert!(registry.insert(User { id: 2, login: "b".into() }));
        assert!(!registry.insert(User { id: 1, login: "a-renamed".into() }));

        let users = registry.into_users();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].login, "a");
    }

    #[test]
    fn test_union_members() {
        let member = |id: i64| OrgMember {
            id,
            login: format!("user{id}"),
        };
        let org = vec![member(1), member(2)];
        let collaborators = vec![member(2), member(3), member(3)];

        let ids: Vec<_> = union_members([org, collaborators])
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
