// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the extract and aggregation stages.
//!
//! Every error here is fatal for the current run. Records that are malformed
//! in an anticipated way (a stargazer whose account was deleted, say) are not
//! errors at all: the normalizer drops them and logs at debug level.

use thiserror::Error;

/// Required configuration is absent or unreadable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be set")]
    MissingToken { var: &'static str },

    #[error("failed to build HTTP client")]
    HttpClient(#[source] reqwest::Error),
}

/// A request to the upstream API did not produce usable data.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {endpoint} failed")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned status {status}: {body}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("failed to decode response from {endpoint}")]
    Decode {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned unexpected payload: {reason}")]
    Shape { endpoint: String, reason: String },

    #[error("GraphQL query failed: {message}")]
    Graphql { message: String },
}

/// A raw record could not be turned into an entity.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to parse {field} timestamp '{value}'")]
    Timestamp {
        field: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("{entity} record is missing required field {field}")]
    MissingField {
        entity: &'static str,
        field: &'static str,
    },

    #[error("malformed {entity} record")]
    Payload {
        entity: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// An aggregation was asked for a result that is undefined for its input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregateError {
    #[error("{operation} requires at least one value")]
    EmptyInput { operation: &'static str },
}
