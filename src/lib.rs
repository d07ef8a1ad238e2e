// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Activity collector and report generator for a GitHub repository.

pub mod aggregate;
pub mod charts;
pub mod commands;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod github;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod query;
pub mod report;
