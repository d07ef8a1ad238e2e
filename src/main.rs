// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Activity collector and report generator for a GitHub repository.

use repo_stats_collector::{dispatch, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging("info");
    dispatch::dispatch().await
}
