// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Logging setup.

use tracing_subscriber::{EnvFilter, fmt};

/// Install a stderr subscriber filtered by `RUST_LOG`, falling back to
/// `default_level`. Does nothing if a subscriber is already installed.
pub fn init_logging(default_level: &str) {
    if tracing::dispatcher::has_been_set() {
        return;
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
