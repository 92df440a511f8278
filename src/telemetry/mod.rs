// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging setup.
//!
//! Arbiter logs through `tracing`. Initialize once at startup:
//!
//! ```rust,ignore
//! use arbiter::telemetry::{init_telemetry, TelemetryConfig};
//!
//! init_telemetry(&TelemetryConfig::from_verbosity(1))?;
//! ```
//!
//! Git invocations and session driving carry `#[instrument]` spans when the
//! `telemetry` feature is enabled (the default). Levels follow one rule:
//! `info` for lifecycle transitions, `debug` for git commands, `warn` for
//! best-effort steps that failed, `error` for failed sessions.

mod init;

pub use init::{init_telemetry, TelemetryConfig};
