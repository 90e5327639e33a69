// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging and metrics.
//!
//! - **Logging**: `tracing` events routed through a `tracing-subscriber`
//!   registry with an `EnvFilter` (`FLOTILLA_LOG`, then `RUST_LOG`, then the preset level)
//! - **Metrics**: operation latencies and spawn outcome counters, recorded
//!   only when the `telemetry` feature is on
//!
//! ```rust,ignore
//! use flotilla::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::production())?;
//! ```

mod init;
pub mod metrics;

pub use init::{init_telemetry, LogFormat, TelemetryConfig, TelemetryGuard, LOG_ENV};
pub use metrics::{
    Histogram, Metrics, MetricsSnapshot, OperationMetrics, SpawnOutcome, GLOBAL_METRICS,
};
