//! `groundtex-runtime` – The Capture Loop
//!
//! Drives a camera through a trajectory and turns each stop into one dataset
//! record.
//!
//! # Modules
//!
//! - [`follower`] – [`TrajectoryFollower`][follower::TrajectoryFollower]:
//!   the per-waypoint `Commanding → AwaitingConvergence → Synchronizing →
//!   Writing` state machine, wiring together a
//!   [`PoseService`][groundtex_middleware::PoseService], the
//!   [`DataSynchronizer`][groundtex_middleware::DataSynchronizer] and the
//!   [`DataWriter`][groundtex_dataset::DataWriter].
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export
//!   to Jaeger, Grafana Tempo, or any OTLP-compatible collector.

pub mod follower;
pub mod telemetry;

pub use follower::{CaptureReport, CaptureStage, FollowerConfig, TrajectoryFollower};
pub use telemetry::{TracerProviderGuard, init_tracing};
