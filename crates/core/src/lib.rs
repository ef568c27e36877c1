// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Core library for mnist-lab ─ experiment config, tracking, metrics and serving config.

pub mod config;
pub mod metrics;
pub mod serving;
pub mod tracker;

pub use config::{ExperimentConfig, StorageConfig, TrackerConfig, TrainingOverrides};
pub use metrics::{EpochMetrics, TrainingSummary};
pub use serving::{DataType, Platform, ServingConfig, TensorSpec};
pub use tracker::{ExperimentTracker, JsonlSink, LogSink, MemorySink, RunInfo, TrackerEvent, TrackerSink};
