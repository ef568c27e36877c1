// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/config/mod.rs
pub mod experiment_config;

pub use experiment_config::{
    ExperimentConfig, ServingOptions, StorageConfig, TrackerConfig, TrainingOverrides,
};

/// Convert YAML to JSON - utility for CLI validation
pub fn yaml_to_json(yaml_str: &str) -> anyhow::Result<String> {
    let yaml_value: serde_yaml::Value = serde_yaml::from_str(yaml_str)
        .map_err(|e| anyhow::anyhow!("Failed to parse YAML: {}", e))?;
    serde_json::to_string_pretty(&yaml_value)
        .map_err(|e| anyhow::anyhow!("Failed to convert to JSON: {}", e))
}
