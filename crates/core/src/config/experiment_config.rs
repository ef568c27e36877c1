// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/config/experiment_config.rs
use anyhow::{Context, Result};
use mnist_lab_storage::S3Settings;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY_ID";
pub const SECRET_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExperimentConfig {
    pub tracker: Option<TrackerConfig>,     // project/task naming, output location
    pub storage: Option<StorageConfig>,     // S3 endpoint, buckets
    pub training: Option<TrainingOverrides>, // hyper-parameters, CLI flags win
    pub serving: Option<ServingOptions>,    // config.pbtxt knobs
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub project_name: String,
    pub task_name: String,
    pub queue_name: Option<String>,
    /// Persist events and artifacts below `output_dir`
    pub output: Option<bool>,
    pub output_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub url: String,
    // Prefer the AWS_* environment variables (or .env) over committing keys here.
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub region: Option<String>,
    pub verify: Option<bool>,
    /// CA bundle (PEM) trusted on top of the system roots
    pub cert: Option<String>,
    pub signature_version: Option<String>,
    pub data_bucket: String,
    pub model_bucket: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingOverrides {
    pub framework: Option<String>, // "torch" | "keras"
    pub seed: Option<u64>,
    pub log_interval: Option<usize>,
    pub batch_size: Option<usize>,
    pub test_batch_size: Option<usize>,
    pub epochs: Option<usize>,
    #[serde(alias = "learning_rate")]
    pub learn_rate: Option<f64>,
    pub momentum: Option<f64>,
    pub num_workers: Option<usize>,
    pub save_model: Option<bool>,
    pub save_name: Option<String>,
    pub use_pretrained: Option<bool>,
    pub pretrained_model_name: Option<String>,
    pub data_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServingOptions {
    pub model_name: Option<String>,
    pub max_batch_size: Option<u32>,
}

impl TrackerConfig {
    pub fn output_enabled(&self) -> bool {
        self.output.unwrap_or(true)
    }

    pub fn output_dir(&self) -> &str {
        self.output_dir.as_deref().unwrap_or("./runs")
    }
}

impl StorageConfig {
    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or("us-east-1")
    }

    pub fn verify(&self) -> bool {
        self.verify.unwrap_or(true)
    }

    /// Access key pair: config values first, then the environment.
    pub fn credentials(&self) -> Result<(String, String)> {
        let access = match &self.aws_access_key_id {
            Some(key) => key.clone(),
            None => std::env::var(ACCESS_KEY_ENV)
                .with_context(|| format!("storage.aws_access_key_id not set and {} missing", ACCESS_KEY_ENV))?,
        };
        let secret = match &self.aws_secret_access_key {
            Some(key) => key.clone(),
            None => std::env::var(SECRET_KEY_ENV)
                .with_context(|| format!("storage.aws_secret_access_key not set and {} missing", SECRET_KEY_ENV))?,
        };
        Ok((access, secret))
    }

    /// Build S3 connection settings, resolving credentials.
    pub fn to_s3_settings(&self) -> Result<S3Settings> {
        let (access, secret) = self.credentials()?;
        let mut settings = S3Settings::new(&self.url, access, secret)
            .with_region(self.region())
            .with_verify(self.verify());
        if let Some(cert) = &self.cert {
            settings = settings.with_ca_cert(cert);
        }
        if let Some(version) = &self.signature_version {
            settings = settings.with_signature_version(version);
        }
        Ok(settings)
    }
}

impl ExperimentConfig {
    /// Parse experiment config from JSON string
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse experiment JSON config: {}", e))
    }

    /// Parse experiment config from YAML string by converting to JSON first
    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        let yaml_value: serde_yaml::Value =
            serde_yaml::from_str(yaml_str).map_err(|e| anyhow::anyhow!("Failed to parse YAML: {}", e))?;

        let json_str = serde_json::to_string(&yaml_value)
            .map_err(|e| anyhow::anyhow!("Failed to convert YAML to JSON: {}", e))?;

        Self::from_json(&json_str)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {:?}", path.as_ref()))?;
        Self::from_yaml(&text)
    }

    pub fn training(&self) -> TrainingOverrides {
        self.training.clone().unwrap_or_default()
    }

    pub fn require_storage(&self) -> Result<&StorageConfig> {
        self.storage
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("config has no `storage` section"))
    }

    pub fn require_tracker(&self) -> Result<&TrackerConfig> {
        self.tracker
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("config has no `tracker` section"))
    }

    /// Check field consistency. Credentials are not resolved here.
    pub fn validate(&self) -> Result<()> {
        if let Some(tracker) = &self.tracker {
            if tracker.project_name.trim().is_empty() {
                anyhow::bail!("tracker.project_name must not be empty");
            }
            if tracker.task_name.trim().is_empty() {
                anyhow::bail!("tracker.task_name must not be empty");
            }
        }

        if let Some(storage) = &self.storage {
            if !(storage.url.starts_with("http://") || storage.url.starts_with("https://")) {
                anyhow::bail!(
                    "Unsupported storage url: {}. Must use http:// or https:// scheme",
                    storage.url
                );
            }
            if storage.data_bucket.is_empty() || storage.model_bucket.is_empty() {
                anyhow::bail!("storage.data_bucket and storage.model_bucket must not be empty");
            }
            if storage.cert.as_deref().is_some_and(|c| c.trim().is_empty()) {
                anyhow::bail!("storage.cert must not be empty if specified");
            }
        }

        if let Some(framework) = self.training.as_ref().and_then(|t| t.framework.as_deref()) {
            if !matches!(
                framework.to_lowercase().as_str(),
                "torch" | "pytorch" | "keras" | "tensorflow"
            ) {
                anyhow::bail!("Unsupported framework: {} (expected torch or keras)", framework);
            }
        }

        if let Some(serving) = &self.serving {
            if serving.max_batch_size == Some(0) {
                anyhow::bail!("serving.max_batch_size must be > 0 if specified");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
tracker:
  project_name: "MNIST"
  task_name: "MNIST_Training"
  queue_name: "queue-8gb-ram"
  output: true
storage:
  url: "http://192.168.1.110:9000"
  aws_access_key_id: "admin"
  aws_secret_access_key: "password"
  data_bucket: "public-data"
  model_bucket: "models"
training:
  framework: torch
  epochs: 3
  learning_rate: 0.02
"#;

    #[test]
    fn test_yaml_parsing() {
        let config = ExperimentConfig::from_yaml(YAML).expect("Should parse YAML");
        let tracker = config.tracker.as_ref().unwrap();
        assert_eq!(tracker.project_name, "MNIST");
        assert_eq!(tracker.queue_name.as_deref(), Some("queue-8gb-ram"));
        assert!(tracker.output_enabled());
        assert_eq!(tracker.output_dir(), "./runs");

        let storage = config.storage.as_ref().unwrap();
        assert_eq!(storage.region(), "us-east-1");
        assert!(storage.verify());

        let training = config.training();
        assert_eq!(training.epochs, Some(3));
        assert_eq!(training.learn_rate, Some(0.02));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_credentials_from_config() {
        let config = ExperimentConfig::from_yaml(YAML).unwrap();
        let settings = config.require_storage().unwrap().to_s3_settings().unwrap();
        assert_eq!(settings.access_key_id, "admin");
        assert_eq!(settings.secret_access_key, "password");
        assert_eq!(settings.endpoint, "http://192.168.1.110:9000");
        assert!(settings.ca_cert.is_none());
        assert_eq!(settings.signature_version, "s3v4");
    }

    #[test]
    fn test_cert_and_signature_reach_s3_settings() {
        let yaml = YAML.replace(
            "  data_bucket:",
            "  cert: /etc/ssl/certs/ca-certificates.crt\n  signature_version: s3v2\n  data_bucket:",
        );
        let config = ExperimentConfig::from_yaml(&yaml).unwrap();
        config.validate().unwrap();

        let settings = config.require_storage().unwrap().to_s3_settings().unwrap();
        assert_eq!(
            settings.ca_cert.as_deref(),
            Some(Path::new("/etc/ssl/certs/ca-certificates.crt"))
        );
        // Only v4 signing is supported by the S3 client
        assert!(settings.validate().is_err());

        let mut config = config;
        config.storage.as_mut().unwrap().cert = Some(" ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = ExperimentConfig::from_yaml("{}").unwrap();
        assert!(config.tracker.is_none());
        assert!(config.require_storage().is_err());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = ExperimentConfig::from_yaml(YAML).unwrap();
        config.storage.as_mut().unwrap().url = "s3://bucket".to_string();
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::from_yaml(YAML).unwrap();
        config.training.as_mut().unwrap().framework = Some("jax".to_string());
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::from_yaml(YAML).unwrap();
        config.tracker.as_mut().unwrap().task_name = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_to_json() {
        let json = crate::config::yaml_to_json("a: 1\nb: [x, y]\n").unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["a"], 1);
        assert_eq!(value["b"][1], "y");
    }
}
