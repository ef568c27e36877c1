// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::Result;
use mnist_lab_core::config::TrainingOverrides;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::model::ModelKind;

/// Training flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framework {
    /// Convolutional net, SGD with momentum, NLL loss
    Torch,
    /// Dense net, Adam, cross entropy from logits
    Keras,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Torch => "torch",
            Framework::Keras => "keras",
        }
    }

    pub fn model_kind(&self) -> ModelKind {
        match self {
            Framework::Torch => ModelKind::ConvNet,
            Framework::Keras => ModelKind::DenseNet,
        }
    }
}

impl std::str::FromStr for Framework {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "torch" | "pytorch" => Ok(Framework::Torch),
            "keras" | "tensorflow" => Ok(Framework::Keras),
            other => Err(anyhow::anyhow!("Unsupported framework: {}", other)),
        }
    }
}

/// Configuration for the framework recipes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// Torch-style recipe configuration
    pub torch: Option<TorchRecipeConfig>,

    /// Keras-style recipe configuration
    pub keras: Option<KerasRecipeConfig>,
}

/// Torch-style training loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorchRecipeConfig {
    /// Random seed
    pub seed: u64,

    /// Batches between progress reports
    pub log_interval: usize,

    /// Training batch size
    pub batch_size: usize,

    /// Test batch size
    pub test_batch_size: usize,

    pub epochs: usize,

    /// SGD learning rate
    pub learn_rate: f64,

    /// SGD momentum
    pub momentum: f64,

    /// Data loading threads
    pub num_workers: usize,

    /// Save the model after every epoch
    pub save_model: bool,

    /// File stem of the saved model
    pub save_name: String,

    /// Start from previously saved weights
    pub use_pretrained: bool,

    /// Path of the pretrained weights
    pub pretrained_model_name: String,

    /// Where models are written. Defaults to the system temp directory.
    pub artifact_dir: Option<PathBuf>,
}

/// Keras-style `fit` configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KerasRecipeConfig {
    pub seed: u64,

    pub epochs: usize,

    pub batch_size: usize,

    /// Adam learning rate
    pub learning_rate: f64,

    pub num_workers: usize,

    pub save_model: bool,

    pub save_name: String,

    pub artifact_dir: Option<PathBuf>,
}

impl Default for TorchRecipeConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            log_interval: 10,
            batch_size: 64,
            test_batch_size: 1000,
            epochs: 1,
            learn_rate: 0.01,
            momentum: 0.5,
            num_workers: 1,
            save_model: true,
            save_name: "mnist".to_string(),
            use_pretrained: false,
            pretrained_model_name: "mnist".to_string(),
            artifact_dir: None,
        }
    }
}

impl Default for KerasRecipeConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            epochs: 2,
            batch_size: 128,
            learning_rate: 0.001,
            num_workers: 1,
            save_model: true,
            save_name: "mnist_dense".to_string(),
            artifact_dir: None,
        }
    }
}

impl TorchRecipeConfig {
    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn apply(&mut self, o: &TrainingOverrides) {
        if let Some(v) = o.seed {
            self.seed = v;
        }
        if let Some(v) = o.log_interval {
            self.log_interval = v;
        }
        if let Some(v) = o.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = o.test_batch_size {
            self.test_batch_size = v;
        }
        if let Some(v) = o.epochs {
            self.epochs = v;
        }
        if let Some(v) = o.learn_rate {
            self.learn_rate = v;
        }
        if let Some(v) = o.momentum {
            self.momentum = v;
        }
        if let Some(v) = o.num_workers {
            self.num_workers = v;
        }
        if let Some(v) = o.save_model {
            self.save_model = v;
        }
        if let Some(v) = &o.save_name {
            self.save_name = v.clone();
        }
        if let Some(v) = o.use_pretrained {
            self.use_pretrained = v;
        }
        if let Some(v) = &o.pretrained_model_name {
            self.pretrained_model_name = v.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.test_batch_size == 0 {
            anyhow::bail!("Torch batch_size and test_batch_size must be > 0");
        }
        if self.epochs == 0 {
            anyhow::bail!("Torch epochs must be > 0");
        }
        if self.log_interval == 0 {
            anyhow::bail!("Torch log_interval must be > 0");
        }
        if self.learn_rate <= 0.0 {
            anyhow::bail!("Torch learn_rate must be > 0");
        }
        if !(0.0..1.0).contains(&self.momentum) {
            anyhow::bail!("Torch momentum must be in [0, 1)");
        }
        if self.num_workers == 0 {
            anyhow::bail!("Torch num_workers must be > 0");
        }
        if self.save_model && self.save_name.trim().is_empty() {
            anyhow::bail!("Torch save_name must not be empty when save_model is set");
        }
        Ok(())
    }
}

impl KerasRecipeConfig {
    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn apply(&mut self, o: &TrainingOverrides) {
        if let Some(v) = o.seed {
            self.seed = v;
        }
        if let Some(v) = o.epochs {
            self.epochs = v;
        }
        if let Some(v) = o.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = o.learn_rate {
            self.learning_rate = v;
        }
        if let Some(v) = o.num_workers {
            self.num_workers = v;
        }
        if let Some(v) = o.save_model {
            self.save_model = v;
        }
        if let Some(v) = &o.save_name {
            self.save_name = v.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("Keras batch_size must be > 0");
        }
        if self.epochs == 0 {
            anyhow::bail!("Keras epochs must be > 0");
        }
        if self.learning_rate <= 0.0 {
            anyhow::bail!("Keras learning_rate must be > 0");
        }
        if self.num_workers == 0 {
            anyhow::bail!("Keras num_workers must be > 0");
        }
        if self.save_model && self.save_name.trim().is_empty() {
            anyhow::bail!("Keras save_name must not be empty when save_model is set");
        }
        Ok(())
    }
}

impl FrameworkConfig {
    /// Torch recipe with defaults
    pub fn torch() -> Self {
        Self {
            torch: Some(TorchRecipeConfig::default()),
            keras: None,
        }
    }

    /// Keras recipe with defaults
    pub fn keras() -> Self {
        Self {
            torch: None,
            keras: Some(KerasRecipeConfig::default()),
        }
    }

    /// Defaults for `framework` with `overrides` applied
    pub fn from_overrides(framework: Framework, overrides: &TrainingOverrides) -> Self {
        let mut config = match framework {
            Framework::Torch => Self::torch(),
            Framework::Keras => Self::keras(),
        };
        if let Some(torch) = config.torch.as_mut() {
            torch.apply(overrides);
        }
        if let Some(keras) = config.keras.as_mut() {
            keras.apply(overrides);
        }
        config
    }

    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Some(torch) = self.torch.as_mut() {
            torch.artifact_dir = Some(dir.clone());
        }
        if let Some(keras) = self.keras.as_mut() {
            keras.artifact_dir = Some(dir);
        }
        self
    }

    /// The configured framework. Torch wins if both are present.
    pub fn framework(&self) -> Option<Framework> {
        if self.torch.is_some() {
            Some(Framework::Torch)
        } else if self.keras.is_some() {
            Some(Framework::Keras)
        } else {
            None
        }
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> Result<()> {
        if self.torch.is_none() && self.keras.is_none() {
            anyhow::bail!("At least one framework (torch or keras) must be configured");
        }
        if let Some(torch) = &self.torch {
            torch.validate()?;
        }
        if let Some(keras) = &self.keras {
            keras.validate()?;
        }
        Ok(())
    }
}
