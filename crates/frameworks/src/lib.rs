// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod backend;
pub mod data;
pub mod framework_config;
pub mod io;
pub mod model;
pub mod recipes;
pub mod runner;

pub use framework_config::{Framework, FrameworkConfig, KerasRecipeConfig, TorchRecipeConfig};
#[cfg(test)]
mod tests;

// Re-export main types
pub use data::{MnistBatch, MnistBatcher, MnistSource, Normalization};
pub use io::{load_model, predict, save_model, Prediction};
pub use model::{ConvNet, ConvNetConfig, DenseNet, DenseNetConfig, ModelKind};
pub use recipes::{train_keras, train_torch};
pub use runner::{run_training, TrainingOutcome};
