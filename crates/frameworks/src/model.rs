// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/frameworks/src/model.rs
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::*;
use burn::tensor::activation::log_softmax;
use mnist_lab_core::serving::ServingConfig;

use crate::data::{Normalization, HEIGHT, NUM_CLASSES, WIDTH};

/// Anything that maps an image batch to per-class scores.
pub trait Classifier<B: Backend> {
    /// `[N, 1, 28, 28]` in, `[N, 10]` out.
    fn scores(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;
}

#[derive(Config, Debug)]
pub struct ConvNetConfig {
    #[config(default = 20)]
    pub conv1_channels: usize,
    #[config(default = 50)]
    pub conv2_channels: usize,
    #[config(default = 500)]
    pub hidden_size: usize,
}

/// Two conv/pool stages and two linear layers, log-probability output.
#[derive(Module, Debug)]
pub struct ConvNet<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    pool: MaxPool2d,
    fc1: Linear<B>,
    fc2: Linear<B>,
    activation: Relu,
}

impl ConvNetConfig {
    /// Flattened size after both stages: 28 -> 24 -> 12 -> 8 -> 4.
    pub fn flatten_size(&self) -> usize {
        self.conv2_channels * 4 * 4
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvNet<B> {
        ConvNet {
            conv1: Conv2dConfig::new([1, self.conv1_channels], [5, 5]).init(device),
            conv2: Conv2dConfig::new([self.conv1_channels, self.conv2_channels], [5, 5])
                .init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            fc1: LinearConfig::new(self.flatten_size(), self.hidden_size).init(device),
            fc2: LinearConfig::new(self.hidden_size, NUM_CLASSES).init(device),
            activation: Relu::new(),
        }
    }
}

impl<B: Backend> ConvNet<B> {
    /// Returns log-probabilities `[N, 10]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.conv1.forward(images));
        let x = self.pool.forward(x);
        let x = self.activation.forward(self.conv2.forward(x));
        let x = self.pool.forward(x);

        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = self.activation.forward(self.fc1.forward(x));
        log_softmax(self.fc2.forward(x), 1)
    }
}

impl<B: Backend> Classifier<B> for ConvNet<B> {
    fn scores(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}

#[derive(Config, Debug)]
pub struct DenseNetConfig {
    #[config(default = 128)]
    pub hidden_size: usize,
}

/// Flatten, one hidden layer, raw logits.
#[derive(Module, Debug)]
pub struct DenseNet<B: Backend> {
    hidden: Linear<B>,
    output: Linear<B>,
    activation: Relu,
}

impl DenseNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DenseNet<B> {
        DenseNet {
            hidden: LinearConfig::new(WIDTH * HEIGHT, self.hidden_size).init(device),
            output: LinearConfig::new(self.hidden_size, NUM_CLASSES).init(device),
            activation: Relu::new(),
        }
    }
}

impl<B: Backend> DenseNet<B> {
    /// Returns logits `[N, 10]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, height, width] = images.dims();
        let x = images.reshape([batch_size, height * width]);
        let x = self.activation.forward(self.hidden.forward(x));
        self.output.forward(x)
    }
}

impl<B: Backend> Classifier<B> for DenseNet<B> {
    fn scores(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}

/// The two architectures, keyed by training flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    ConvNet,
    DenseNet,
}

impl ModelKind {
    pub fn normalization(&self) -> Normalization {
        match self {
            ModelKind::ConvNet => Normalization::standard(),
            ModelKind::DenseNet => Normalization::UnitRange,
        }
    }

    /// Serving preset matching the model's input and output signature.
    pub fn serving_config(&self, name: &str) -> ServingConfig {
        let config = match self {
            ModelKind::ConvNet => ServingConfig::torchscript(
                &[-1, 1, HEIGHT as i64, WIDTH as i64],
                &[-1, NUM_CLASSES as i64],
            ),
            ModelKind::DenseNet => ServingConfig::tensorflow(
                "flatten_input",
                &[-1, HEIGHT as i64, WIDTH as i64, 1],
                "dense_1",
                &[-1, NUM_CLASSES as i64],
            ),
        };
        config.with_name(name)
    }
}

/// Negative log-likelihood of `targets` under `log_probs`.
///
/// Returns the mean over the batch, or the sum when `sum` is set.
pub fn nll_loss<B: Backend>(
    log_probs: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
    sum: bool,
) -> Tensor<B, 1> {
    let [batch_size, _] = log_probs.dims();
    let picked = log_probs.gather(1, targets.reshape([batch_size, 1]));
    let total = picked.sum().neg();
    if sum {
        total
    } else {
        total.div_scalar(batch_size as f64)
    }
}

/// Number of rows whose argmax equals the target.
pub fn count_correct<B: Backend>(scores: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = scores.dims();
    let predictions = scores.argmax(1).reshape([batch_size]);
    predictions
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}
