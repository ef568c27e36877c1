// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Training loops for the two framework flavours.
//!
//! Both recipes are generic over the autodiff backend and over any pair of
//! `Dataset<MnistItem>` splits, so tests can drive them with small in-memory
//! datasets on the CPU backend.

pub mod keras;
pub mod torch;

pub use keras::train_keras;
pub use torch::train_torch;

use burn::data::dataloader::DataLoader;
use burn::prelude::*;
use burn::tensor::activation::log_softmax;

use crate::data::MnistBatch;
use crate::model::{count_correct, nll_loss, Classifier};

/// Outcome of one pass over a test loader.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Summed per-sample loss
    pub loss_sum: f64,
    pub correct: usize,
    pub total: usize,
    /// Running loss after each batch
    pub cumulative_loss: Vec<f64>,
    /// Running correct count after each batch
    pub cumulative_correct: Vec<f64>,
}

impl Evaluation {
    pub fn mean_loss(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.loss_sum / self.total as f64
    }

    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total as f64
    }
}

/// How a classifier's scores relate to class probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreKind {
    LogProbabilities,
    Logits,
}

/// Run `model` over every batch of `loader` without tracking gradients.
pub fn evaluate<B: Backend, M: Classifier<B>>(
    model: &M,
    loader: &dyn DataLoader<MnistBatch<B>>,
    kind: ScoreKind,
) -> Evaluation {
    let mut evaluation = Evaluation::default();

    for batch in loader.iter() {
        let [batch_size] = batch.targets.dims();
        let scores = model.scores(batch.images);
        let log_probs = match kind {
            ScoreKind::LogProbabilities => scores,
            ScoreKind::Logits => log_softmax(scores, 1),
        };

        evaluation.loss_sum += nll_loss(log_probs.clone(), batch.targets.clone(), true)
            .into_scalar()
            .elem::<f64>();
        evaluation.correct += count_correct(log_probs, batch.targets);
        evaluation.total += batch_size;

        evaluation.cumulative_loss.push(evaluation.loss_sum);
        evaluation.cumulative_correct.push(evaluation.correct as f64);
    }

    evaluation
}
