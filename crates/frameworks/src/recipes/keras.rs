// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::Result;
use burn::data::dataloader::DataLoaderBuilder;
use burn::data::dataset::vision::MnistItem;
use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use mnist_lab_core::metrics::{EpochMetrics, TrainingSummary};
use mnist_lab_core::tracker::ExperimentTracker;
use std::time::Instant;
use tracing::info;

use super::{evaluate, ScoreKind};
use crate::data::{MnistBatcher, HEIGHT, NUM_CLASSES, WIDTH};
use crate::framework_config::KerasRecipeConfig;
use crate::io::save_model;
use crate::model::{count_correct, DenseNet, DenseNetConfig, ModelKind};

/// `fit(train, epochs, validation_data=test)` for the dense net.
///
/// Adam, cross entropy on logits, sparse categorical accuracy. Validation
/// runs at the end of every epoch and the model is saved once training ends.
pub fn train_keras<B, D1, D2>(
    cfg: &KerasRecipeConfig,
    train: D1,
    test: D2,
    device: &B::Device,
    tracker: &mut ExperimentTracker,
) -> Result<(DenseNet<B>, TrainingSummary)>
where
    B: AutodiffBackend,
    D1: Dataset<MnistItem> + 'static,
    D2: Dataset<MnistItem> + 'static,
{
    cfg.validate()?;
    B::seed(cfg.seed);

    let model_config = DenseNetConfig::new();
    let mut model: DenseNet<B> = model_config.init(device);
    info!(
        "Model summary: flatten {} -> dense {} (relu) -> dense {}, {} trainable params",
        WIDTH * HEIGHT,
        model_config.hidden_size,
        NUM_CLASSES,
        model.num_params()
    );

    let mut optim = AdamConfig::new()
        .with_epsilon(1e-7)
        .init::<B, DenseNet<B>>();
    let loss_fn = CrossEntropyLossConfig::new().init(device);

    let normalization = ModelKind::DenseNet.normalization();
    let train_len = train.len();
    let steps = train_len.div_ceil(cfg.batch_size);

    let loader_train = DataLoaderBuilder::new(MnistBatcher::<B>::new(device.clone(), normalization))
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(cfg.num_workers)
        .build(train);

    let loader_test = DataLoaderBuilder::new(MnistBatcher::<B::InnerBackend>::new(device.clone(), normalization))
        .batch_size(cfg.batch_size)
        .num_workers(cfg.num_workers)
        .build(test);

    let mut summary = TrainingSummary::new("keras");
    let run_start = Instant::now();

    for epoch in 1..=cfg.epochs {
        let epoch_start = Instant::now();
        let mut loss_sum = 0.0;
        let mut correct = 0usize;
        let mut seen = 0usize;

        for batch in loader_train.iter() {
            let [batch_size] = batch.targets.dims();
            let logits = model.forward(batch.images);
            let loss = loss_fn.forward(logits.clone(), batch.targets.clone());

            loss_sum += loss.clone().into_scalar().elem::<f64>() * batch_size as f64;
            correct += count_correct(logits, batch.targets);
            seen += batch_size;

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(cfg.learning_rate, model, grads);
        }

        let train_loss = if seen == 0 { 0.0 } else { loss_sum / seen as f64 };
        let train_accuracy = if seen == 0 { 0.0 } else { correct as f64 / seen as f64 };

        let validation = evaluate(&model.valid(), loader_test.as_ref(), ScoreKind::Logits);
        let elapsed = epoch_start.elapsed();

        println!("Epoch {}/{}", epoch, cfg.epochs);
        println!(
            "{}/{} - {:.0}s - loss: {:.4} - sparse_categorical_accuracy: {:.4} - val_loss: {:.4} - val_sparse_categorical_accuracy: {:.4}",
            steps,
            steps,
            elapsed.as_secs_f64(),
            train_loss,
            train_accuracy,
            validation.mean_loss(),
            validation.accuracy()
        );

        let iteration = epoch as u64;
        tracker.report_scalar("train", "loss", iteration, train_loss)?;
        tracker.report_scalar("train", "accuracy", iteration, train_accuracy)?;
        tracker.report_scalar("validation", "loss", iteration, validation.mean_loss())?;
        tracker.report_scalar("validation", "accuracy", iteration, validation.accuracy())?;

        summary.record_epoch(EpochMetrics {
            epoch,
            train_loss,
            test_loss: validation.mean_loss(),
            correct: validation.correct,
            total: validation.total,
            elapsed,
        });
    }

    if cfg.save_model {
        let written = save_model(&model, &cfg.artifact_dir().join(&cfg.save_name))?;
        println!("Model saved...!!!");
        tracker.report_text(format!("Model saved to {}", written.display()))?;
        summary.artifact = Some(written);
    }

    summary.total_time = Some(run_start.elapsed());
    Ok((model, summary))
}
