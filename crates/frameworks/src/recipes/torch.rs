// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::Result;
use burn::data::dataloader::DataLoaderBuilder;
use burn::data::dataset::vision::MnistItem;
use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use mnist_lab_core::metrics::{format_test_step, format_train_step, percent, EpochMetrics, TrainingSummary};
use mnist_lab_core::tracker::ExperimentTracker;
use std::path::Path;
use std::time::Instant;
use tracing::info;

use super::{evaluate, Evaluation, ScoreKind};
use crate::data::{MnistBatcher, Normalization};
use crate::framework_config::TorchRecipeConfig;
use crate::io::{load_model, model_file, save_model};
use crate::model::{nll_loss, ConvNet, ConvNetConfig};

/// Train the convolutional net with SGD + momentum, testing after every epoch.
pub fn train_torch<B, D1, D2>(
    cfg: &TorchRecipeConfig,
    train: D1,
    test: D2,
    device: &B::Device,
    tracker: &mut ExperimentTracker,
) -> Result<(ConvNet<B>, TrainingSummary)>
where
    B: AutodiffBackend,
    D1: Dataset<MnistItem> + 'static,
    D2: Dataset<MnistItem> + 'static,
{
    cfg.validate()?;
    B::seed(cfg.seed);

    let mut model: ConvNet<B> = ConvNetConfig::new().init(device);
    if cfg.use_pretrained {
        model = load_model(model, Path::new(&cfg.pretrained_model_name), device)?;
        info!("Starting from pretrained weights {}", cfg.pretrained_model_name);
    }

    let momentum = MomentumConfig::new()
        .with_momentum(cfg.momentum)
        .with_dampening(0.0);
    let mut optim = SgdConfig::new()
        .with_momentum(Some(momentum))
        .init::<B, ConvNet<B>>();

    let train_len = train.len();
    let test_len = test.len();
    let num_batches = train_len.div_ceil(cfg.batch_size);

    let loader_train = DataLoaderBuilder::new(MnistBatcher::<B>::new(device.clone(), Normalization::standard()))
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .num_workers(cfg.num_workers)
        .build(train);

    let loader_test = DataLoaderBuilder::new(MnistBatcher::<B::InnerBackend>::new(
        device.clone(),
        Normalization::standard(),
    ))
    .batch_size(cfg.test_batch_size)
    .num_workers(cfg.num_workers)
    .build(test);

    info!(
        "Torch recipe: {} epochs, {} train / {} test items, {} batches per epoch",
        cfg.epochs, train_len, test_len, num_batches
    );

    let destination = cfg.artifact_dir().join(&cfg.save_name);
    let mut summary = TrainingSummary::new("torch");
    let run_start = Instant::now();

    for epoch in 1..=cfg.epochs {
        let epoch_start = Instant::now();
        let mut loss_total = 0.0;
        let mut batches = 0usize;

        for (batch_idx, batch) in loader_train.iter().enumerate() {
            let output = model.forward(batch.images);
            let loss = nll_loss(output, batch.targets, false);
            let loss_value = loss.clone().into_scalar().elem::<f64>();

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(cfg.learn_rate, model, grads);

            loss_total += loss_value;
            batches += 1;

            if batch_idx % cfg.log_interval == 0 {
                tracker.report_scalar("train", "loss", (epoch * num_batches + batch_idx) as u64, loss_value)?;
                println!(
                    "{}",
                    format_train_step(
                        epoch,
                        batch_idx * cfg.batch_size,
                        train_len,
                        percent(batch_idx as f64 / num_batches as f64),
                        loss_value,
                    )
                );
                tracker.report_scalar(
                    &format!("Scalar example {} - epoch", epoch),
                    "Loss",
                    batch_idx as u64,
                    loss_value,
                )?;
            }
        }
        println!();

        let evaluation = evaluate(&model.valid(), loader_test.as_ref(), ScoreKind::LogProbabilities);
        report_test(tracker, epoch, &evaluation)?;
        println!();

        if cfg.save_model {
            let written = save_model(&model, &destination)?;
            summary.artifact = Some(written);
        }
        tracker.report_text(format!(
            "The default output destination for model snapshots and artifacts is: {}",
            model_file(&destination).display()
        ))?;
        println!("\n");

        summary.record_epoch(EpochMetrics {
            epoch,
            train_loss: if batches == 0 { 0.0 } else { loss_total / batches as f64 },
            test_loss: evaluation.mean_loss(),
            correct: evaluation.correct,
            total: evaluation.total,
            elapsed: epoch_start.elapsed(),
        });
    }

    summary.total_time = Some(run_start.elapsed());
    Ok((model, summary))
}

fn report_test(tracker: &mut ExperimentTracker, epoch: usize, evaluation: &Evaluation) -> Result<()> {
    let test_loss = evaluation.mean_loss();
    let accuracy = evaluation.accuracy();

    tracker.report_scalar("test", "loss", epoch as u64, test_loss)?;
    tracker.report_scalar("test", "accuracy", epoch as u64, accuracy)?;
    println!(
        "{}",
        format_test_step(test_loss, evaluation.correct, evaluation.total, percent(accuracy))
    );

    tracker.report_histogram(
        "Histogram example",
        "correct",
        1,
        &evaluation.cumulative_correct,
        "Test",
        "Correct",
    )?;
    tracker.report_matrix(
        "Confusion matrix example",
        "Test loss / correct",
        1,
        vec![
            evaluation.cumulative_loss.clone(),
            evaluation.cumulative_correct.clone(),
        ],
    )
}
