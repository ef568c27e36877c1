// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/frameworks/src/runner.rs
use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;
use mnist_lab_core::metrics::TrainingSummary;
use mnist_lab_core::tracker::ExperimentTracker;
use tracing::info;

use crate::data::MnistSource;
use crate::framework_config::{Framework, FrameworkConfig};
use crate::model::ModelKind;
use crate::recipes::{train_keras, train_torch};

/// What a training run left behind.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub framework: Framework,
    pub model_kind: ModelKind,
    pub summary: TrainingSummary,
}

/// Load the data and run whichever recipe `config` selects.
pub fn run_training<B: AutodiffBackend>(
    config: &FrameworkConfig,
    source: &MnistSource,
    device: &B::Device,
    tracker: &mut ExperimentTracker,
) -> Result<TrainingOutcome> {
    config.validate()?;
    let framework = config
        .framework()
        .context("No framework recipe configured")?;

    info!("Running {} recipe on {:?}", framework.as_str(), source);
    let (train, test) = source.load()?;

    let summary = match framework {
        Framework::Torch => {
            let cfg = config.torch.as_ref().context("Torch recipe missing")?;
            train_torch::<B, _, _>(cfg, train, test, device, tracker)?.1
        }
        Framework::Keras => {
            let cfg = config.keras.as_ref().context("Keras recipe missing")?;
            train_keras::<B, _, _>(cfg, train, test, device, tracker)?.1
        }
    };

    Ok(TrainingOutcome {
        framework,
        model_kind: framework.model_kind(),
        summary,
    })
}
