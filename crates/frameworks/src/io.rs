// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/frameworks/src/io.rs
use anyhow::{Context, Result};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use image::imageops::FilterType;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::data::{Normalization, HEIGHT, WIDTH};
use crate::model::{Classifier, ConvNetConfig, DenseNetConfig, ModelKind};

type ModelRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Extension the recorder appends to every model file.
pub const MODEL_EXTENSION: &str = "mpk";

/// Path the recorder actually writes for `path`.
pub fn model_file(path: &Path) -> PathBuf {
    path.with_extension(MODEL_EXTENSION)
}

/// Save `model` weights, returning the written file.
pub fn save_model<B: Backend, M: Module<B>>(model: &M, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create model directory {:?}", parent))?;
    }

    model
        .clone()
        .save_file(path.to_path_buf(), &ModelRecorder::new())
        .map_err(|e| anyhow::anyhow!("Failed to save model to {:?}: {}", path, e))?;

    let written = model_file(path);
    info!("Saved model to {}", written.display());
    Ok(written)
}

/// Load weights saved by [`save_model`] into `model`.
pub fn load_model<B: Backend, M: Module<B>>(model: M, path: &Path, device: &B::Device) -> Result<M> {
    let file = model_file(path);
    if !file.is_file() {
        anyhow::bail!("Could not load model from {}: file not found", file.display());
    }

    let model = model
        .load_file(path.to_path_buf(), &ModelRecorder::new(), device)
        .map_err(|e| anyhow::anyhow!("Could not load model from {}: {}", file.display(), e))?;
    debug!("Loaded model weights from {}", file.display());
    Ok(model)
}

/// Read an image as a `[1, 1, 28, 28]` tensor: grayscale, resized, normalized.
pub fn load_image<B: Backend>(
    path: &Path,
    normalization: Normalization,
    device: &B::Device,
) -> Result<Tensor<B, 4>> {
    let img = image::open(path).with_context(|| format!("Failed to open image {:?}", path))?;
    let gray = img
        .resize_exact(WIDTH as u32, HEIGHT as u32, FilterType::Triangle)
        .to_luma8();

    let pixels: Vec<f32> = gray.into_raw().into_iter().map(f32::from).collect();
    let data = TensorData::new(pixels, [1, 1, HEIGHT, WIDTH]).convert::<B::FloatElem>();
    Ok(normalization.apply(Tensor::<B, 4>::from_data(data, device)))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub digit: usize,
    /// Raw model output, log-probabilities or logits depending on the model
    pub scores: Vec<f32>,
}

fn classify<B: Backend, M: Classifier<B>>(model: &M, input: Tensor<B, 4>) -> Result<Prediction> {
    let scores: Vec<f32> = model
        .scores(input)
        .into_data()
        .convert::<f32>()
        .to_vec()
        .map_err(|e| anyhow::anyhow!("Failed to read model output: {:?}", e))?;

    let digit = scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .ok_or_else(|| anyhow::anyhow!("Model produced no scores"))?;

    Ok(Prediction { digit, scores })
}

/// Classify the digit in `image` with weights saved at `weights`.
pub fn predict<B: Backend>(
    kind: ModelKind,
    weights: &Path,
    image: &Path,
    device: &B::Device,
) -> Result<Prediction> {
    let input = load_image::<B>(image, kind.normalization(), device)?;

    let prediction = match kind {
        ModelKind::ConvNet => {
            let model = load_model(ConvNetConfig::new().init::<B>(device), weights, device)?;
            classify(&model, input)?
        }
        ModelKind::DenseNet => {
            let model = load_model(DenseNetConfig::new().init::<B>(device), weights, device)?;
            classify(&model, input)?
        }
    };

    info!("Predicted digit {} for {:?}", prediction.digit, image);
    Ok(prediction)
}
