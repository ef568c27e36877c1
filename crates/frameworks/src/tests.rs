// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::data::tests::{idx_images, idx_labels};
use crate::data::{MnistSource, HEIGHT, WIDTH};
use crate::framework_config::{Framework, FrameworkConfig, KerasRecipeConfig, TorchRecipeConfig};
use crate::io::{load_model, predict, save_model};
use crate::model::{count_correct, nll_loss, ConvNetConfig, DenseNetConfig, ModelKind};
use crate::recipes::{train_keras, train_torch};
use crate::runner::run_training;
use anyhow::Result;
use burn::backend::{Autodiff, NdArray};
use burn::data::dataset::vision::MnistItem;
use burn::data::dataset::InMemDataset;
use burn::prelude::*;
use mnist_lab_core::config::TrainingOverrides;
use mnist_lab_core::tracker::{ExperimentTracker, MemorySink, TrackerEvent};

type TestBackend = NdArray<f32>;
type TestAutodiffBackend = Autodiff<TestBackend>;

/// Class 0 lights up the left half of the image, class 1 the right half.
fn two_class_item(label: u8, jitter: f32) -> MnistItem {
    let mut image = [[0f32; WIDTH]; HEIGHT];
    for row in image.iter_mut() {
        for (col, pixel) in row.iter_mut().enumerate() {
            let left = col < WIDTH / 2;
            if (label == 0) == left {
                *pixel = 255.0 - jitter;
            }
        }
    }
    MnistItem { image, label }
}

fn two_class_dataset(count: usize) -> InMemDataset<MnistItem> {
    let items = (0..count)
        .map(|i| two_class_item((i % 2) as u8, (i % 7) as f32 * 10.0))
        .collect();
    InMemDataset::new(items)
}

#[test]
fn test_framework_selection() -> Result<()> {
    assert_eq!("torch".parse::<Framework>()?, Framework::Torch);
    assert_eq!("PyTorch".parse::<Framework>()?, Framework::Torch);
    assert_eq!("keras".parse::<Framework>()?, Framework::Keras);
    assert_eq!("tensorflow".parse::<Framework>()?, Framework::Keras);
    assert!("jax".parse::<Framework>().is_err());

    assert_eq!(Framework::Torch.model_kind(), ModelKind::ConvNet);
    assert_eq!(Framework::Keras.model_kind(), ModelKind::DenseNet);
    Ok(())
}

#[test]
fn test_recipe_defaults_and_overrides() -> Result<()> {
    let torch = TorchRecipeConfig::default();
    assert_eq!(torch.seed, 1);
    assert_eq!(torch.batch_size, 64);
    assert_eq!(torch.test_batch_size, 1000);
    assert_eq!(torch.learn_rate, 0.01);
    assert_eq!(torch.momentum, 0.5);
    assert_eq!(torch.save_name, "mnist");

    let keras = KerasRecipeConfig::default();
    assert_eq!(keras.epochs, 2);
    assert_eq!(keras.batch_size, 128);
    assert_eq!(keras.learning_rate, 0.001);

    // Overrides only touch the fields they carry
    let overrides = TrainingOverrides {
        epochs: Some(3),
        learn_rate: Some(0.05),
        save_name: Some("digits".to_string()),
        ..TrainingOverrides::default()
    };
    let config = FrameworkConfig::from_overrides(Framework::Torch, &overrides);
    assert_eq!(config.framework(), Some(Framework::Torch));
    let torch = config.torch.as_ref().unwrap();
    assert_eq!(torch.epochs, 3);
    assert_eq!(torch.learn_rate, 0.05);
    assert_eq!(torch.save_name, "digits");
    assert_eq!(torch.batch_size, 64);

    let config = FrameworkConfig::from_overrides(Framework::Keras, &overrides);
    assert!(config.torch.is_none());
    assert_eq!(config.keras.as_ref().unwrap().learning_rate, 0.05);

    Ok(())
}

#[test]
fn test_recipe_validation() -> Result<()> {
    assert!(FrameworkConfig::torch().validate().is_ok());
    assert!(FrameworkConfig::keras().validate().is_ok());

    // Nothing configured
    let empty = FrameworkConfig { torch: None, keras: None };
    assert!(empty.validate().is_err());

    let mut config = FrameworkConfig::torch();
    config.torch.as_mut().unwrap().momentum = 1.0;
    assert!(config.validate().is_err());

    let mut config = FrameworkConfig::torch();
    config.torch.as_mut().unwrap().log_interval = 0;
    assert!(config.validate().is_err());

    let mut config = FrameworkConfig::keras();
    config.keras.as_mut().unwrap().learning_rate = 0.0;
    assert!(config.validate().is_err());

    Ok(())
}

#[test]
fn test_recipe_yaml_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("recipe.yaml");
    let config = FrameworkConfig::keras().with_artifact_dir(dir.path());
    std::fs::write(&path, serde_yaml::to_string(&config)?)?;

    let loaded: FrameworkConfig = serde_yaml::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(loaded.keras, config.keras);
    assert_eq!(loaded.keras.unwrap().artifact_dir(), dir.path());
    Ok(())
}

#[test]
fn test_model_output_shapes() {
    let device = Default::default();
    let images = Tensor::<TestBackend, 4>::zeros([3, 1, HEIGHT, WIDTH], &device);

    let conv = ConvNetConfig::new().init::<TestBackend>(&device);
    assert_eq!(ConvNetConfig::new().flatten_size(), 800);
    let log_probs = conv.forward(images.clone());
    assert_eq!(log_probs.dims(), [3, 10]);

    // log-softmax rows exponentiate to a distribution
    let row_sums: Vec<f32> = log_probs.exp().sum_dim(1).into_data().to_vec().unwrap();
    for sum in row_sums {
        assert!((sum - 1.0).abs() < 1e-4);
    }

    let dense = DenseNetConfig::new().init::<TestBackend>(&device);
    assert_eq!(dense.forward(images).dims(), [3, 10]);
}

#[test]
fn test_nll_loss_and_correct_count() {
    let device = Default::default();
    let log_probs = Tensor::<TestBackend, 2>::from_data(
        [[0.5f32.ln(), 0.5f32.ln()], [0.25f32.ln(), 0.75f32.ln()]],
        &device,
    );
    let targets = Tensor::<TestBackend, 1, Int>::from_data([0, 1], &device);

    let expected_sum = -(0.5f32.ln() + 0.75f32.ln());
    let sum: f32 = nll_loss(log_probs.clone(), targets.clone(), true).into_scalar().elem();
    let mean: f32 = nll_loss(log_probs.clone(), targets.clone(), false).into_scalar().elem();
    assert!((sum - expected_sum).abs() < 1e-5);
    assert!((mean - expected_sum / 2.0).abs() < 1e-5);

    // Row 0 ties resolve to index 0, row 1 picks index 1
    assert_eq!(count_correct(log_probs, targets), 2);
}

#[test]
fn test_serving_config_per_model() {
    let conv = ModelKind::ConvNet.serving_config("mnist").render();
    assert!(conv.contains("name: \"mnist\""));
    assert!(conv.contains("platform: \"pytorch_libtorch\""));
    assert!(conv.contains("input__0"));
    assert!(conv.contains("[-1, 1, 28, 28]"));

    let dense = ModelKind::DenseNet.serving_config("mnist_dense").render();
    assert!(dense.contains("platform: \"tensorflow_savedmodel\""));
    assert!(dense.contains("[-1, 28, 28, 1]"));
    assert!(dense.contains("[-1, 10]"));
}

#[test]
fn test_save_and_load_round_trip() -> Result<()> {
    let device = Default::default();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("mnist");

    TestBackend::seed(7);
    let model = ConvNetConfig::new().init::<TestBackend>(&device);
    let written = save_model(&model, &path)?;
    assert_eq!(written, dir.path().join("nested").join("mnist.mpk"));
    assert!(written.is_file());

    TestBackend::seed(8);
    let fresh = ConvNetConfig::new().init::<TestBackend>(&device);
    let loaded = load_model(fresh, &path, &device)?;

    let images = Tensor::<TestBackend, 4>::ones([2, 1, HEIGHT, WIDTH], &device);
    let expected: Vec<f32> = model.forward(images.clone()).into_data().to_vec().unwrap();
    let actual: Vec<f32> = loaded.forward(images).into_data().to_vec().unwrap();
    for (a, b) in expected.iter().zip(actual.iter()) {
        assert!((a - b).abs() < 1e-5);
    }
    Ok(())
}

#[test]
fn test_load_missing_model_names_path() {
    let device = Default::default();
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");

    let err = load_model(DenseNetConfig::new().init::<TestBackend>(&device), &missing, &device)
        .unwrap_err()
        .to_string();
    assert!(err.contains("nope.mpk"), "unexpected error: {}", err);
}

#[test]
fn test_predict_from_png() -> Result<()> {
    let device = Default::default();
    let dir = tempfile::tempdir()?;

    let weights = dir.path().join("dense");
    save_model(&DenseNetConfig::new().init::<TestBackend>(&device), &weights)?;

    // Larger than 28x28 to exercise the resize
    let image_path = dir.path().join("digit.png");
    let img = image::GrayImage::from_fn(40, 40, |x, _| image::Luma([if x > 20 { 255 } else { 0 }]));
    img.save(&image_path)?;

    let prediction = predict::<TestBackend>(ModelKind::DenseNet, &weights, &image_path, &device)?;
    assert_eq!(prediction.scores.len(), 10);
    assert!(prediction.digit < 10);

    assert!(predict::<TestBackend>(ModelKind::ConvNet, &weights, &dir.path().join("missing.png"), &device).is_err());
    Ok(())
}

#[test]
fn test_torch_recipe_reports_and_saves() -> Result<()> {
    let device = Default::default();
    let dir = tempfile::tempdir()?;
    let memory = MemorySink::new();
    let mut tracker = ExperimentTracker::new("MNIST", "torch-test").with_sink(memory.clone());

    let cfg = TorchRecipeConfig {
        batch_size: 8,
        test_batch_size: 16,
        log_interval: 2,
        artifact_dir: Some(dir.path().to_path_buf()),
        ..TorchRecipeConfig::default()
    };

    let (_model, summary) = train_torch::<TestAutodiffBackend, _, _>(
        &cfg,
        two_class_dataset(32),
        two_class_dataset(16),
        &device,
        &mut tracker,
    )?;

    // 4 batches per epoch, reported at batch 0 and 2 of epoch 1
    let train_loss = memory.scalars("train", "loss");
    assert_eq!(train_loss.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![4, 6]);
    assert_eq!(memory.scalars("Scalar example 1 - epoch", "Loss").len(), 2);
    assert_eq!(memory.scalars("test", "loss").len(), 1);

    let accuracy = memory.scalars("test", "accuracy");
    assert_eq!(accuracy[0].0, 1);
    assert!((0.0..=1.0).contains(&accuracy[0].1));

    let events = memory.events();
    assert!(events.iter().any(|e| matches!(e, TrackerEvent::Histogram { values, .. } if values.len() == 1)));
    assert!(events.iter().any(|e| matches!(e, TrackerEvent::Matrix { rows, .. } if rows.len() == 2)));
    let artifact_text = format!(
        "The default output destination for model snapshots and artifacts is: {}",
        dir.path().join("mnist.mpk").display()
    );
    assert!(events.iter().any(|e| matches!(
        e,
        TrackerEvent::Text { message } if *message == artifact_text
    )));

    assert_eq!(summary.epochs.len(), 1);
    assert_eq!(summary.epochs[0].total, 16);
    assert_eq!(summary.artifact, Some(dir.path().join("mnist.mpk")));
    assert!(dir.path().join("mnist.mpk").is_file());
    Ok(())
}

#[test]
fn test_torch_recipe_pretrained_missing_fails() {
    let device = Default::default();
    let mut tracker = ExperimentTracker::new("MNIST", "pretrained");
    let dir = tempfile::tempdir().unwrap();

    let cfg = TorchRecipeConfig {
        use_pretrained: true,
        pretrained_model_name: dir.path().join("absent").display().to_string(),
        ..TorchRecipeConfig::default()
    };
    let result = train_torch::<TestAutodiffBackend, _, _>(
        &cfg,
        two_class_dataset(4),
        two_class_dataset(4),
        &device,
        &mut tracker,
    );
    assert!(result.is_err());
}

#[test]
fn test_keras_recipe_learns_two_classes() -> Result<()> {
    let device = Default::default();
    let dir = tempfile::tempdir()?;
    let memory = MemorySink::new();
    let mut tracker = ExperimentTracker::new("MNIST", "keras-test").with_sink(memory.clone());

    let cfg = KerasRecipeConfig {
        epochs: 5,
        batch_size: 8,
        learning_rate: 0.01,
        artifact_dir: Some(dir.path().to_path_buf()),
        ..KerasRecipeConfig::default()
    };

    let (_model, summary) = train_keras::<TestAutodiffBackend, _, _>(
        &cfg,
        two_class_dataset(64),
        two_class_dataset(20),
        &device,
        &mut tracker,
    )?;

    assert_eq!(memory.scalars("train", "loss").len(), 5);
    assert_eq!(memory.scalars("train", "accuracy").len(), 5);
    assert_eq!(memory.scalars("validation", "loss").len(), 5);

    let final_accuracy = summary.final_accuracy().unwrap();
    assert!(final_accuracy >= 0.9, "accuracy {}", final_accuracy);
    assert!(dir.path().join("mnist_dense.mpk").is_file());
    Ok(())
}

#[test]
fn test_run_training_from_idx_directory() -> Result<()> {
    let device = Default::default();
    let data_dir = tempfile::tempdir()?;
    let artifacts = tempfile::tempdir()?;

    let pixels: Vec<u8> = (0..4)
        .flat_map(|i| two_class_item((i % 2) as u8, 0.0).image.concat())
        .map(|p| p as u8)
        .collect();
    for prefix in ["train", "t10k"] {
        std::fs::write(
            data_dir.path().join(format!("{}-images-idx3-ubyte", prefix)),
            idx_images(&pixels, 4),
        )?;
        std::fs::write(
            data_dir.path().join(format!("{}-labels-idx1-ubyte", prefix)),
            idx_labels(&[0, 1, 0, 1]),
        )?;
    }

    let overrides = TrainingOverrides {
        epochs: Some(1),
        batch_size: Some(2),
        ..TrainingOverrides::default()
    };
    let config = FrameworkConfig::from_overrides(Framework::Keras, &overrides).with_artifact_dir(artifacts.path());
    let mut tracker = ExperimentTracker::new("MNIST", "runner");

    let outcome = run_training::<TestAutodiffBackend>(
        &config,
        &MnistSource::Directory(data_dir.path().to_path_buf()),
        &device,
        &mut tracker,
    )?;
    assert_eq!(outcome.framework, Framework::Keras);
    assert_eq!(outcome.model_kind, ModelKind::DenseNet);
    assert_eq!(outcome.summary.epochs[0].total, 4);
    assert!(outcome.summary.artifact.is_some());

    // Missing files surface as errors
    let empty = tempfile::tempdir()?;
    assert!(run_training::<TestAutodiffBackend>(
        &config,
        &MnistSource::Directory(empty.path().to_path_buf()),
        &device,
        &mut tracker,
    )
    .is_err());
    Ok(())
}
