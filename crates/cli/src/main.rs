// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mnist_lab_core::config::{yaml_to_json, ExperimentConfig, StorageConfig, TrainingOverrides};
use mnist_lab_core::tracker::{ExperimentTracker, LogSink};
use mnist_lab_frameworks::backend::{select_device, InferenceBackend, TrainingBackend};
use mnist_lab_frameworks::{predict, run_training, Framework, FrameworkConfig, MnistSource, TrainingOutcome};
use mnist_lab_storage::{BucketProvider, LocalBuckets, ObjectStorage, RetryPolicy, S3Buckets, ZipMode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// mnist-lab – MNIST training recipes with experiment tracking, object storage and serving config
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a model locally
    Train {
        /// Optional experiment YAML supplying training defaults and tracker output
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        training: TrainingArgs,
    },
    /// Run a tracked experiment: fetch data, train, write serving config, upload artifacts
    Experiment {
        /// Path to an experiment YAML config file
        #[arg(short, long)]
        config: PathBuf,

        #[command(flatten)]
        training: TrainingArgs,

        /// Zip archive key in the data bucket to extract into the data directory
        #[arg(long)]
        fetch_data: Option<String>,

        /// Upload the model and serving config to the model bucket
        #[arg(long)]
        upload: bool,

        /// Serve buckets from directories under this root instead of S3
        #[arg(long)]
        local_root: Option<PathBuf>,
    },
    /// Validate an experiment config without running it
    Validate {
        /// Path to an experiment YAML config file
        #[arg(short, long)]
        config: PathBuf,

        /// Convert YAML to JSON and print it
        #[arg(long)]
        to_json: bool,
    },
    /// Write a Triton config.pbtxt for a framework's model
    ServingConfig {
        /// torch or keras
        #[arg(short, long, default_value = "torch")]
        framework: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Model name written into the config
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        max_batch_size: Option<u32>,
    },
    /// Move files between the local disk and object storage
    Storage {
        #[command(flatten)]
        target: StorageArgs,

        #[command(subcommand)]
        action: StorageAction,
    },
    /// Classify a digit image with saved weights
    Predict {
        /// torch or keras
        #[arg(short, long, default_value = "torch")]
        framework: String,

        /// Saved model (with or without the .mpk extension)
        #[arg(short, long)]
        model: PathBuf,

        /// Image file (png or jpeg)
        #[arg(short, long)]
        image: PathBuf,

        /// Disables CUDA
        #[arg(long)]
        no_cuda: bool,
    },
}

/// Training hyper-parameters. Anything set here wins over the config file.
#[derive(clap::Args, Debug, Clone)]
struct TrainingArgs {
    /// torch or keras
    #[arg(short, long)]
    framework: Option<String>,

    /// Disables CUDA training
    #[arg(long)]
    no_cuda: bool,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// How many batches to wait before logging training status
    #[arg(long)]
    log_interval: Option<usize>,

    /// Input batch size for training
    #[arg(long)]
    batch_size: Option<usize>,

    /// Input batch size for testing
    #[arg(long)]
    test_batch_size: Option<usize>,

    /// Number of epochs to train
    #[arg(long)]
    epochs: Option<usize>,

    /// Learning rate
    #[arg(long)]
    learn_rate: Option<f64>,

    /// SGD momentum
    #[arg(long)]
    momentum: Option<f64>,

    /// Data loading threads
    #[arg(long)]
    num_workers: Option<usize>,

    /// Skip saving the model
    #[arg(long)]
    no_save: bool,

    /// Model file stem
    #[arg(long)]
    save_name: Option<String>,

    /// Start from pretrained weights
    #[arg(long)]
    use_pretrained: bool,

    /// Path to pretrained weights
    #[arg(long)]
    pretrained_model_name: Option<String>,

    /// Directory holding the MNIST IDX files (downloads when absent)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Where models and serving configs are written
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct StorageArgs {
    /// Experiment config holding the storage section
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bucket to use instead of the configured data/model bucket
    #[arg(long)]
    bucket: Option<String>,

    /// Serve buckets from directories under this root instead of S3
    #[arg(long)]
    local_root: Option<PathBuf>,

    /// Attempts per transfer
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,

    /// Seconds to wait between attempts
    #[arg(long, default_value_t = 1)]
    retry_wait: u64,
}

#[derive(Subcommand, Debug)]
enum StorageAction {
    /// Download one object
    Download {
        key: String,
        dest: PathBuf,
    },
    /// Download a zip object and extract it
    DownloadZip {
        key: String,
        dest_dir: PathBuf,

        /// Extract from memory instead of a temporary file
        #[arg(long)]
        in_memory: bool,

        /// Directory for the temporary archive
        #[arg(long)]
        temp_dir: Option<PathBuf>,

        /// Keep the temporary archive after extraction
        #[arg(long)]
        keep_temp: bool,
    },
    /// Download every object under a prefix
    DownloadFolder {
        prefix: String,
        dest_dir: PathBuf,
    },
    /// Upload one file
    Upload {
        path: PathBuf,
        key: String,
    },
    /// Upload a directory tree under a prefix
    UploadFolder {
        dir: PathBuf,
        prefix: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file early for S3 credentials
    dotenvy::dotenv().ok(); // Ignore errors if .env doesn't exist

    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "info" } else { "warn" };
    // Target prefix covers mnist_lab_core, mnist_lab_storage and mnist_lab_frameworks too
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("mnist_lab={}", log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("mnist-lab v{} starting", env!("CARGO_PKG_VERSION"));

    match args.command {
        Commands::Train { config, training } => run_train(config.as_deref(), training).await,
        Commands::Experiment {
            config,
            training,
            fetch_data,
            upload,
            local_root,
        } => run_experiment(&config, training, fetch_data.as_deref(), upload, local_root.as_deref()).await,
        Commands::Validate { config, to_json } => validate_config(&config, to_json),
        Commands::ServingConfig {
            framework,
            output,
            name,
            max_batch_size,
        } => write_serving_config(&framework, &output, name.as_deref(), max_batch_size),
        Commands::Storage { target, action } => run_storage(target, action).await,
        Commands::Predict {
            framework,
            model,
            image,
            no_cuda,
        } => run_predict(&framework, &model, &image, no_cuda),
    }
}

impl TrainingArgs {
    /// Layer command-line values over `base`.
    fn merge(&self, mut base: TrainingOverrides) -> TrainingOverrides {
        if let Some(v) = &self.framework {
            base.framework = Some(v.clone());
        }
        if let Some(v) = self.seed {
            base.seed = Some(v);
        }
        if let Some(v) = self.log_interval {
            base.log_interval = Some(v);
        }
        if let Some(v) = self.batch_size {
            base.batch_size = Some(v);
        }
        if let Some(v) = self.test_batch_size {
            base.test_batch_size = Some(v);
        }
        if let Some(v) = self.epochs {
            base.epochs = Some(v);
        }
        if let Some(v) = self.learn_rate {
            base.learn_rate = Some(v);
        }
        if let Some(v) = self.momentum {
            base.momentum = Some(v);
        }
        if let Some(v) = self.num_workers {
            base.num_workers = Some(v);
        }
        if self.no_save {
            base.save_model = Some(false);
        }
        if let Some(v) = &self.save_name {
            base.save_name = Some(v.clone());
        }
        if self.use_pretrained {
            base.use_pretrained = Some(true);
        }
        if let Some(v) = &self.pretrained_model_name {
            base.pretrained_model_name = Some(v.clone());
        }
        if let Some(v) = &self.data_dir {
            base.data_dir = Some(v.display().to_string());
        }
        base
    }
}

/// Everything needed to start a training run.
struct TrainingPlan {
    framework: Framework,
    recipe: FrameworkConfig,
    source: MnistSource,
    artifact_dir: PathBuf,
    save_name: String,
    no_cuda: bool,
}

fn plan_training(args: &TrainingArgs, overrides: &TrainingOverrides, default_artifacts: PathBuf) -> Result<TrainingPlan> {
    let framework: Framework = overrides.framework.as_deref().unwrap_or("torch").parse()?;
    let artifact_dir = args.output_dir.clone().unwrap_or(default_artifacts);
    let recipe = FrameworkConfig::from_overrides(framework, overrides).with_artifact_dir(&artifact_dir);
    recipe.validate()?;

    let save_name = match framework {
        Framework::Torch => recipe.torch.as_ref().map(|c| c.save_name.clone()),
        Framework::Keras => recipe.keras.as_ref().map(|c| c.save_name.clone()),
    }
    .unwrap_or_else(|| "mnist".to_string());

    let source = match &overrides.data_dir {
        Some(dir) => MnistSource::Directory(PathBuf::from(dir)),
        None => MnistSource::Download,
    };

    Ok(TrainingPlan {
        framework,
        recipe,
        source,
        artifact_dir,
        save_name,
        no_cuda: args.no_cuda,
    })
}

/// Train on a blocking thread; the tracker travels with the job.
async fn train_blocking(plan: &TrainingPlan, tracker: ExperimentTracker) -> Result<(ExperimentTracker, TrainingOutcome)> {
    let recipe = plan.recipe.clone();
    let source = plan.source.clone();
    let no_cuda = plan.no_cuda;

    let (tracker, outcome) = tokio::task::spawn_blocking(move || {
        let mut tracker = tracker;
        let device = select_device(no_cuda);
        let outcome = run_training::<TrainingBackend>(&recipe, &source, &device, &mut tracker);
        (tracker, outcome)
    })
    .await
    .context("Training task panicked")?;

    Ok((tracker, outcome?))
}

async fn run_train(config_path: Option<&Path>, args: TrainingArgs) -> Result<()> {
    let experiment = match config_path {
        Some(path) => {
            let config = ExperimentConfig::from_yaml_file(path)?;
            config.validate()?;
            Some(config)
        }
        None => None,
    };

    let base = experiment.as_ref().map(ExperimentConfig::training).unwrap_or_default();
    let overrides = args.merge(base);

    let tracker = match experiment.as_ref().and_then(|c| c.tracker.as_ref()) {
        Some(tracker_cfg) => ExperimentTracker::init(tracker_cfg)?,
        None => ExperimentTracker::new("MNIST", "local").with_sink(LogSink),
    };

    let plan = plan_training(&args, &overrides, std::env::temp_dir())?;
    info!("Training {} flavour, artifacts in {}", plan.framework.as_str(), plan.artifact_dir.display());

    let (mut tracker, outcome) = train_blocking(&plan, tracker).await?;
    tracker.finalize()?;
    outcome.summary.print_summary();
    Ok(())
}

async fn run_experiment(
    config_path: &Path,
    args: TrainingArgs,
    fetch_data: Option<&str>,
    upload: bool,
    local_root: Option<&Path>,
) -> Result<()> {
    info!("Loading experiment config from: {:?}", config_path);
    let config = ExperimentConfig::from_yaml_file(config_path)?;
    config.validate()?;

    let tracker_cfg = config.require_tracker()?;
    let tracker = ExperimentTracker::init(tracker_cfg)?;
    let run = tracker.run().clone();

    let mut overrides = args.merge(config.training());
    let default_artifacts = tracker
        .run_dir()
        .map(|dir| dir.join("model"))
        .unwrap_or_else(|| std::env::temp_dir().join(run.run_id.to_string()));

    if let Some(key) = fetch_data {
        let storage_cfg = config.require_storage()?;
        let data_dir = overrides
            .data_dir
            .clone()
            .map(PathBuf::from)
            .unwrap_or_else(|| default_artifacts.with_file_name("data"));
        let storage = open_storage(storage_cfg, &storage_cfg.data_bucket, local_root, RetryPolicy::default())?;
        let files = storage
            .download_zipped_file(key, &data_dir, None, ZipMode::default())
            .await
            .with_context(|| format!("Failed to fetch dataset {} from bucket {}", key, storage_cfg.data_bucket))?;
        info!("Fetched {} dataset files into {}", files.len(), data_dir.display());
        overrides.data_dir = Some(data_dir.display().to_string());
    }

    let plan = plan_training(&args, &overrides, default_artifacts)?;
    let (mut tracker, outcome) = train_blocking(&plan, tracker).await?;

    let mut serving = outcome.model_kind.serving_config(
        config
            .serving
            .as_ref()
            .and_then(|s| s.model_name.as_deref())
            .unwrap_or(&plan.save_name),
    );
    if let Some(max_batch_size) = config.serving.as_ref().and_then(|s| s.max_batch_size) {
        serving = serving.with_max_batch_size(max_batch_size);
    }
    let serving_path = plan.artifact_dir.join("config.pbtxt");
    serving.write_to(&serving_path)?;
    tracker.report_text(format!("Serving config written to {}", serving_path.display()))?;

    if upload {
        let storage_cfg = config.require_storage()?;
        let storage = open_storage(storage_cfg, &storage_cfg.model_bucket, local_root, RetryPolicy::default())?;
        let prefix = format!("{}/{}/{}", run.project_name, run.task_name, run.run_id);

        let mut files = vec![serving_path.clone()];
        match &outcome.summary.artifact {
            Some(artifact) => files.push(artifact.clone()),
            None => warn!("Model saving disabled, uploading serving config only"),
        }
        for file in &files {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .context("Artifact path has no file name")?;
            let key = format!("{}/{}", prefix, name);
            storage
                .upload_file(file, &key, None)
                .await
                .with_context(|| format!("Failed to upload {}", file.display()))?;
        }
        tracker.report_text(format!(
            "Uploaded {} artifacts to s3://{}/{}",
            files.len(),
            storage.default_bucket(),
            prefix
        ))?;
    }

    tracker.finalize()?;
    outcome.summary.print_summary();
    println!("Run {} complete", run.run_id);
    Ok(())
}

fn open_storage(
    cfg: &StorageConfig,
    bucket: &str,
    local_root: Option<&Path>,
    retry: RetryPolicy,
) -> Result<ObjectStorage> {
    let provider: Arc<dyn BucketProvider> = match local_root {
        Some(root) => {
            info!("Using local buckets under {}", root.display());
            Arc::new(LocalBuckets::new(root))
        }
        None => Arc::new(S3Buckets::new(cfg.to_s3_settings()?)?),
    };
    Ok(ObjectStorage::new(bucket, provider).with_retry(retry))
}

fn validate_config(config_path: &Path, to_json: bool) -> Result<()> {
    info!("Validating experiment config: {:?}", config_path);

    let yaml_content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file {:?}", config_path))?;

    if to_json {
        // Convert YAML to JSON and print
        println!("{}", yaml_to_json(&yaml_content)?);
        return Ok(());
    }

    let config = ExperimentConfig::from_yaml(&yaml_content)?;
    config.validate()?;
    println!("✅ YAML parsing: SUCCESS");

    match &config.tracker {
        Some(t) => println!(
            "✅ Tracker: project={}, task={}, output={}",
            t.project_name,
            t.task_name,
            if t.output_enabled() { t.output_dir() } else { "disabled" }
        ),
        None => println!("  - Tracker: not configured"),
    }
    match &config.storage {
        Some(s) => println!(
            "✅ Storage: {} (region {}, data bucket {}, model bucket {})",
            s.url,
            s.region(),
            s.data_bucket,
            s.model_bucket
        ),
        None => println!("  - Storage: not configured"),
    }

    let overrides = config.training();
    let framework: Framework = overrides.framework.as_deref().unwrap_or("torch").parse()?;
    let recipe = FrameworkConfig::from_overrides(framework, &overrides);
    recipe.validate()?;
    println!("✅ Framework: {}", framework.as_str());
    if let Some(torch) = &recipe.torch {
        println!(
            "  - Torch: epochs={}, batch_size={}, test_batch_size={}, lr={}, momentum={}",
            torch.epochs, torch.batch_size, torch.test_batch_size, torch.learn_rate, torch.momentum
        );
    }
    if let Some(keras) = &recipe.keras {
        println!(
            "  - Keras: epochs={}, batch_size={}, lr={}",
            keras.epochs, keras.batch_size, keras.learning_rate
        );
    }

    println!("🎉 Experiment configuration is valid and ready to run!");
    Ok(())
}

fn write_serving_config(framework: &str, output: &Path, name: Option<&str>, max_batch_size: Option<u32>) -> Result<()> {
    let framework: Framework = framework.parse()?;
    let mut config = framework.model_kind().serving_config(name.unwrap_or("mnist"));
    if let Some(max_batch_size) = max_batch_size {
        config = config.with_max_batch_size(max_batch_size);
    }
    config.write_to(output)?;
    println!("✅ Serving config written to {}", output.display());
    Ok(())
}

async fn run_storage(target: StorageArgs, action: StorageAction) -> Result<()> {
    let config = match &target.config {
        Some(path) => Some(ExperimentConfig::from_yaml_file(path)?),
        None => None,
    };
    let storage_cfg = config.as_ref().and_then(|c| c.storage.as_ref());

    let is_upload = matches!(action, StorageAction::Upload { .. } | StorageAction::UploadFolder { .. });
    let bucket = match (&target.bucket, storage_cfg) {
        (Some(bucket), _) => bucket.clone(),
        (None, Some(cfg)) if is_upload => cfg.model_bucket.clone(),
        (None, Some(cfg)) => cfg.data_bucket.clone(),
        (None, None) => anyhow::bail!("No bucket given: pass --bucket or a config with a storage section"),
    };

    let retry = RetryPolicy::new(target.max_attempts, Duration::from_secs(target.retry_wait));
    let storage = match (target.local_root.as_deref(), storage_cfg) {
        (Some(root), _) => ObjectStorage::new(bucket, Arc::new(LocalBuckets::new(root))).with_retry(retry),
        (None, Some(cfg)) => open_storage(cfg, &bucket, None, retry)?,
        (None, None) => anyhow::bail!("No storage configured: pass --local-root or a config with a storage section"),
    };

    match action {
        StorageAction::Download { key, dest } => {
            let bytes = storage.download_file(&key, &dest, None).await?;
            println!("Downloaded {} ({} bytes) to {}", key, bytes, dest.display());
        }
        StorageAction::DownloadZip {
            key,
            dest_dir,
            in_memory,
            temp_dir,
            keep_temp,
        } => {
            let mode = if in_memory {
                ZipMode::InMemory
            } else {
                ZipMode::TempFile {
                    temp_dir: temp_dir.unwrap_or_else(std::env::temp_dir),
                    remove_temp: !keep_temp,
                }
            };
            let files = storage.download_zipped_file(&key, &dest_dir, None, mode).await?;
            println!("Extracted {} files from {} to {}", files.len(), key, dest_dir.display());
        }
        StorageAction::DownloadFolder { prefix, dest_dir } => {
            let count = storage.download_folder(&prefix, &dest_dir, None).await?;
            println!("Downloaded {} files from {} to {}", count, prefix, dest_dir.display());
        }
        StorageAction::Upload { path, key } => {
            let bytes = storage.upload_file(&path, &key, None).await?;
            println!("Uploaded {} ({} bytes) to {}", path.display(), bytes, key);
        }
        StorageAction::UploadFolder { dir, prefix } => {
            let count = storage.upload_folder(&dir, &prefix, None).await?;
            println!("Uploaded {} files from {} to {}", count, dir.display(), prefix);
        }
    }
    Ok(())
}

fn run_predict(framework: &str, model: &Path, image: &Path, no_cuda: bool) -> Result<()> {
    let framework: Framework = framework.parse()?;
    let device = select_device(no_cuda);
    let prediction = predict::<InferenceBackend>(framework.model_kind(), model, image, &device)?;

    println!("Predicted digit: {}", prediction.digit);
    let scores: Vec<String> = prediction.scores.iter().map(|s| format!("{:.4}", s)).collect();
    println!("Scores: [{}]", scores.join(", "));
    Ok(())
}
