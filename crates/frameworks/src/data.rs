// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/frameworks/src/data.rs
use anyhow::{Context, Result};
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::vision::{MnistDataset, MnistItem};
use burn::data::dataset::{Dataset, InMemDataset};
use burn::prelude::*;
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;

pub const WIDTH: usize = 28;
pub const HEIGHT: usize = 28;
pub const NUM_CLASSES: usize = 10;

const IMAGE_MAGIC: u32 = 2051;
const LABEL_MAGIC: u32 = 2049;

/// Where the MNIST splits come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MnistSource {
    /// Fetch from the public mirror into the burn dataset cache.
    Download,
    /// IDX files (optionally gzipped) in a local directory.
    Directory(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    fn file_names(&self) -> (&'static str, &'static str) {
        match self {
            Split::Train => ("train-images-idx3-ubyte", "train-labels-idx1-ubyte"),
            Split::Test => ("t10k-images-idx3-ubyte", "t10k-labels-idx1-ubyte"),
        }
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    let chunk = bytes
        .get(offset..offset + 4)
        .ok_or_else(|| anyhow::anyhow!("IDX header truncated at byte {}", offset))?;
    Ok(u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

/// Parse an IDX3 image file into 28x28 pixel grids (values 0..=255).
pub fn parse_idx_images(bytes: &[u8]) -> Result<Vec<[[f32; WIDTH]; HEIGHT]>> {
    let magic = read_u32(bytes, 0)?;
    if magic != IMAGE_MAGIC {
        anyhow::bail!("Bad IDX image magic number {} (expected {})", magic, IMAGE_MAGIC);
    }
    let count = read_u32(bytes, 4)? as usize;
    let rows = read_u32(bytes, 8)? as usize;
    let cols = read_u32(bytes, 12)? as usize;
    if rows != HEIGHT || cols != WIDTH {
        anyhow::bail!("Unexpected image size {}x{} (expected {}x{})", rows, cols, HEIGHT, WIDTH);
    }

    let pixels = &bytes[16..];
    if pixels.len() != count * WIDTH * HEIGHT {
        anyhow::bail!(
            "IDX image payload is {} bytes, header announces {} images",
            pixels.len(),
            count
        );
    }

    Ok(pixels
        .chunks_exact(WIDTH * HEIGHT)
        .map(|chunk| {
            let mut image = [[0f32; WIDTH]; HEIGHT];
            for (i, pixel) in chunk.iter().enumerate() {
                image[i / WIDTH][i % WIDTH] = *pixel as f32;
            }
            image
        })
        .collect())
}

/// Parse an IDX1 label file.
pub fn parse_idx_labels(bytes: &[u8]) -> Result<Vec<u8>> {
    let magic = read_u32(bytes, 0)?;
    if magic != LABEL_MAGIC {
        anyhow::bail!("Bad IDX label magic number {} (expected {})", magic, LABEL_MAGIC);
    }
    let count = read_u32(bytes, 4)? as usize;
    let labels = &bytes[8..];
    if labels.len() != count {
        anyhow::bail!(
            "IDX label payload is {} bytes, header announces {} labels",
            labels.len(),
            count
        );
    }
    if let Some(bad) = labels.iter().find(|l| **l as usize >= NUM_CLASSES) {
        anyhow::bail!("Label {} out of range", bad);
    }
    Ok(labels.to_vec())
}

/// Read `dir/name`, falling back to `dir/name.gz`.
fn read_maybe_gz(dir: &Path, name: &str) -> Result<Vec<u8>> {
    let raw = dir.join(name);
    if raw.is_file() {
        return std::fs::read(&raw).with_context(|| format!("Failed to read {:?}", raw));
    }

    let gz = dir.join(format!("{}.gz", name));
    let file = std::fs::File::open(&gz)
        .with_context(|| format!("Neither {:?} nor {:?} could be opened", raw, gz))?;
    let mut bytes = Vec::new();
    GzDecoder::new(file)
        .read_to_end(&mut bytes)
        .with_context(|| format!("Failed to decompress {:?}", gz))?;
    Ok(bytes)
}

/// Load one split from a directory of IDX files.
pub fn load_split(dir: &Path, split: Split) -> Result<InMemDataset<MnistItem>> {
    let (images_name, labels_name) = split.file_names();
    let images = parse_idx_images(&read_maybe_gz(dir, images_name)?)
        .with_context(|| format!("Invalid image file {} in {:?}", images_name, dir))?;
    let labels = parse_idx_labels(&read_maybe_gz(dir, labels_name)?)
        .with_context(|| format!("Invalid label file {} in {:?}", labels_name, dir))?;

    if images.len() != labels.len() {
        anyhow::bail!(
            "{:?} split has {} images but {} labels",
            split,
            images.len(),
            labels.len()
        );
    }

    info!("Loaded {:?} split: {} items from {:?}", split, images.len(), dir);
    let items = images
        .into_iter()
        .zip(labels)
        .map(|(image, label)| MnistItem { image, label })
        .collect();
    Ok(InMemDataset::new(items))
}

/// A type-erased split, whichever source it came from.
pub type MnistSplit = Box<dyn Dataset<MnistItem>>;

impl MnistSource {
    /// Train and test splits.
    pub fn load(&self) -> Result<(MnistSplit, MnistSplit)> {
        match self {
            MnistSource::Download => {
                info!("Loading MNIST through the burn dataset cache");
                Ok((Box::new(MnistDataset::train()), Box::new(MnistDataset::test())))
            }
            MnistSource::Directory(dir) => Ok((
                Box::new(load_split(dir, Split::Train)?),
                Box::new(load_split(dir, Split::Test)?),
            )),
        }
    }
}

/// Pixel scaling applied by the batcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Normalization {
    /// `(x / 255 - mean) / std`
    Standardize { mean: f64, std: f64 },
    /// `x / 255`
    UnitRange,
}

impl Normalization {
    /// MNIST mean and standard deviation.
    pub fn standard() -> Self {
        Normalization::Standardize {
            mean: 0.1307,
            std: 0.3081,
        }
    }

    pub fn apply<B: Backend, const D: usize>(&self, pixels: Tensor<B, D>) -> Tensor<B, D> {
        let scaled = pixels.div_scalar(255.0);
        match *self {
            Normalization::Standardize { mean, std } => scaled.sub_scalar(mean).div_scalar(std),
            Normalization::UnitRange => scaled,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MnistBatcher<B: Backend> {
    device: B::Device,
    normalization: Normalization,
}

#[derive(Clone, Debug)]
pub struct MnistBatch<B: Backend> {
    /// `[batch, 1, 28, 28]`
    pub images: Tensor<B, 4>,
    /// `[batch]`
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> MnistBatcher<B> {
    pub fn new(device: B::Device, normalization: Normalization) -> Self {
        Self {
            device,
            normalization,
        }
    }
}

impl<B: Backend> Batcher<MnistItem, MnistBatch<B>> for MnistBatcher<B> {
    fn batch(&self, items: Vec<MnistItem>) -> MnistBatch<B> {
        let images = items
            .iter()
            .map(|item| TensorData::from(item.image).convert::<B::FloatElem>())
            .map(|data| Tensor::<B, 2>::from_data(data, &self.device))
            .map(|tensor| tensor.reshape([1, 1, HEIGHT, WIDTH]))
            .map(|tensor| self.normalization.apply(tensor))
            .collect();

        let targets = items
            .iter()
            .map(|item| {
                Tensor::<B, 1, Int>::from_data([(item.label as i64).elem::<B::IntElem>()], &self.device)
            })
            .collect();

        MnistBatch {
            images: Tensor::cat(images, 0),
            targets: Tensor::cat(targets, 0),
        }
    }
}
