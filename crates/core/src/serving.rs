// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/serving.rs
//! Triton Inference Server `config.pbtxt` generation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    TensorflowSavedModel,
    PytorchLibtorch,
    OnnxRuntime,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::TensorflowSavedModel => "tensorflow_savedmodel",
            Platform::PytorchLibtorch => "pytorch_libtorch",
            Platform::OnnxRuntime => "onnxruntime_onnx",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Fp16,
    Fp32,
    Fp64,
    Int32,
    Int64,
    Uint8,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Fp16 => "TYPE_FP16",
            DataType::Fp32 => "TYPE_FP32",
            DataType::Fp64 => "TYPE_FP64",
            DataType::Int32 => "TYPE_INT32",
            DataType::Int64 => "TYPE_INT64",
            DataType::Uint8 => "TYPE_UINT8",
        }
    }
}

/// One named tensor. A dim of `-1` is dynamic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub data_type: DataType,
    pub dims: Vec<i64>,
}

impl TensorSpec {
    pub fn fp32(name: impl Into<String>, dims: &[i64]) -> Self {
        Self {
            name: name.into(),
            data_type: DataType::Fp32,
            dims: dims.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServingConfig {
    pub name: Option<String>,
    pub platform: Platform,
    pub max_batch_size: Option<u32>,
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}

impl ServingConfig {
    /// SavedModel signature with explicit tensor names.
    pub fn tensorflow(input_name: &str, input_dims: &[i64], output_name: &str, output_dims: &[i64]) -> Self {
        Self {
            name: None,
            platform: Platform::TensorflowSavedModel,
            max_batch_size: None,
            inputs: vec![TensorSpec::fp32(input_name, input_dims)],
            outputs: vec![TensorSpec::fp32(output_name, output_dims)],
        }
    }

    /// TorchScript signature. LibTorch models have no tensor names, so Triton's
    /// `input__0` / `output__0` convention is used.
    pub fn torchscript(input_dims: &[i64], output_dims: &[i64]) -> Self {
        Self {
            name: None,
            platform: Platform::PytorchLibtorch,
            max_batch_size: None,
            inputs: vec![TensorSpec::fp32("input__0", input_dims)],
            outputs: vec![TensorSpec::fp32("output__0", output_dims)],
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: u32) -> Self {
        self.max_batch_size = Some(max_batch_size);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() || self.outputs.is_empty() {
            anyhow::bail!("serving config needs at least one input and one output");
        }
        for spec in self.inputs.iter().chain(&self.outputs) {
            if spec.name.trim().is_empty() {
                anyhow::bail!("tensor names must not be empty");
            }
            if spec.dims.is_empty() {
                anyhow::bail!("tensor {} has no dims", spec.name);
            }
            if let Some(dim) = spec.dims.iter().find(|d| **d < -1 || **d == 0) {
                anyhow::bail!("tensor {} has invalid dim {}", spec.name, dim);
            }
        }
        if self.max_batch_size == Some(0) {
            anyhow::bail!("max_batch_size must be > 0 if specified");
        }
        Ok(())
    }

    /// Textual protobuf as read by Triton.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(name) = &self.name {
            let _ = writeln!(out, "name: \"{}\"", name);
        }
        let _ = writeln!(out, "platform: \"{}\"", self.platform.as_str());
        if let Some(max_batch_size) = self.max_batch_size {
            let _ = writeln!(out, "max_batch_size: {}", max_batch_size);
        }
        render_block(&mut out, "input", &self.inputs);
        render_block(&mut out, "output", &self.outputs);
        out
    }

    /// Validate and write to `path`, creating parent directories.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.validate()?;
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }
        std::fs::write(path, self.render())
            .with_context(|| format!("Failed to write serving config {:?}", path))
    }
}

fn render_block(out: &mut String, label: &str, specs: &[TensorSpec]) {
    let _ = writeln!(out, "{} [", label);
    for (i, spec) in specs.iter().enumerate() {
        let dims = spec
            .dims
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "  {{");
        let _ = writeln!(out, "    name: \"{}\"", spec.name);
        let _ = writeln!(out, "    data_type: {}", spec.data_type.as_str());
        let _ = writeln!(out, "    dims: [{}]", dims);
        let sep = if i + 1 < specs.len() { "," } else { "" };
        let _ = writeln!(out, "  }}{}", sep);
    }
    let _ = writeln!(out, "]");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_tensorflow() {
        let cfg = ServingConfig::tensorflow("flatten_input", &[-1, 28, 28, 1], "dense_1", &[-1, 10]);
        let expected = "\
platform: \"tensorflow_savedmodel\"
input [
  {
    name: \"flatten_input\"
    data_type: TYPE_FP32
    dims: [-1, 28, 28, 1]
  }
]
output [
  {
    name: \"dense_1\"
    data_type: TYPE_FP32
    dims: [-1, 10]
  }
]
";
        assert_eq!(cfg.render(), expected);
    }

    #[test]
    fn test_render_torchscript_with_name_and_batching() {
        let cfg = ServingConfig::torchscript(&[1, 28, 28], &[10])
            .with_name("mnist")
            .with_max_batch_size(64);
        let text = cfg.render();
        assert!(text.starts_with("name: \"mnist\"\nplatform: \"pytorch_libtorch\"\nmax_batch_size: 64\n"));
        assert!(text.contains("name: \"input__0\""));
        assert!(text.contains("name: \"output__0\""));
        assert!(text.contains("dims: [1, 28, 28]"));
    }

    #[test]
    fn test_multiple_inputs_are_comma_separated() {
        let mut cfg = ServingConfig::torchscript(&[-1, 4], &[-1, 2]);
        cfg.inputs.push(TensorSpec::fp32("input__1", &[-1, 3]));
        let text = cfg.render();
        assert!(text.contains("  },\n  {\n    name: \"input__1\""));
    }

    #[test]
    fn test_validation() {
        assert!(ServingConfig::torchscript(&[-1, 784], &[-1, 10]).validate().is_ok());
        assert!(ServingConfig::torchscript(&[-2, 784], &[-1, 10]).validate().is_err());
        assert!(ServingConfig::torchscript(&[], &[-1, 10]).validate().is_err());

        let mut no_outputs = ServingConfig::torchscript(&[-1], &[-1]);
        no_outputs.outputs.clear();
        assert!(no_outputs.validate().is_err());

        let zero_batch = ServingConfig::torchscript(&[-1], &[-1]).with_max_batch_size(0);
        assert!(zero_batch.validate().is_err());
    }

    #[test]
    fn test_write_to_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models/mnist/config.pbtxt");
        let cfg = ServingConfig::tensorflow("x", &[-1, 784], "y", &[-1, 10]);
        cfg.write_to(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), cfg.render());
    }
}
