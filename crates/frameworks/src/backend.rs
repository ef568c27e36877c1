// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Compute backend used by the command-line front-end.
//!
//! CPU `NdArray` unless the `libtorch` feature is enabled.

use burn::backend::Autodiff;
use burn::prelude::Backend;
use tracing::info;

#[cfg(not(feature = "libtorch"))]
pub type InferenceBackend = burn::backend::NdArray<f32>;

#[cfg(feature = "libtorch")]
pub type InferenceBackend = burn::backend::LibTorch<f32>;

pub type TrainingBackend = Autodiff<InferenceBackend>;

pub type Device = <InferenceBackend as Backend>::Device;

#[cfg(not(feature = "libtorch"))]
pub fn select_device(no_cuda: bool) -> Device {
    if !no_cuda {
        info!("Built without the libtorch feature, training on CPU");
    }
    burn::backend::ndarray::NdArrayDevice::Cpu
}

#[cfg(feature = "libtorch")]
pub fn select_device(no_cuda: bool) -> Device {
    use burn::backend::libtorch::LibTorchDevice;

    if no_cuda {
        info!("Using LibTorch CPU device");
        LibTorchDevice::Cpu
    } else {
        info!("Using LibTorch CUDA device 0");
        LibTorchDevice::Cuda(0)
    }
}
