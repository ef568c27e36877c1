// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Artifact storage for mnist-lab.
//!
//! Thin layer over `object_store` that moves datasets and trained models
//! between the local filesystem and S3-compatible buckets (MinIO, Ceph, AWS).
//! Every remote call goes through a fixed-count [`RetryPolicy`].

pub mod archive;
pub mod buckets;
pub mod error;
pub mod retry;
pub mod store;

pub use buckets::{BucketProvider, LocalBuckets, MemoryBuckets, S3Buckets, S3Settings};
pub use error::StorageError;
pub use retry::RetryPolicy;
pub use store::{object_path, ObjectStorage, ZipMode};
