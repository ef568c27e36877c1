// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/storage/src/store.rs
use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, PutPayload};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::archive::extract_archive;
use crate::{BucketProvider, RetryPolicy, StorageError};

/// How a zipped object is turned into files on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZipMode {
    /// Download to `<temp_dir>/<basename(key)>`, extract, optionally delete the archive.
    TempFile { temp_dir: PathBuf, remove_temp: bool },
    /// Extract straight from the downloaded bytes. Keeps the whole archive in memory.
    InMemory,
}

impl Default for ZipMode {
    fn default() -> Self {
        ZipMode::TempFile {
            temp_dir: std::env::temp_dir(),
            remove_temp: true,
        }
    }
}

/// Remote key and local file path for `filename` inside `folder`.
///
/// The local name flattens any `/` in `filename` into `_`.
pub fn object_path(folder: &str, filename: &str, local_folder: &Path) -> (String, PathBuf) {
    let key = if folder.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{}", folder.trim_end_matches('/'), filename)
    };
    let local = local_folder.join(filename.replace('/', "_"));
    (key, local)
}

/// Upload/download helper bound to a default bucket.
///
/// Every operation takes an optional bucket that overrides the default.
pub struct ObjectStorage {
    default_bucket: String,
    provider: Arc<dyn BucketProvider>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("default_bucket", &self.default_bucket)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ObjectStorage {
    pub fn new(default_bucket: impl Into<String>, provider: Arc<dyn BucketProvider>) -> Self {
        Self {
            default_bucket: default_bucket.into(),
            provider,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn default_bucket(&self) -> &str {
        &self.default_bucket
    }

    fn resolve<'a>(&'a self, bucket: Option<&'a str>) -> &'a str {
        bucket.unwrap_or(&self.default_bucket)
    }

    /// Fetch an object into memory.
    pub async fn get_bytes(&self, key: &str, bucket: Option<&str>) -> Result<Bytes, StorageError> {
        let bucket = self.resolve(bucket);
        let store = self.provider.bucket(bucket)?;
        let location = ObjectPath::from(key);
        let (store, location) = (&store, &location);

        self.retry
            .run(&format!("download s3://{}/{}", bucket, key), move || async move {
                let result = store.get(location).await?;
                Ok::<_, StorageError>(result.bytes().await?)
            })
            .await
    }

    /// Store `data` under `key`.
    pub async fn put_bytes(
        &self,
        key: &str,
        data: Bytes,
        bucket: Option<&str>,
    ) -> Result<(), StorageError> {
        let bucket = self.resolve(bucket);
        let store = self.provider.bucket(bucket)?;
        let location = ObjectPath::from(key);
        let (store, location, data) = (&store, &location, &data);

        self.retry
            .run(&format!("upload s3://{}/{}", bucket, key), move || async move {
                store.put(location, PutPayload::from(data.clone())).await?;
                Ok::<_, StorageError>(())
            })
            .await
    }

    /// Keys of every object under `prefix`.
    pub async fn list_keys(&self, prefix: &str, bucket: Option<&str>) -> Result<Vec<String>, StorageError> {
        let objects = self.list_objects(prefix, bucket).await?;
        Ok(objects.into_iter().map(|meta| meta.location.to_string()).collect())
    }

    async fn list_objects(&self, prefix: &str, bucket: Option<&str>) -> Result<Vec<ObjectMeta>, StorageError> {
        let bucket = self.resolve(bucket);
        let store = self.provider.bucket(bucket)?;
        let prefix_path = ObjectPath::from(prefix);
        let (store, prefix_path) = (&store, &prefix_path);

        self.retry
            .run(&format!("list s3://{}/{}", bucket, prefix), move || async move {
                let prefix = if prefix_path.as_ref().is_empty() {
                    None
                } else {
                    Some(prefix_path)
                };
                let objects: Vec<ObjectMeta> = store.list(prefix).try_collect().await?;
                Ok::<_, StorageError>(objects)
            })
            .await
    }

    /// Download a single object to `local_path`. Returns the number of bytes written.
    pub async fn download_file(
        &self,
        key: &str,
        local_path: impl AsRef<Path>,
        bucket: Option<&str>,
    ) -> Result<u64, StorageError> {
        let local_path = local_path.as_ref();
        debug!(
            "S3 - Downloading from s3://{}/{} to {}",
            self.resolve(bucket),
            key,
            local_path.display()
        );

        let data = self.get_bytes(key, bucket).await?;
        write_local(local_path, &data).await?;

        debug!("S3 - File successfully downloaded to {}", local_path.display());
        Ok(data.len() as u64)
    }

    /// Download a zip object and extract it below `local_dir`.
    pub async fn download_zipped_file(
        &self,
        key: &str,
        local_dir: impl AsRef<Path>,
        bucket: Option<&str>,
        mode: ZipMode,
    ) -> Result<Vec<PathBuf>, StorageError> {
        let local_dir = local_dir.as_ref().to_path_buf();
        let archive_key = key.to_string();

        let extracted = match mode {
            ZipMode::TempFile { temp_dir, remove_temp } => {
                let file_name = Path::new(key)
                    .file_name()
                    .map(|name| name.to_os_string())
                    .ok_or_else(|| StorageError::Config(format!("Key {} has no file name", key)))?;
                let temp_path = temp_dir.join(file_name);
                self.download_file(key, &temp_path, bucket).await?;

                info!(
                    "Local - Extracting contents from {} to {}",
                    temp_path.display(),
                    local_dir.display()
                );
                let archive_path = temp_path.clone();
                let extracted = tokio::task::spawn_blocking(move || {
                    let file = std::fs::File::open(&archive_path)
                        .map_err(|e| StorageError::io(&archive_path, e))?;
                    extract_archive(std::io::BufReader::new(file), &local_dir, &archive_key)
                })
                .await??;

                if remove_temp {
                    tokio::fs::remove_file(&temp_path)
                        .await
                        .map_err(|e| StorageError::io(&temp_path, e))?;
                    debug!("Local - {} has been deleted.", temp_path.display());
                }
                extracted
            }
            ZipMode::InMemory => {
                let data = self.get_bytes(key, bucket).await?;
                tokio::task::spawn_blocking(move || {
                    extract_archive(Cursor::new(data), &local_dir, &archive_key)
                })
                .await??
            }
        };

        info!("Local - {} files extracted from {}", extracted.len(), key);
        Ok(extracted)
    }

    /// Download every object under `prefix` into `local_dir`, keeping the
    /// layout relative to the prefix. Returns the number of files.
    pub async fn download_folder(
        &self,
        prefix: &str,
        local_dir: impl AsRef<Path>,
        bucket: Option<&str>,
    ) -> Result<usize, StorageError> {
        let local_dir = local_dir.as_ref();
        let bucket_name = self.resolve(bucket);
        info!(
            "S3 - Downloading files with the prefix: {} to the local directory: {}",
            prefix,
            local_dir.display()
        );

        let prefix_path = ObjectPath::from(prefix);
        let objects = self.list_objects(prefix, bucket).await?;
        let parents = parent_paths(&objects);
        let mut count = 0;
        for meta in objects {
            if meta.size == 0 && parents.contains(&meta.location) {
                debug!("S3 - Skipping folder marker {}", meta.location);
                continue;
            }
            let key = meta.location.to_string();
            let relative: Vec<String> = match meta.location.prefix_match(&prefix_path) {
                Some(parts) => parts.map(|part| part.as_ref().to_string()).collect(),
                None => continue,
            };
            if relative.is_empty() {
                continue;
            }
            let target = relative.iter().fold(local_dir.to_path_buf(), |path, part| path.join(part));
            self.download_file(&key, &target, Some(bucket_name)).await?;
            count += 1;
        }

        info!(
            "S3 - All {} files successfully downloaded to {}",
            count,
            local_dir.display()
        );
        Ok(count)
    }

    /// Upload a local file to `key`. Returns the number of bytes sent.
    pub async fn upload_file(
        &self,
        local_path: impl AsRef<Path>,
        key: &str,
        bucket: Option<&str>,
    ) -> Result<u64, StorageError> {
        let local_path = local_path.as_ref();
        let bucket_name = self.resolve(bucket);
        debug!(
            "S3 - Uploading from {} to s3://{}/{}",
            local_path.display(),
            bucket_name,
            key
        );

        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| StorageError::io(local_path, e))?;
        let size = data.len() as u64;
        self.put_bytes(key, Bytes::from(data), bucket).await?;

        debug!("S3 - File has been successfully uploaded to s3://{}/{}", bucket_name, key);
        Ok(size)
    }

    /// Upload every file below `local_dir` to `prefix/<relative path>`.
    /// Returns the number of files.
    pub async fn upload_folder(
        &self,
        local_dir: impl AsRef<Path>,
        prefix: &str,
        bucket: Option<&str>,
    ) -> Result<usize, StorageError> {
        let local_dir = local_dir.as_ref();
        let bucket_name = self.resolve(bucket);
        info!(
            "S3 - Uploading files from the local directory: {} to S3 with prefix: {}",
            local_dir.display(),
            prefix
        );

        let mut count = 0;
        for entry in WalkDir::new(local_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(local_dir).to_path_buf();
                StorageError::io(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let key = remote_key(prefix, local_dir, entry.path())?;
            self.upload_file(entry.path(), &key, Some(bucket_name)).await?;
            count += 1;
        }

        info!(
            "S3 - All {} files have been successfully uploaded to s3://{}/{}",
            count, bucket_name, prefix
        );
        Ok(count)
    }
}

/// Every strict ancestor of the listed keys.
///
/// Folder marker objects (`datasets/mnist/raw/`) lose their trailing `/` once
/// parsed into a path, so they show up as a zero-byte object whose key is also
/// the parent of other keys.
fn parent_paths(objects: &[ObjectMeta]) -> HashSet<ObjectPath> {
    let mut parents = HashSet::new();
    for meta in objects {
        let parts: Vec<_> = meta.location.parts().collect();
        for depth in 1..parts.len() {
            parents.insert(ObjectPath::from_iter(parts[..depth].iter().cloned()));
        }
    }
    parents
}

/// `prefix/<path relative to root>` with `/` separators on every platform.
fn remote_key(prefix: &str, root: &Path, path: &Path) -> Result<String, StorageError> {
    let relative = path.strip_prefix(root).map_err(|_| {
        StorageError::Config(format!("{} is not below {}", path.display(), root.display()))
    })?;
    let relative = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");

    let prefix = prefix.trim_end_matches('/');
    Ok(if prefix.is_empty() {
        relative
    } else {
        format!("{}/{}", prefix, relative)
    })
}

async fn write_local(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }
    }
    tokio::fs::write(path, data)
        .await
        .map_err(|e| StorageError::io(path, e))
}
