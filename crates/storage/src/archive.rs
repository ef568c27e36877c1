// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/storage/src/archive.rs
use std::fs;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::ZipArchive;

use crate::StorageError;

/// Extract every entry of a zip archive below `dest`.
///
/// `key` only labels errors. Entries whose names would resolve outside
/// `dest` (absolute paths, `..`) are rejected before anything is written.
pub fn extract_archive<R: Read + Seek>(
    reader: R,
    dest: &Path,
    key: &str,
) -> Result<Vec<PathBuf>, StorageError> {
    let zip_err = |source| StorageError::Zip {
        key: key.to_string(),
        source,
    };
    let mut archive = ZipArchive::new(reader).map_err(zip_err)?;

    fs::create_dir_all(dest).map_err(|e| StorageError::io(dest, e))?;

    let mut extracted = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(zip_err)?;
        let relative = entry.enclosed_name().ok_or_else(|| StorageError::UnsafeEntry {
            key: key.to_string(),
            entry: entry.name().to_string(),
        })?;
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| StorageError::io(&target, e))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        let mut out = fs::File::create(&target).map_err(|e| StorageError::io(&target, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| StorageError::io(&target, e))?;
        debug!("Local - extracted {}", target.display());
        extracted.push(target);
    }

    Ok(extracted)
}
