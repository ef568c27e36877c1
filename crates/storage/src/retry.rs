// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::StorageError;

/// Fixed-count retry with a fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            wait: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, wait: Duration) -> Self {
        Self { max_attempts, wait }
    }

    /// Policy that tries exactly once.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `op` until it succeeds, fails permanently, or the attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) if attempt >= max_attempts => {
                    return Err(StorageError::AttemptsExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    warn!(
                        "S3 - {} failed (attempt {}/{}): {}. Retrying...",
                        operation, attempt, max_attempts, err
                    );
                    tokio::time::sleep(self.wait).await;
                    attempt += 1;
                }
            }
        }
    }
}
