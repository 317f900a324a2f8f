// SPDX-License-Identifier: AGPL-3.0
// DataSync Core - Retry policy for per-file operations

use crate::types::AppError;
use std::future::Future;
use std::time::Duration;

/// Fixed-delay retry for a single file operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

impl RetryPolicy {
    /// At least one attempt is always made
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Single attempt, no delay
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Configuration, credential and existing-target problems will not improve on retry
    fn is_retryable(err: &AppError) -> bool {
        !matches!(
            err,
            AppError::InvalidConfig(_)
                | AppError::Authentication(_)
                | AppError::NotFound(_)
                | AppError::AlreadyExists(_)
        )
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut tried = 0;
        loop {
            tried += 1;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if tried < self.max_attempts && Self::is_retryable(&e) => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}",
                        operation,
                        tried,
                        self.max_attempts,
                        e
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Variant for code already running on a blocking thread
    pub fn run_blocking<T, F>(&self, operation: &str, mut attempt: F) -> Result<T, AppError>
    where
        F: FnMut() -> Result<T, AppError>,
    {
        let mut tried = 0;
        loop {
            tried += 1;
            match attempt() {
                Ok(value) => return Ok(value),
                Err(e) if tried < self.max_attempts && Self::is_retryable(&e) => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}",
                        operation,
                        tried,
                        self.max_attempts,
                        e
                    );
                    std::thread::sleep(self.delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
