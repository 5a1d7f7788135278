//! Bounded retry for filesystem polling.

use std::thread;
use std::time::Duration;

use log::warn;

use crate::error::{IndexlibError, Result};

/// Retry policy: a fixed number of attempts with a fixed pause in between.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,

    /// Pause between two attempts.
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            interval: Duration::from_millis(100),
        }
    }
}

/// Run `f` until it succeeds or the policy is exhausted.
///
/// Only errors accepted by `is_retryable` are retried; others return at once.
/// This exists for cold-start polling of files that may not be visible yet on
/// eventually consistent filesystems, not as general error recovery.
pub fn do_with_retry<T, F, P>(policy: RetryPolicy, mut f: F, is_retryable: P) -> Result<T>
where
    F: FnMut() -> Result<T>,
    P: Fn(&IndexlibError) -> bool,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && is_retryable(&e) => {
                warn!("attempt {attempt}/{attempts} failed: {e}, retrying");
                thread::sleep(policy.interval);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
