//! Exponential backoff and retry

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Exponential backoff delay generator
///
/// Successive calls to [`decay`](Self::decay) return `initial`,
/// `initial * multiplier`, ... capped at `max`.
#[derive(Clone, Debug)]
pub struct Decayer {
    initial: f64,
    multiplier: f64,
    max: f64,
    current: Option<f64>,
}

impl Decayer {
    /// Create a decayer; delays are in milliseconds
    pub fn new(initial: f64, multiplier: f64, max: f64) -> Self {
        Self {
            initial,
            multiplier,
            max,
            current: None,
        }
    }

    /// Next delay in milliseconds
    pub fn decay(&mut self) -> f64 {
        let next = match self.current {
            None => self.initial,
            Some(current) => current * self.multiplier,
        }
        .min(self.max);
        self.current = Some(next);
        next
    }

    /// Next delay as a [`Duration`]; negative or NaN delays are zero and
    /// delays too large to represent saturate
    pub fn next_delay(&mut self) -> Duration {
        let ms = self.decay();
        if ms.is_nan() || ms <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(Duration::MAX)
    }

    /// Start over from the initial delay
    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// Retry and backoff settings for chunk transfers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// First retry delay in milliseconds
    pub initial_delay_ms: f64,
    /// Growth factor between retries
    pub multiplier: f64,
    /// Delay cap in milliseconds
    pub max_delay_ms: f64,
    /// Attempts per chunk upload
    pub upload_tries: u32,
    /// Attempts per chunk download, per account
    pub download_tries: u32,
    /// Chunks fetched concurrently during a read
    pub fetch_concurrency: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 5_000.0,
            multiplier: 1.5,
            max_delay_ms: 3_600_000.0,
            upload_tries: 5,
            download_tries: 3,
            fetch_concurrency: 4,
        }
    }
}

impl RetryPolicy {
    /// A fresh decayer for one operation
    pub fn decayer(&self) -> Decayer {
        Decayer::new(self.initial_delay_ms, self.multiplier, self.max_delay_ms)
    }

    /// Policy with no waiting between attempts, for tests
    pub fn immediate() -> Self {
        Self {
            initial_delay_ms: 0.0,
            max_delay_ms: 0.0,
            ..Self::default()
        }
    }
}

/// Run `operation` up to `max_tries` times, sleeping between attempts
///
/// `error_handler` sees every failure with the number of attempts left. The
/// last error is returned unchanged once attempts run out.
pub async fn retry_function<T, E, F, Fut, H>(
    operation: F,
    error_handler: H,
    max_tries: u32,
    decayer: &mut Decayer,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    H: FnMut(&E, u32),
{
    retry_when(operation, |_| true, error_handler, max_tries, decayer).await
}

/// Like [`retry_function`], but gives up at once on errors `should_retry` rejects
pub async fn retry_when<T, E, F, Fut, P, H>(
    mut operation: F,
    should_retry: P,
    mut error_handler: H,
    max_tries: u32,
    decayer: &mut Decayer,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    H: FnMut(&E, u32),
{
    let mut tries_left = max_tries.max(1);
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                tries_left -= 1;
                error_handler(&err, tries_left);
                if tries_left == 0 || !should_retry(&err) {
                    return Err(err);
                }
                let delay = decayer.next_delay();
                debug!(delay_ms = delay.as_millis() as u64, tries_left, "Retrying after backoff");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
