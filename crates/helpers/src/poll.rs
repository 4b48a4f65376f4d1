//! Bounded polling of remote state.

use log::debug;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};

/// The condition did not hold before the timeout. Carries no detail about
/// the last observation; callers phrase their own failure message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("timed out after {timeout:?} ({attempts} attempts)")]
pub struct PollTimeout {
    pub timeout: Duration,
    pub attempts: u32,
}

/// Evaluates `condition` right away, then every `interval`, until it reports
/// `Ok(true)` or `timeout` has elapsed.
///
/// An `Err` from the condition counts as "not yet": the resource being
/// waited on may simply not exist so far. Panics inside the condition are
/// not caught. The final sleep is clipped to the remaining budget, so a
/// timeout is reported no later than `timeout` plus one evaluation.
pub async fn poll_immediate<F, Fut, E>(
    interval: Duration,
    timeout: Duration,
    mut condition: F,
) -> Result<(), PollTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: Display,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match condition().await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => debug!("poll attempt {attempts} failed, treating as not ready: {e}"),
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(PollTimeout { timeout, attempts });
        }
        sleep(interval.min(timeout - elapsed)).await;
    }
}
