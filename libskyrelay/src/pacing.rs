//! Delays between external writes
//!
//! A pause is inserted before every write except the first of the run,
//! whether the write is a repost or a like.

use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum PacingPolicy {
    /// Same pause before every write
    Fixed { delay: Duration },
    /// Spread the planned writes evenly across `window`
    Spread { window: Duration },
    /// Start at `base` and add `step` after every `every` writes, up to `max`
    Escalating {
        base: Duration,
        step: Duration,
        every: u32,
        max: Duration,
    },
}

impl Default for PacingPolicy {
    fn default() -> Self {
        PacingPolicy::Fixed {
            delay: Duration::from_secs(2),
        }
    }
}

impl PacingPolicy {
    /// Delay before the next write
    ///
    /// `writes_so_far` counts writes already issued this run; `planned_writes`
    /// is the total the run expects to issue.
    pub fn delay_before(&self, writes_so_far: usize, planned_writes: usize) -> Duration {
        match self {
            PacingPolicy::Fixed { delay } => *delay,
            PacingPolicy::Spread { window } => {
                if planned_writes == 0 {
                    return Duration::ZERO;
                }
                let divisor = u32::try_from(planned_writes).unwrap_or(u32::MAX);
                *window / divisor
            }
            PacingPolicy::Escalating {
                base,
                step,
                every,
                max,
            } => {
                let every = (*every).max(1) as usize;
                let steps = u32::try_from(writes_so_far / every).unwrap_or(u32::MAX);
                let grown = step.checked_mul(steps).unwrap_or(*max);
                base.saturating_add(grown).min(*max)
            }
        }
    }
}

/// Applies a [`PacingPolicy`] plus optional random jitter
#[derive(Debug, Clone, Default)]
pub struct Pacer {
    policy: PacingPolicy,
    jitter: Duration,
}

impl Pacer {
    pub fn new(policy: PacingPolicy, jitter: Duration) -> Self {
        Self { policy, jitter }
    }

    /// A pacer that never waits (dry runs and tests)
    pub fn immediate() -> Self {
        Self::new(
            PacingPolicy::Fixed {
                delay: Duration::ZERO,
            },
            Duration::ZERO,
        )
    }

    pub fn policy(&self) -> &PacingPolicy {
        &self.policy
    }

    /// Delay to wait before the next write, jitter included
    pub fn next_delay(&self, writes_so_far: usize, planned_writes: usize) -> Duration {
        if writes_so_far == 0 {
            return Duration::ZERO;
        }
        self.policy.delay_before(writes_so_far, planned_writes) + self.jitter_sample()
    }

    /// Sleep before the next write
    pub async fn pause(&self, writes_so_far: usize, planned_writes: usize) {
        let delay = self.next_delay(writes_so_far, planned_writes);
        if delay.is_zero() {
            return;
        }
        debug!(delay_ms = delay.as_millis() as u64, "Pacing before next write");
        sleep(delay).await;
    }

    fn jitter_sample(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}
