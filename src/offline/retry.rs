//! # Retry Policy and Backoff Strategies
//!
//! Decides when a transiently failing operation has used up its attempts and
//! how long the engine waits before re-triggering after a halted cycle.
//!
//! ## Features
//!
//! - **Retry Ceiling**: operations reaching `max_attempts` are dead-lettered
//! - **Exponential Backoff**: delay doubles per consecutive halted cycle
//! - **Jitter**: optional randomness so many clients do not retry in lockstep
//! - **Cap**: the delay never exceeds the configured maximum
//!
//! ## Usage
//!
//! ```rust
//! use farmsync::offline::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::default();
//! assert!(policy.is_exhausted(3));
//! assert_eq!(policy.delay_for(1), Duration::from_secs(2));
//! assert_eq!(policy.delay_for(10), Duration::from_secs(60));
//! ```

use rand::Rng;
use std::time::Duration;

use crate::shared::config::{SyncConfig, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP, DEFAULT_MAX_ATTEMPTS};

/// Backoff strategy configuration
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed interval between cycles
    Fixed {
        interval: Duration,
    },
    /// Exponential backoff with optional jitter
    Exponential {
        base: Duration,
        max: Duration,
        /// Jitter factor (0.0 to 1.0), added on top of the computed delay
        jitter: f64,
    },
}

/// Retry ceiling plus backoff strategy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            strategy: BackoffStrategy::Exponential {
                base: DEFAULT_BACKOFF_BASE,
                max: DEFAULT_BACKOFF_CAP,
                jitter: 0.0,
            },
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            strategy: BackoffStrategy::Exponential {
                base: config.backoff_base,
                max: config.backoff_cap,
                jitter: config.backoff_jitter,
            },
        }
    }

    /// Whether an operation with `attempts` failed attempts must be dead-lettered
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Delay before re-triggering after `consecutive_failures` halted cycles
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        match &self.strategy {
            BackoffStrategy::Fixed { interval } => *interval,
            BackoffStrategy::Exponential { base, max, jitter } => {
                let exponent = consecutive_failures.saturating_sub(1).min(31);
                let delay = base.saturating_mul(2u32.pow(exponent)).min(*max);

                if *jitter > 0.0 {
                    let factor = rand::rng().random_range(0.0..=jitter.min(1.0));
                    delay.mul_f64(1.0 + factor).min(*max)
                } else {
                    delay
                }
            }
        }
    }
}
