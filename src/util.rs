//! Shared utility functions.

use std::time::{Duration, Instant};

use crate::{Error, Result};

/// Serialize a `Duration` as whole milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Delay before retry number `attempt + 1`: `base * 2^attempt`, capped.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(cap).min(cap)
}

/// Wall-clock budget for a planning pass.
///
/// Planning phases call [`Deadline::check`] at loop boundaries so that a
/// pathological, conflict-dense submission aborts instead of hanging.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    pub fn new(budget: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn check(&self, phase: &'static str) -> Result<()> {
        match self.budget {
            Some(budget) if self.started.elapsed() > budget => {
                Err(Error::PlanningTimeout { phase, budget })
            }
            _ => Ok(()),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::unbounded()
    }
}
