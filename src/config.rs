//! Runtime configuration, loaded from the environment at startup.
//!
//! Everything is parsed and validated once; an invalid value fails startup
//! rather than surfacing mid-operation. Pure business-rule limits (like the
//! 1-60 minute hold range) are re-checked by the state machine so callers
//! passing explicit durations get a synchronous validation error.

use std::time::Duration;

use anyhow::{Context, Result};

use crate::domains::waitlist::scoring::ScoreWeights;

/// Bounds for the hold duration, in minutes.
pub const MIN_HOLD_MINUTES: i64 = 1;
pub const MAX_HOLD_MINUTES: i64 = 60;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// How long a candidate has to respond to an offer.
    pub hold_minutes: i64,
    /// How often the expired-hold sweep runs.
    pub sweep_interval: Duration,
    /// Retention window for notification and finished job records.
    pub retention_days: i64,
    /// Scoring weights.
    pub weights: ScoreWeights,
    /// Max jobs a worker claims per poll.
    pub worker_batch_size: i64,
    /// Worker sleep when the queue is empty.
    pub worker_poll_interval: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            hold_minutes: 10,
            sweep_interval: Duration::from_secs(60),
            retention_days: 30,
            weights: ScoreWeights::default(),
            worker_batch_size: 10,
            worker_poll_interval: Duration::from_secs(5),
        }
    }
}

impl CoreConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(minutes) = read_env::<i64>("WAITLIST_HOLD_MINUTES")? {
            config.hold_minutes = minutes;
        }
        if let Some(secs) = read_env::<u64>("WAITLIST_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(days) = read_env::<i64>("WAITLIST_RETENTION_DAYS")? {
            config.retention_days = days;
        }
        if let Some(batch) = read_env::<i64>("WAITLIST_WORKER_BATCH_SIZE")? {
            config.worker_batch_size = batch;
        }
        if let Some(vip) = read_env::<i32>("WAITLIST_WEIGHT_VIP")? {
            config.weights.vip = vip;
        }
        if let Some(staff) = read_env::<i32>("WAITLIST_WEIGHT_STAFF_PREFERENCE")? {
            config.weights.staff_preference = staff;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_HOLD_MINUTES..=MAX_HOLD_MINUTES).contains(&self.hold_minutes) {
            anyhow::bail!(
                "hold duration must be {MIN_HOLD_MINUTES}-{MAX_HOLD_MINUTES} minutes, got {}",
                self.hold_minutes
            );
        }
        if self.retention_days < 1 {
            anyhow::bail!("retention window must be at least one day");
        }
        if self.worker_batch_size < 1 {
            anyhow::bail!("worker batch size must be positive");
        }
        self.weights.validate()?;
        Ok(())
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => {
            let parsed = raw
                .parse::<T>()
                .with_context(|| format!("invalid value for {name}: {raw:?}"))?;
            Ok(Some(parsed))
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("could not read {name}")),
    }
}
