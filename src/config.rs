use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::scheduling::TxSchedulePriority;

/// Time the gateway needs to recharge the concentrator between items in the queue.
/// Same conservative value as the Semtech UDP packet forwarder JIT queue.
pub const QUEUE_DELAY: Duration = Duration::from_millis(30);

/// Window over which duty-cycle is enforced.
pub const DUTY_CYCLE_WINDOW: Duration = Duration::from_secs(3600);

/// Upper limits of sub-band utilization per priority, as a fraction of the
/// sub-band duty-cycle budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DutyCycleCeilings(pub BTreeMap<TxSchedulePriority, f64>);

impl DutyCycleCeilings {
    /// Ceiling for `priority`; priorities without an entry may use the full budget.
    pub fn ceiling(&self, priority: TxSchedulePriority) -> f64 {
        self.0.get(&priority).copied().unwrap_or(1.0).clamp(0.0, 1.0)
    }

    /// No per-priority restriction.
    pub fn unrestricted() -> Self {
        Self(BTreeMap::new())
    }
}

impl Default for DutyCycleCeilings {
    fn default() -> Self {
        Self(BTreeMap::from([
            (TxSchedulePriority::Lowest, 0.40),
            (TxSchedulePriority::Low, 0.50),
            (TxSchedulePriority::BelowNormal, 0.60),
            (TxSchedulePriority::Normal, 0.70),
            (TxSchedulePriority::AboveNormal, 0.80),
            (TxSchedulePriority::High, 0.90),
            (TxSchedulePriority::Highest, 1.00),
        ]))
    }
}

/// Tunables of one `Scheduler`. Durations are (de)serialized in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Floor of the concentrator recharge delay (time-off-air).
    #[serde(with = "duration_ms")]
    pub queue_delay: Duration,
    /// Lower network latency plus queue delay. Exact-time requests closer
    /// than this to the current concentrator time are too late.
    #[serde(with = "duration_ms")]
    pub schedule_time_short: Duration,
    /// Higher network latency plus queue delay, used for pseudo-immediate scheduling.
    #[serde(with = "duration_ms")]
    pub schedule_time_long: Duration,
    #[serde(with = "duration_ms")]
    pub duty_cycle_window: Duration,
    pub duty_cycle_ceilings: DutyCycleCeilings,
    /// How far past the requested time flexible scheduling may look for a slot.
    #[serde(with = "duration_ms")]
    pub max_anytime_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_delay: QUEUE_DELAY,
            schedule_time_short: Duration::from_millis(100) + QUEUE_DELAY,
            schedule_time_long: Duration::from_millis(300) + QUEUE_DELAY,
            duty_cycle_window: DUTY_CYCLE_WINDOW,
            duty_cycle_ceilings: DutyCycleCeilings::default(),
            max_anytime_delay: DUTY_CYCLE_WINDOW,
        }
    }
}

impl SchedulerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("failed to parse scheduler configuration")?;
        if config.duty_cycle_window.is_zero() {
            anyhow::bail!("duty-cycle window must not be zero");
        }
        Ok(config)
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

pub(crate) mod opt_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.schedule_time_short, Duration::from_millis(130));
        assert_eq!(config.schedule_time_long, Duration::from_millis(330));
        assert_eq!(config.duty_cycle_ceilings.ceiling(TxSchedulePriority::Normal), 0.70);
        assert_eq!(config.duty_cycle_ceilings.ceiling(TxSchedulePriority::Highest), 1.0);
    }

    #[test]
    fn test_from_json_partial() {
        let config = SchedulerConfig::from_json(
            r#"{"schedule_time_short": 200, "duty_cycle_window": 60000, "duty_cycle_ceilings": {"lowest": 0.1}}"#,
        )
        .unwrap();
        assert_eq!(config.schedule_time_short, Duration::from_millis(200));
        assert_eq!(config.duty_cycle_window, Duration::from_secs(60));
        assert_eq!(config.queue_delay, QUEUE_DELAY);
        assert_eq!(config.duty_cycle_ceilings.ceiling(TxSchedulePriority::Lowest), 0.1);
        assert_eq!(config.duty_cycle_ceilings.ceiling(TxSchedulePriority::Normal), 1.0);
    }

    #[test]
    fn test_from_json_rejects_zero_window() {
        assert!(SchedulerConfig::from_json(r#"{"duty_cycle_window": 0}"#).is_err());
        assert!(SchedulerConfig::from_json("not json").is_err());
    }
}
