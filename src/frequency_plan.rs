use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::{duration_ms, opt_duration_ms};

/// Default maximum duration of a single transmission where dwell time applies.
pub const DEFAULT_DWELL_TIME: Duration = Duration::from_millis(400);

/// Time the concentrator stays silent after an emission.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeOffAir {
    /// Fraction of the emission duration.
    #[serde(default)]
    pub fraction: f64,
    /// Minimum time-off-air.
    #[serde(default, with = "duration_ms")]
    pub duration: Duration,
}

impl TimeOffAir {
    /// Time-off-air following an emission of duration `d`.
    pub fn for_duration(&self, d: Duration) -> Duration {
        let by_fraction = d.mul_f64(self.fraction.max(0.0));
        by_fraction.max(self.duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DwellTime {
    #[serde(default)]
    pub uplinks: Option<bool>,
    #[serde(default)]
    pub downlinks: Option<bool>,
    #[serde(default, with = "opt_duration_ms")]
    pub duration: Option<Duration>,
}

impl DwellTime {
    fn applies(&self, is_downlink: bool) -> bool {
        let enabled = if is_downlink { self.downlinks } else { self.uplinks };
        enabled.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub frequency: u64,
    #[serde(default)]
    pub dwell_time: Option<DwellTime>,
}

/// The parts of a gateway frequency plan the scheduler relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyPlan {
    pub band_id: String,
    #[serde(default)]
    pub time_off_air: TimeOffAir,
    #[serde(default)]
    pub dwell_time: DwellTime,
    #[serde(default)]
    pub uplink_channels: Vec<Channel>,
    #[serde(default)]
    pub downlink_channels: Vec<Channel>,
}

impl FrequencyPlan {
    pub fn new(band_id: &str) -> Self {
        Self {
            band_id: band_id.to_owned(),
            time_off_air: TimeOffAir::default(),
            dwell_time: DwellTime::default(),
            uplink_channels: Vec::new(),
            downlink_channels: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let plan: Self = serde_json::from_str(json).context("failed to parse frequency plan")?;
        if !(0.0..=1.0).contains(&plan.time_off_air.fraction) {
            anyhow::bail!("time-off-air fraction {} out of range", plan.time_off_air.fraction);
        }
        Ok(plan)
    }

    /// Returns whether a transmission of `duration` on `frequency` respects
    /// the dwell time restriction. Channel settings override the plan.
    pub fn respects_dwell_time(&self, is_downlink: bool, frequency: u64, duration: Duration) -> bool {
        let channels = if is_downlink {
            &self.downlink_channels
        } else {
            &self.uplink_channels
        };
        let dwell_time = channels
            .iter()
            .find(|ch| ch.frequency == frequency)
            .and_then(|ch| ch.dwell_time)
            .unwrap_or(self.dwell_time);
        if !dwell_time.applies(is_downlink) {
            return true;
        }
        let limit = dwell_time
            .duration
            .or(self.dwell_time.duration)
            .unwrap_or(DEFAULT_DWELL_TIME);
        duration <= limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_off_air_fraction() {
        let toa = TimeOffAir {
            fraction: 0.1,
            duration: Duration::from_millis(30),
        };
        assert_eq!(toa.for_duration(Duration::from_millis(100)), Duration::from_millis(30));
        assert_eq!(toa.for_duration(Duration::from_secs(1)), Duration::from_millis(100));
        assert_eq!(toa.for_duration(Duration::from_millis(2500)), Duration::from_millis(250));
    }

    #[test]
    fn test_dwell_time_plan_level() {
        let mut plan = FrequencyPlan::new("AS_923");
        assert!(plan.respects_dwell_time(true, 923200000, Duration::from_secs(2)));
        plan.dwell_time = DwellTime {
            uplinks: Some(true),
            downlinks: Some(true),
            duration: None,
        };
        assert!(plan.respects_dwell_time(true, 923200000, Duration::from_millis(400)));
        assert!(!plan.respects_dwell_time(true, 923200000, Duration::from_millis(401)));
    }

    #[test]
    fn test_dwell_time_channel_override() {
        let json = r#"{
            "band_id": "AS_923",
            "dwell_time": {"downlinks": true, "duration": 400},
            "downlink_channels": [
                {"frequency": 923200000, "dwell_time": {"downlinks": false}},
                {"frequency": 923400000}
            ]
        }"#;
        let plan = FrequencyPlan::from_json(json).unwrap();
        assert!(plan.respects_dwell_time(true, 923200000, Duration::from_secs(1)));
        assert!(!plan.respects_dwell_time(true, 923400000, Duration::from_secs(1)));
        assert!(plan.respects_dwell_time(false, 923400000, Duration::from_secs(1)));
    }

    #[test]
    fn test_from_json_rejects_bad_fraction() {
        let json = r#"{"band_id": "EU_863_870", "time_off_air": {"fraction": 1.5}}"#;
        assert!(FrequencyPlan::from_json(json).is_err());
    }
}
