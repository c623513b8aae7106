use std::time::Duration;

use crate::scheduling::ConcentratorTime;

/// Rejections returned by the scheduler. None of them leave state behind.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("sub-band not found for frequency `{frequency}` Hz")]
    SubBandNotFound { frequency: u64 },

    #[error("packet exceeds dwell time restriction ({time_on_air:?} on `{frequency}` Hz)")]
    DwellTime { frequency: u64, time_on_air: Duration },

    #[error("too late to transmission scheduled time (delta is `{delta_us}` us)")]
    TooLate { delta_us: i64 },

    #[error("scheduling conflict (start {start:?})")]
    Conflict { start: Option<ConcentratorTime> },

    #[error("duty-cycle exceeded in sub-band [{min_frequency}, {max_frequency}) Hz ({usage_us} us used of {budget_us} us)")]
    DutyCycle {
        min_frequency: u64,
        max_frequency: u64,
        usage_us: i64,
        budget_us: i64,
    },

    #[error("clock is not synced")]
    UnsyncedClock,

    #[error("unknown band `{0}`")]
    UnknownBand(String),

    #[error("invalid transmission settings: {0}")]
    InvalidSettings(&'static str),
}
