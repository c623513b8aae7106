use std::fmt;
use std::ops::{Add, Sub};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::error::Error;

/// The concentrator counter is 32 bits of microseconds; it wraps every ~71.6 minutes.
pub const ROLLOVER_US: i64 = 1 << 32;

/// Microseconds in the gateway-relative concentrator time domain. Only
/// differences and ordering are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ConcentratorTime(i64);

impl ConcentratorTime {
    pub const ZERO: ConcentratorTime = ConcentratorTime(0);

    pub const fn from_micros(us: i64) -> Self {
        Self(us)
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// Number of counter rollovers before this time.
    pub fn rollovers(self) -> i64 {
        self.0.div_euclid(ROLLOVER_US)
    }

    /// The raw 32-bit concentrator counter value at this time.
    pub fn timestamp(self) -> u32 {
        self.0.rem_euclid(ROLLOVER_US) as u32
    }
}

impl fmt::Display for ConcentratorTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

pub(crate) fn duration_us(d: Duration) -> i64 {
    i64::try_from(d.as_micros()).unwrap_or(i64::MAX)
}

impl Add<Duration> for ConcentratorTime {
    type Output = ConcentratorTime;

    fn add(self, rhs: Duration) -> ConcentratorTime {
        ConcentratorTime(self.0.saturating_add(duration_us(rhs)))
    }
}

/// Signed distance in microseconds.
impl Sub for ConcentratorTime {
    type Output = i64;

    fn sub(self, rhs: ConcentratorTime) -> i64 {
        self.0 - rhs.0
    }
}

/// Signed microseconds from `earlier` to `later`.
fn signed_elapsed_us(later: SystemTime, earlier: SystemTime) -> i64 {
    match later.duration_since(earlier) {
        Ok(d) => duration_us(d),
        Err(e) => -duration_us(e.duration()),
    }
}

/// Picks the unwrap of `timestamp` that is closest to `reference`.
///
/// ```text
/// --|----R---||-T----|--  T just wrapped: next rollover
/// --|---T-||--R------|--  T from before the last wrap: previous rollover
/// ```
fn unwrap_timestamp(timestamp: u32, reference: ConcentratorTime) -> ConcentratorTime {
    let base = reference.rollovers();
    (base - 1..=base + 1)
        .map(|rollovers| ConcentratorTime(rollovers * ROLLOVER_US + timestamp as i64))
        .min_by_key(|candidate| (*candidate - reference).abs())
        .unwrap_or(ConcentratorTime(base * ROLLOVER_US + timestamp as i64))
}

/// Source of the server wall-clock time.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// The host system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

#[derive(Debug, Clone, Copy)]
struct SyncPoint {
    absolute: ConcentratorTime,
    server: SystemTime,
}

#[derive(Debug, Clone, Copy)]
struct GatewaySyncPoint {
    absolute: ConcentratorTime,
    gateway: SystemTime,
}

/// Maps server time, gateway time and the wrapping concentrator counter onto
/// `ConcentratorTime`.
#[derive(Debug, Clone, Default)]
pub struct RolloverClock {
    synced: Option<SyncPoint>,
    gateway: Option<GatewaySyncPoint>,
}

impl RolloverClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_synced(&self) -> bool {
        self.synced.is_some()
    }

    /// Records that the concentrator counter read `timestamp` at `server`.
    /// Returns the unwrapped concentrator time of the sample.
    pub fn sync(&mut self, timestamp: u32, server: SystemTime) -> ConcentratorTime {
        self.sync_point(timestamp, server).0
    }

    /// Like `sync`, also recording that `gateway` wall-clock time corresponds to `timestamp`.
    pub fn sync_with_gateway(&mut self, timestamp: u32, server: SystemTime, gateway: SystemTime) -> ConcentratorTime {
        let (absolute, accepted) = self.sync_point(timestamp, server);
        if accepted {
            self.gateway = Some(GatewaySyncPoint { absolute, gateway });
        }
        absolute
    }

    fn sync_point(&mut self, timestamp: u32, server: SystemTime) -> (ConcentratorTime, bool) {
        let absolute = match self.synced {
            None => ConcentratorTime(timestamp as i64),
            Some(prev) => {
                let expected = ConcentratorTime(prev.absolute.0 + signed_elapsed_us(server, prev.server));
                let absolute = unwrap_timestamp(timestamp, expected);
                if absolute < prev.absolute {
                    warn!(timestamp, last = %prev.absolute, "ignoring stale concentrator time sample");
                    return (absolute, false);
                }
                if absolute.rollovers() > prev.absolute.rollovers() {
                    debug!(timestamp, rollovers = absolute.rollovers(), "concentrator counter rolled over");
                }
                absolute
            }
        };
        self.synced = Some(SyncPoint { absolute, server });
        (absolute, true)
    }

    /// Projects the server time `now` into concentrator time.
    pub fn server_time(&self, now: SystemTime) -> Result<ConcentratorTime, Error> {
        let sync = self.synced.ok_or(Error::UnsyncedClock)?;
        Ok(ConcentratorTime(sync.absolute.0 + signed_elapsed_us(now, sync.server)))
    }

    /// Reconstructs the full concentrator time of a raw counter value, using
    /// the unwrap closest to the concentrator time at server time `now`.
    pub fn timestamp_time(&self, timestamp: u32, now: SystemTime) -> Result<ConcentratorTime, Error> {
        let reference = self.server_time(now)?;
        Ok(unwrap_timestamp(timestamp, reference))
    }

    /// Converts a gateway wall-clock time into concentrator time. Requires a
    /// prior `sync_with_gateway`.
    pub fn gateway_time(&self, gateway: SystemTime) -> Result<ConcentratorTime, Error> {
        let sync = self.gateway.ok_or(Error::UnsyncedClock)?;
        Ok(ConcentratorTime(sync.absolute.0 + signed_elapsed_us(gateway, sync.gateway)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(us: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000) + Duration::from_micros(us)
    }

    #[test]
    fn test_unsynced_conversions_fail() {
        let clock = RolloverClock::new();
        assert!(!clock.is_synced());
        assert_eq!(clock.server_time(at(0)), Err(Error::UnsyncedClock));
        assert_eq!(clock.timestamp_time(10, at(0)), Err(Error::UnsyncedClock));
        assert_eq!(clock.gateway_time(at(0)), Err(Error::UnsyncedClock));
    }

    #[test]
    fn test_server_time_projection() {
        let mut clock = RolloverClock::new();
        assert_eq!(clock.sync(1_000_000, at(0)), ConcentratorTime::from_micros(1_000_000));
        assert!(clock.is_synced());
        assert_eq!(clock.server_time(at(250_000)).unwrap(), ConcentratorTime::from_micros(1_250_000));
        assert_eq!(clock.server_time(at(0)).unwrap() + Duration::from_millis(5), ConcentratorTime::from_micros(1_005_000));
    }

    #[test]
    fn test_sync_detects_rollover() {
        let mut clock = RolloverClock::new();
        let before = clock.sync(u32::MAX - 999, at(0));
        let after = clock.sync(500, at(1500));
        assert_eq!(after.rollovers(), 1);
        assert_eq!(after - before, 1500);
        assert_eq!(after.timestamp(), 500);
    }

    #[test]
    fn test_sync_after_long_silence() {
        let mut clock = RolloverClock::new();
        clock.sync(100, at(0));
        // Two full periods and a bit later.
        let elapsed = 2 * ROLLOVER_US as u64 + 1_000;
        let t = clock.sync(1_100, at(elapsed));
        assert_eq!(t.rollovers(), 2);
        assert_eq!(t.as_micros(), 2 * ROLLOVER_US + 1_100);
    }

    #[test]
    fn test_stale_sample_does_not_regress() {
        let mut clock = RolloverClock::new();
        clock.sync(u32::MAX - 1000, at(0));
        let wrapped = clock.sync(2000, at(3001));
        assert_eq!(wrapped.rollovers(), 1);
        // Delayed sample from before the wrap arrives late.
        let stale = clock.sync(u32::MAX - 500, at(3100));
        assert_eq!(stale.rollovers(), 0);
        assert_eq!(clock.timestamp_time(2500, at(3100)).unwrap().rollovers(), 1);
        assert_eq!(clock.server_time(at(3001)).unwrap(), wrapped);
    }

    #[test]
    fn test_timestamp_time_unwraps_across_rollover() {
        let mut clock = RolloverClock::new();
        let synced = clock.sync(u32::MAX - 1000, at(0));
        let t = clock.timestamp_time(500, at(0)).unwrap();
        assert!(t > synced);
        assert_eq!(t - synced, 1501);

        // A value slightly in the past right after a wrap.
        clock.sync(100, at(1101));
        let past = clock.timestamp_time(u32::MAX - 10, at(1101)).unwrap();
        assert_eq!(past.rollovers(), 0);
        assert!(past < clock.timestamp_time(100, at(1101)).unwrap());
    }

    #[test]
    fn test_timestamp_time_follows_current_time() {
        let mut clock = RolloverClock::new();
        clock.sync(0, at(0));
        // Over half a period without sync; one second ahead of now.
        let now = at(3_600_000_000);
        let t = clock.timestamp_time(3_601_000_000, now).unwrap();
        assert_eq!(t.rollovers(), 0);
        assert_eq!(t - clock.server_time(now).unwrap(), 1_000_000);
    }

    #[test]
    fn test_gateway_time() {
        let mut clock = RolloverClock::new();
        clock.sync(5_000, at(0));
        assert_eq!(clock.gateway_time(at(0)), Err(Error::UnsyncedClock));
        let gateway = SystemTime::UNIX_EPOCH + Duration::from_secs(1_300_000_000);
        clock.sync_with_gateway(10_000, at(5_000), gateway);
        let t = clock.gateway_time(gateway + Duration::from_millis(200)).unwrap();
        assert_eq!(t, ConcentratorTime::from_micros(210_000));
        let before = clock.gateway_time(gateway - Duration::from_millis(1)).unwrap();
        assert_eq!(before, ConcentratorTime::from_micros(9_000));
    }
}
