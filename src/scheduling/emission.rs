use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::clock::ConcentratorTime;
use super::sub_band::Candidates;
use crate::frequency_plan::TimeOffAir;

/// Scheduling priority of a downlink, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxSchedulePriority {
    Lowest,
    Low,
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
    High,
    Highest,
}

/// A transmission committed to the concentrator timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emission {
    t: ConcentratorTime,
    d: Duration,
    priority: TxSchedulePriority,
}

impl Emission {
    pub fn new(t: ConcentratorTime, d: Duration, priority: TxSchedulePriority) -> Self {
        Self { t, d, priority }
    }

    pub fn starts(&self) -> ConcentratorTime {
        self.t
    }

    pub fn duration(&self) -> Duration {
        self.d
    }

    pub fn priority(&self) -> TxSchedulePriority {
        self.priority
    }

    pub fn ends(&self) -> ConcentratorTime {
        self.t + self.d
    }

    /// End of the emission including the time the concentrator needs to recharge.
    pub fn ends_with_off_air(&self, toa: &TimeOffAir) -> ConcentratorTime {
        self.ends() + toa.for_duration(self.d)
    }

    /// Whether `[starts, ends_with_off_air)` of both emissions intersect.
    pub fn overlaps_with_off_air(&self, other: &Emission, toa: &TimeOffAir) -> bool {
        self.t < other.ends_with_off_air(toa) && other.t < self.ends_with_off_air(toa)
    }

    pub(crate) fn with_start(self, t: ConcentratorTime) -> Self {
        Self { t, ..self }
    }
}

/// Committed emissions, ordered by start time.
#[derive(Debug, Clone, Default)]
pub struct Emissions(Vec<Emission>);

impl Emissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `em` after every emission starting at or before it.
    pub fn insert(&mut self, em: Emission) {
        let i = self.0.partition_point(|other| other.starts() <= em.starts());
        self.0.insert(i, em);
    }

    /// First committed emission `em` would overlap with.
    pub fn conflict(&self, em: &Emission, toa: &TimeOffAir) -> Option<&Emission> {
        self.0.iter().find(|other| em.overlaps_with_off_air(other, toa))
    }

    /// Drops emissions that are over, recharge delay included, before `t`.
    pub fn prune(&mut self, t: ConcentratorTime, toa: &TimeOffAir) {
        self.0.retain(|em| em.ends_with_off_air(toa) > t);
    }

    /// Conflict-free start times for an emission like `em`, from its start
    /// time up to `limit`.
    pub fn free_slots<'a>(&'a self, em: Emission, toa: &'a TimeOffAir, limit: ConcentratorTime) -> FreeSlots<'a> {
        FreeSlots {
            emissions: &self.0,
            toa,
            em,
            limit,
            cursor: Some(em.starts()),
            last: None,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Emission> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Lazy, finite sequence of conflict-free start times over a timeline.
///
/// Each item is the earliest start at or after the cursor that clears every
/// committed emission. Advancing without `skip_to` moves to the next gap
/// between emissions; once past the last emission only `skip_to` yields more.
#[derive(Debug)]
pub struct FreeSlots<'a> {
    emissions: &'a [Emission],
    toa: &'a TimeOffAir,
    em: Emission,
    limit: ConcentratorTime,
    cursor: Option<ConcentratorTime>,
    last: Option<ConcentratorTime>,
}

impl FreeSlots<'_> {
    fn earliest_from(&self, t: ConcentratorTime) -> ConcentratorTime {
        let mut candidate = self.em.with_start(t);
        for other in self.emissions {
            if other.starts() >= candidate.ends_with_off_air(self.toa) {
                // Sorted and mutually disjoint: nothing further can overlap.
                break;
            }
            if candidate.overlaps_with_off_air(other, self.toa) {
                // Schedule right after the conflicting emission.
                candidate = candidate.with_start(other.ends_with_off_air(self.toa));
            }
        }
        candidate.starts()
    }

    fn next_gap_after(&self, slot: ConcentratorTime) -> Option<ConcentratorTime> {
        let em = self.em.with_start(slot);
        self.emissions
            .iter()
            .find(|other| other.starts() >= em.ends())
            .map(|other| other.ends_with_off_air(self.toa))
    }
}

impl Iterator for FreeSlots<'_> {
    type Item = ConcentratorTime;

    fn next(&mut self) -> Option<ConcentratorTime> {
        let cursor = self.cursor.take()?;
        let slot = self.earliest_from(cursor);
        if slot > self.limit {
            return None;
        }
        self.cursor = self.next_gap_after(slot);
        self.last = Some(slot);
        Some(slot)
    }
}

impl Candidates for FreeSlots<'_> {
    /// Restarts the search at `t`, or right after the last yielded slot if
    /// that is later. Gaps before the next committed emission are kept.
    fn skip_to(&mut self, t: ConcentratorTime) {
        let floor = match self.last {
            Some(last) => t.max(ConcentratorTime::from_micros(last.as_micros() + 1)),
            None => t,
        };
        self.cursor = Some(floor);
    }
}
