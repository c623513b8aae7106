use std::time::Duration;

use tracing::{debug, trace};

use super::clock::{duration_us, ConcentratorTime};
use super::emission::{Emission, TxSchedulePriority};
use crate::band::SubBandParameters;
use crate::config::DutyCycleCeilings;
use crate::error::Error;

/// Producer of candidate start times for flexible scheduling. Candidates are
/// increasing; the sequence ends when no candidate is left within its bound.
pub trait Candidates: Iterator<Item = ConcentratorTime> {
    /// Discards every candidate earlier than `t`.
    fn skip_to(&mut self, t: ConcentratorTime);
}

fn overlap_us(a: (i64, i64), b: (i64, i64)) -> i64 {
    (a.1.min(b.1) - a.0.max(b.0)).max(0)
}

/// Duty-cycle accounting of one sub-band over a sliding window.
///
/// The ledger holds every admitted emission that may still fall in a window
/// together with a future emission. An emission is admitted only if no window
/// of `window` length that intersects it carries more airtime than the budget
/// of its priority.
#[derive(Debug, Clone)]
pub struct SubBand {
    params: SubBandParameters,
    window: Duration,
    ceilings: DutyCycleCeilings,
    ledger: Vec<Emission>,
}

impl SubBand {
    pub fn new(params: SubBandParameters, window: Duration, ceilings: DutyCycleCeilings) -> Self {
        Self {
            params,
            window,
            ceilings,
            ledger: Vec::new(),
        }
    }

    pub fn parameters(&self) -> &SubBandParameters {
        &self.params
    }

    pub fn comprises(&self, frequency: u64) -> bool {
        self.params.comprises(frequency)
    }

    /// Airtime in microseconds usable within one window at `priority`.
    pub fn budget_us(&self, priority: TxSchedulePriority) -> i64 {
        let window = duration_us(self.window) as f64;
        (self.params.duty_cycle * self.ceilings.ceiling(priority) * window).round() as i64
    }

    /// Admitted airtime within `[from, to)`.
    pub fn airtime(&self, from: ConcentratorTime, to: ConcentratorTime) -> Duration {
        let range = (from.as_micros(), to.as_micros());
        let us: i64 = self
            .ledger
            .iter()
            .map(|em| overlap_us(range, (em.starts().as_micros(), em.ends().as_micros())))
            .sum();
        Duration::from_micros(us.max(0) as u64)
    }

    /// Highest airtime of any window intersecting `em`, `em` included.
    ///
    /// Window usage is piecewise linear in the window start, so its maximum
    /// is reached where a window edge meets an emission edge.
    fn peak_usage_us(&self, em: &Emission) -> i64 {
        let w = duration_us(self.window);
        let (s, e) = (em.starts().as_micros(), em.ends().as_micros());
        let relevant: Vec<(i64, i64)> = self
            .ledger
            .iter()
            .map(|other| (other.starts().as_micros(), other.ends().as_micros()))
            .filter(|&(os, oe)| oe > s - w && os < e + w)
            .chain(std::iter::once((s, e)))
            .collect();
        relevant
            .iter()
            .flat_map(|&(a, b)| [a, b, a - w, b - w])
            .filter(|&t| t >= s - w && t <= e)
            .map(|t| relevant.iter().map(|&iv| overlap_us(iv, (t, t + w))).sum::<i64>())
            .max()
            .unwrap_or(0)
    }

    fn exceeded(&self, usage_us: i64, budget_us: i64) -> Error {
        Error::DutyCycle {
            min_frequency: self.params.min_frequency,
            max_frequency: self.params.max_frequency,
            usage_us,
            budget_us,
        }
    }

    fn check(&self, em: &Emission) -> Result<(), Error> {
        let usage_us = self.peak_usage_us(em);
        let budget_us = self.budget_us(em.priority());
        if usage_us > budget_us {
            return Err(self.exceeded(usage_us, budget_us));
        }
        Ok(())
    }

    /// Next start after `start` worth trying for an emission of `d` that
    /// exceeded the budget by `excess_us`.
    ///
    /// Moving later drops ledger airtime from the trailing window at most one
    /// microsecond per microsecond. While an entry is leaving that window the
    /// excess is the exact distance to go; otherwise skip to the next time an
    /// entry starts leaving it, or past a later entry.
    fn release_after(&self, start: ConcentratorTime, d: Duration, excess_us: i64) -> Option<ConcentratorTime> {
        let w = duration_us(self.window);
        let d = duration_us(d);
        let s = start.as_micros();
        let leaving = self.ledger.iter().any(|em| {
            let (a, b) = (em.starts().as_micros(), em.ends().as_micros());
            a + w - d <= s && s < b + w - d
        });
        if leaving {
            return Some(ConcentratorTime::from_micros(s + excess_us.max(1)));
        }
        self.ledger
            .iter()
            .flat_map(|em| {
                let (a, b) = (em.starts().as_micros(), em.ends().as_micros());
                [a + w - d, b + w - d, b]
            })
            .filter(|&t| t > s)
            .min()
            .map(ConcentratorTime::from_micros)
    }

    fn add(&mut self, em: Emission, now: Option<ConcentratorTime>) {
        if let Some(now) = now {
            let window = self.window;
            self.ledger.retain(|other| other.ends() + window > now);
        }
        let i = self.ledger.partition_point(|other| other.starts() <= em.starts());
        self.ledger.insert(i, em);
        debug!(
            min_frequency = self.params.min_frequency,
            max_frequency = self.params.max_frequency,
            start = %em.starts(),
            duration = ?em.duration(),
            "sub-band airtime admitted"
        );
    }

    /// Admits `em` if it keeps every window within the duty-cycle budget.
    /// `now` is the current concentrator time if known; older ledger entries
    /// are dropped once they can no longer share a window with new emissions.
    pub fn schedule(&mut self, em: Emission, now: Option<ConcentratorTime>) -> Result<(), Error> {
        self.check(&em)?;
        self.add(em, now);
        Ok(())
    }

    /// Admits an emission of `d` at the first candidate that fits the
    /// duty-cycle budget. Rejected candidates advance the producer to the
    /// next time airtime may be released.
    pub fn schedule_anytime<C>(
        &mut self,
        d: Duration,
        candidates: &mut C,
        priority: TxSchedulePriority,
        now: Option<ConcentratorTime>,
    ) -> Result<Emission, Error>
    where
        C: Candidates + ?Sized,
    {
        let budget_us = self.budget_us(priority);
        let mut rejection = None;
        while let Some(start) = candidates.next() {
            let em = Emission::new(start, d, priority);
            let usage_us = self.peak_usage_us(&em);
            if usage_us <= budget_us {
                self.add(em, now);
                return Ok(em);
            }
            let err = self.exceeded(usage_us, budget_us);
            trace!(start = %start, error = %err, "candidate exceeds duty-cycle");
            if duration_us(d) > budget_us {
                return Err(err);
            }
            match self.release_after(start, d, usage_us - budget_us) {
                Some(t) => candidates.skip_to(t),
                None => return Err(err),
            }
            rejection = Some(err);
        }
        Err(rejection.unwrap_or(Error::Conflict { start: None }))
    }
}
