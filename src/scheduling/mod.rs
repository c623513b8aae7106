//! Downlink scheduling for one gateway concentrator.

pub mod clock;
pub mod emission;
pub mod sub_band;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use tracing::{debug, trace};

pub use clock::{ConcentratorTime, RolloverClock, SystemClock, TimeSource, ROLLOVER_US};
pub use emission::{Emission, Emissions, FreeSlots, TxSchedulePriority};
pub use sub_band::{Candidates, SubBand};

use crate::band::{self, SubBandParameters};
use crate::config::{DutyCycleCeilings, SchedulerConfig};
use crate::error::Error;
use crate::frequency_plan::{FrequencyPlan, TimeOffAir};
use crate::hal::{toa, TxSettings, TxTime};
use clock::duration_us;

/// Computes the time-on-air of a payload sent with the given settings.
pub trait TimeOnAir: Send + Sync {
    fn compute(&self, payload_size: usize, settings: &TxSettings) -> Result<Duration, Error>;
}

impl<F> TimeOnAir for F
where
    F: Fn(usize, &TxSettings) -> Result<Duration, Error> + Send + Sync,
{
    fn compute(&self, payload_size: usize, settings: &TxSettings) -> Result<Duration, Error> {
        self(payload_size, settings)
    }
}

#[derive(Debug)]
struct State {
    clock: RolloverClock,
    sub_bands: Vec<SubBand>,
    emissions: Emissions,
}

impl State {
    fn find_sub_band(&self, frequency: u64) -> Result<usize, Error> {
        self.sub_bands
            .iter()
            .position(|sb| sb.comprises(frequency))
            .ok_or(Error::SubBandNotFound { frequency })
    }

    /// Concentrator time of the requested transmission at server time
    /// `server`. Without a synced clock the raw counter value is taken as is.
    fn requested_time(&self, time: TxTime, server: SystemTime) -> Result<ConcentratorTime, Error> {
        match time {
            TxTime::Immediate => Ok(self.clock.server_time(server).unwrap_or(ConcentratorTime::ZERO)),
            TxTime::Timestamp(timestamp) if self.clock.is_synced() => self.clock.timestamp_time(timestamp, server),
            TxTime::Timestamp(timestamp) => Ok(ConcentratorTime::from_micros(timestamp as i64)),
            TxTime::GatewayTime(gateway) => self.clock.gateway_time(gateway),
        }
    }

    fn commit(&mut self, em: Emission, now: Option<ConcentratorTime>, toa: &TimeOffAir) {
        if let Some(now) = now {
            self.emissions.prune(now, toa);
        }
        self.emissions.insert(em);
    }
}

/// Packet scheduler that takes time conflicts and sub-band duty-cycle
/// restrictions into account.
///
/// One scheduler serves one gateway connection. Every operation holds the
/// scheduler lock for its full duration, so concurrent requests never observe
/// the same free slot.
///
/// Emissions that are over are dropped from the timeline and the duty-cycle
/// ledgers relative to the current concentrator time. While the clock is not
/// synced there is no current time, so nothing is dropped until the first
/// sync; raw counter values then share the time domain of the synced clock.
pub struct Scheduler {
    config: SchedulerConfig,
    plan: FrequencyPlan,
    time_off_air: TimeOffAir,
    time_on_air: Box<dyn TimeOnAir>,
    time_source: Arc<dyn TimeSource>,
    state: Mutex<State>,
}

impl Scheduler {
    /// Instantiates a scheduler for the frequency plan with the default configuration.
    pub fn new(plan: &FrequencyPlan, enforce_duty_cycle: bool) -> Result<Self, Error> {
        Self::with_config(plan, enforce_duty_cycle, SchedulerConfig::default())
    }

    pub fn with_config(plan: &FrequencyPlan, enforce_duty_cycle: bool, config: SchedulerConfig) -> Result<Self, Error> {
        let mut time_off_air = plan.time_off_air;
        if time_off_air.duration < config.queue_delay {
            time_off_air.duration = config.queue_delay;
        }
        let sub_bands: Vec<SubBand> = if enforce_duty_cycle {
            band::get_by_id(&plan.band_id)?
                .sub_bands
                .into_iter()
                .map(|params| SubBand::new(params, config.duty_cycle_window, config.duty_cycle_ceilings.clone()))
                .collect()
        } else {
            vec![SubBand::new(
                SubBandParameters::unrestricted(),
                config.duty_cycle_window,
                DutyCycleCeilings::unrestricted(),
            )]
        };
        debug!(
            band_id = %plan.band_id,
            sub_bands = sub_bands.len(),
            enforce_duty_cycle,
            time_off_air = ?time_off_air.duration,
            "scheduler created"
        );
        Ok(Self {
            config,
            plan: plan.clone(),
            time_off_air,
            time_on_air: Box::new(toa::compute),
            time_source: Arc::new(SystemClock),
            state: Mutex::new(State {
                clock: RolloverClock::new(),
                sub_bands,
                emissions: Emissions::new(),
            }),
        })
    }

    /// Replaces the server wall clock.
    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    /// Replaces the time-on-air computation.
    pub fn with_time_on_air<T: TimeOnAir + 'static>(mut self, time_on_air: T) -> Self {
        self.time_on_air = Box::new(time_on_air);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Recharge delay applied after emissions, floored to the queue delay.
    pub fn time_off_air(&self) -> &TimeOffAir {
        &self.time_off_air
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Checks come before mutations, so a panicking holder leaves consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_emission(
        &self,
        payload_size: usize,
        settings: &TxSettings,
        start: ConcentratorTime,
        priority: TxSchedulePriority,
    ) -> Result<Emission, Error> {
        let d = self.time_on_air.compute(payload_size, settings)?;
        trace!(frequency = settings.freq_hz, payload_size, time_on_air = ?d, "computed time-on-air");
        if !self.plan.respects_dwell_time(true, settings.freq_hz, d) {
            return Err(Error::DwellTime {
                frequency: settings.freq_hz,
                time_on_air: d,
            });
        }
        Ok(Emission::new(start, d, priority))
    }

    /// Schedules the transmission exactly at the time in `settings`.
    pub fn schedule_at(
        &self,
        payload_size: usize,
        settings: &TxSettings,
        priority: TxSchedulePriority,
    ) -> Result<Emission, Error> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let server = self.time_source.now();
        let now = state.clock.server_time(server).ok();
        let start = state.requested_time(settings.time, server)?;
        if let Some(now) = now {
            let delta_us = start - now;
            if delta_us < duration_us(self.config.schedule_time_short) {
                debug!(frequency = settings.freq_hz, delta_us, "too late to schedule");
                return Err(Error::TooLate { delta_us });
            }
        }
        let i = state.find_sub_band(settings.freq_hz)?;
        let em = self.new_emission(payload_size, settings, start, priority)?;
        if let Some(other) = state.emissions.conflict(&em, &self.time_off_air) {
            debug!(start = %em.starts(), other = %other.starts(), "scheduling conflict");
            return Err(Error::Conflict { start: Some(em.starts()) });
        }
        state.sub_bands[i].schedule(em, now)?;
        state.commit(em, now, &self.time_off_air);
        debug!(
            frequency = settings.freq_hz,
            start = %em.starts(),
            duration = ?em.duration(),
            ?priority,
            "scheduled emission"
        );
        Ok(em)
    }

    /// Schedules the transmission at the first time at or after the time in
    /// `settings` that is free of conflicts and within duty-cycle.
    ///
    /// Immediate transmissions are not supported as such: conflicts and
    /// duty-cycle cannot be evaluated for an unknown emission time. With a
    /// synced clock, requests sooner than the long scheduling horizon
    /// (immediate ones included) are moved out to exactly that horizon.
    pub fn schedule_anytime(
        &self,
        payload_size: usize,
        settings: &TxSettings,
        priority: TxSchedulePriority,
    ) -> Result<Emission, Error> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let server = self.time_source.now();
        let now = state.clock.server_time(server).ok();
        let mut start = state.requested_time(settings.time, server)?;
        if let Some(now) = now {
            let earliest = now + self.config.schedule_time_long;
            if start < earliest {
                trace!(requested = %start, %earliest, "moving request to the scheduling horizon");
                start = earliest;
            }
        }
        let i = state.find_sub_band(settings.freq_hz)?;
        let requested = self.new_emission(payload_size, settings, start, priority)?;
        let limit = start + self.config.max_anytime_delay;

        let em = {
            let State {
                sub_bands, emissions, ..
            } = &mut *state;
            let mut slots = emissions.free_slots(requested, &self.time_off_air, limit);
            sub_bands[i]
                .schedule_anytime(requested.duration(), &mut slots, priority, now)
                .map_err(|err| match err {
                    Error::Conflict { start: None } => Error::Conflict { start: Some(start) },
                    other => other,
                })?
        };
        state.commit(em, now, &self.time_off_air);
        debug!(
            frequency = settings.freq_hz,
            requested = %start,
            start = %em.starts(),
            duration = ?em.duration(),
            ?priority,
            "scheduled emission"
        );
        Ok(em)
    }

    /// Synchronizes the clock with the concentrator counter `timestamp` read at `server`.
    pub fn sync(&self, timestamp: u32, server: SystemTime) -> ConcentratorTime {
        self.lock().clock.sync(timestamp, server)
    }

    /// Synchronizes the clock with the concentrator counter `timestamp` read at
    /// `server`, which the gateway reports as its own time `gateway`.
    pub fn sync_with_gateway(&self, timestamp: u32, server: SystemTime, gateway: SystemTime) -> ConcentratorTime {
        self.lock().clock.sync_with_gateway(timestamp, server, gateway)
    }

    /// Current concentrator time, or `None` while the clock is not synced.
    pub fn now(&self) -> Option<ConcentratorTime> {
        let state = self.lock();
        state.clock.server_time(self.time_source.now()).ok()
    }

    /// Snapshot of the committed emissions, ordered by start time.
    pub fn emissions(&self) -> Vec<Emission> {
        self.lock().emissions.iter().copied().collect()
    }

    pub fn sub_bands(&self) -> Vec<SubBandParameters> {
        self.lock().sub_bands.iter().map(|sb| *sb.parameters()).collect()
    }

    /// Airtime admitted within `[from, to)` in the sub-band of `frequency`.
    pub fn airtime(&self, frequency: u64, from: ConcentratorTime, to: ConcentratorTime) -> Result<Duration, Error> {
        let state = self.lock();
        let i = state.find_sub_band(frequency)?;
        Ok(state.sub_bands[i].airtime(from, to))
    }
}
