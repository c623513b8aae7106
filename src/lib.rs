//! Downlink scheduling for LoRa gateways.
//!
//! The [`Scheduler`] keeps a concentrator timeline free of overlapping
//! transmissions, tracks the wrapping 32-bit concentrator counter and enforces
//! the regional duty-cycle restrictions of each sub-band.

pub mod band;
pub mod config;
pub mod error;
pub mod frequency_plan;
pub mod hal;
pub mod scheduling;

pub use config::SchedulerConfig;
pub use error::Error;
pub use frequency_plan::{FrequencyPlan, TimeOffAir};
pub use hal::{TxSettings, TxTime};
pub use scheduling::{ConcentratorTime, Emission, Scheduler, TimeOnAir, TimeSource, TxSchedulePriority};
