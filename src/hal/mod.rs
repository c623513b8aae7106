//! Radio-level parameters of a downlink as the concentrator sees them.

pub mod toa;

use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Modulation {
    LORA = 0x10,
    FSK = 0x20,
}

impl std::fmt::Display for Modulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Modulation::LORA => write!(f, "LoRa"),
            Modulation::FSK => write!(f, "FSK"),
        }
    }
}

/* values available for the 'bandwidth' parameter (LoRa) */
pub const BW_UNDEFINED: u8 = 0;
pub const BW_500KHZ: u8 = 0x06;
pub const BW_250KHZ: u8 = 0x05;
pub const BW_125KHZ: u8 = 0x04;

/* values available for the 'datarate' parameter */
pub const DR_UNDEFINED: u32 = 0;
pub const DR_LORA_SF5: u32 = 5;
pub const DR_LORA_SF6: u32 = 6;
pub const DR_LORA_SF7: u32 = 7;
pub const DR_LORA_SF8: u32 = 8;
pub const DR_LORA_SF9: u32 = 9;
pub const DR_LORA_SF10: u32 = 10;
pub const DR_LORA_SF11: u32 = 11;
pub const DR_LORA_SF12: u32 = 12;
pub const DR_FSK_MIN: u32 = 500;
pub const DR_FSK_MAX: u32 = 250000;

/* values available for the 'coderate' parameter (LoRa only) */
pub const CR_UNDEFINED: u8 = 0;
pub const CR_LORA_4_5: u8 = 0x01;
pub const CR_LORA_4_6: u8 = 0x02;
pub const CR_LORA_4_7: u8 = 0x03;
pub const CR_LORA_4_8: u8 = 0x04;

/// Bandwidth in Hz for one of the `BW_*` codes.
pub fn bandwidth_hz(bw: u8) -> Option<u32> {
    match bw {
        BW_500KHZ => Some(500000),
        BW_250KHZ => Some(250000),
        BW_125KHZ => Some(125000),
        _ => None,
    }
}

pub(crate) fn is_lora_bw(bw: u8) -> bool {
    matches!(bw, BW_125KHZ | BW_250KHZ | BW_500KHZ)
}

pub(crate) fn is_lora_dr(dr: u32) -> bool {
    (DR_LORA_SF5..=DR_LORA_SF12).contains(&dr)
}

pub(crate) fn is_lora_cr(cr: u8) -> bool {
    cr == CR_LORA_4_5 || cr == CR_LORA_4_6 || cr == CR_LORA_4_7 || cr == CR_LORA_4_8
}

pub(crate) fn is_fsk_dr(dr: u32) -> bool {
    (DR_FSK_MIN..=DR_FSK_MAX).contains(&dr)
}

/// When the concentrator should trigger the transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxTime {
    /// As soon as possible. The scheduler never sends truly immediate
    /// downlinks; see `Scheduler::schedule_anytime`.
    #[default]
    Immediate,
    /// Raw value of the 32-bit concentrator counter, in microseconds.
    Timestamp(u32),
    /// Gateway wall-clock time, for gateways that report GPS/absolute time.
    GatewayTime(SystemTime),
}

/// Transmission settings of a downlink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxSettings {
    pub freq_hz: u64,           /* center frequency of TX */
    pub time: TxTime,           /* select on what time the TX is triggered */
    pub modulation: Modulation, /* modulation to use for the packet */
    pub bandwidth: u8,          /* modulation bandwidth (LoRa only) */
    pub datarate: u32,          /* TX datarate (baudrate for FSK, SF for LoRa) */
    pub coderate: u8,           /* error-correcting code of the packet (LoRa only) */
    pub preamble: u16,          /* preamble length, 0 for default */
    pub enable_crc: bool,       /* append a payload CRC, downlinks normally don't */
    pub no_header: bool,        /* implicit header mode (LoRa), fixed length (FSK) */
}

impl Default for TxSettings {
    fn default() -> Self {
        Self {
            freq_hz: 0,
            time: TxTime::Immediate,
            modulation: Modulation::LORA,
            bandwidth: BW_UNDEFINED,
            datarate: DR_UNDEFINED,
            coderate: CR_UNDEFINED,
            preamble: 0,
            enable_crc: false,
            no_header: false,
        }
    }
}

impl TxSettings {
    /// LoRa settings with the usual downlink defaults (explicit header, no CRC).
    pub fn lora(freq_hz: u64, bandwidth: u8, spreading_factor: u32, time: TxTime) -> Self {
        Self {
            freq_hz,
            time,
            modulation: Modulation::LORA,
            bandwidth,
            datarate: spreading_factor,
            coderate: CR_LORA_4_5,
            ..Default::default()
        }
    }

    pub fn fsk(freq_hz: u64, datarate: u32, time: TxTime) -> Self {
        Self {
            freq_hz,
            time,
            modulation: Modulation::FSK,
            datarate,
            enable_crc: true,
            ..Default::default()
        }
    }
}
