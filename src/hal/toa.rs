//! Time-on-air of LoRa and FSK packets.

use std::time::Duration;

use libm::ceil;
use tracing::{error, trace};

use super::{bandwidth_hz, is_fsk_dr, is_lora_bw, is_lora_cr, is_lora_dr, Modulation, TxSettings};
use crate::error::Error;

pub const LORA_DEFAULT_PREAMBLE: u16 = 8;
pub const FSK_DEFAULT_PREAMBLE: u16 = 5;
pub const FSK_SYNC_WORD_SIZE: u32 = 3;
pub const MAX_PAYLOAD_SIZE: usize = 255;

/// Breakdown of a LoRa packet duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoraAirtime {
    pub toa_us: u32,
    pub nb_symbols: f64,
    pub nb_symbols_payload: u32,
    pub t_symbol_us: u32,
}

pub fn lora_packet_time_on_air(
    bw: u8,
    sf: u8,
    cr: u8,
    n_symbol_preamble: u16,
    no_header: bool,
    no_crc: bool,
    size: u8,
) -> Result<LoraAirtime, Error> {
    /* Check input parameters */
    if !is_lora_dr(sf as u32) {
        error!(sf, "wrong datarate");
        return Err(Error::InvalidSettings("wrong LoRa datarate"));
    }
    if !is_lora_cr(cr) {
        error!(cr, "wrong coding rate");
        return Err(Error::InvalidSettings("wrong LoRa coding rate"));
    }
    let bw_hz = match bandwidth_hz(bw) {
        Some(hz) if is_lora_bw(bw) => hz,
        _ => {
            error!("unsupported bandwidth 0x{:02X}", bw);
            return Err(Error::InvalidSettings("wrong LoRa bandwidth"));
        }
    };
    let bw_pow = bw_hz / 125000;

    /* Duration of 1 symbol: 2^SF / BW, in microseconds */
    let t_symbol_us = (1u32 << sf) * 8 / bw_pow;

    /* Packet parameters */
    let h: i64 = if !no_header { 1 } else { 0 };
    let de: i64 = if sf >= 11 { 1 } else { 0 }; /* low datarate optimization for SF11 and SF12 */
    let n_bit_crc: i64 = if !no_crc { 16 } else { 0 };
    let sf = sf as i64;

    /* Number of symbols in the payload */
    let payload_bits = 8 * size as i64 + n_bit_crc - 4 * sf + if sf >= 7 { 8 } else { 0 } + 20 * h;
    let nb_symbols_payload =
        ceil(payload_bits.max(0) as f64 / (4 * (sf - 2 * de)) as f64) as u32 * (cr as u32 + 4);

    /* Number of symbols in packet */
    let nb_symbols =
        n_symbol_preamble as f64 + if sf >= 7 { 4.25 } else { 6.25 } + 8.0 + nb_symbols_payload as f64;

    let toa_us = (nb_symbols * t_symbol_us as f64) as u32;

    trace!(toa_us, nb_symbols, t_symbol_us, "LoRa packet time-on-air");

    Ok(LoraAirtime {
        toa_us,
        nb_symbols,
        nb_symbols_payload,
        t_symbol_us,
    })
}

/// Duration of a FSK packet: PREAMBLE + SYNC_WORD + PKT_LEN + PAYLOAD + CRC.
pub fn fsk_packet_time_on_air(datarate: u32, preamble: u16, no_crc: bool, size: usize) -> Result<Duration, Error> {
    if !is_fsk_dr(datarate) {
        return Err(Error::InvalidSettings("wrong FSK datarate"));
    }
    let bytes = preamble as u64 + FSK_SYNC_WORD_SIZE as u64 + 1 + size as u64 + if no_crc { 0 } else { 2 };
    let toa_us = (8 * bytes * 1_000_000).div_ceil(datarate as u64);
    Ok(Duration::from_micros(toa_us))
}

/// Time-on-air of a downlink of `payload_size` bytes sent with `settings`.
pub fn compute(payload_size: usize, settings: &TxSettings) -> Result<Duration, Error> {
    if payload_size > MAX_PAYLOAD_SIZE {
        return Err(Error::InvalidSettings("payload length too big"));
    }
    match settings.modulation {
        Modulation::LORA => {
            let sf = u8::try_from(settings.datarate)
                .map_err(|_| Error::InvalidSettings("wrong LoRa datarate"))?;
            let preamble = if settings.preamble == 0 {
                LORA_DEFAULT_PREAMBLE
            } else {
                settings.preamble
            };
            let airtime = lora_packet_time_on_air(
                settings.bandwidth,
                sf,
                settings.coderate,
                preamble,
                settings.no_header,
                !settings.enable_crc,
                payload_size as u8,
            )?;
            Ok(Duration::from_micros(airtime.toa_us as u64))
        }
        Modulation::FSK => {
            let preamble = if settings.preamble == 0 {
                FSK_DEFAULT_PREAMBLE
            } else {
                settings.preamble
            };
            fsk_packet_time_on_air(settings.datarate, preamble, !settings.enable_crc, payload_size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{TxTime, BW_125KHZ, BW_500KHZ, CR_LORA_4_5, DR_LORA_SF12, DR_LORA_SF7};

    #[test]
    fn test_lora_sf7_downlink() {
        let settings = TxSettings::lora(868100000, BW_125KHZ, DR_LORA_SF7, TxTime::Immediate);
        // 8 preamble + 4.25 + 8 header + 30 payload symbols of 1024 us
        assert_eq!(compute(20, &settings).unwrap(), Duration::from_micros(51456));
    }

    #[test]
    fn test_lora_symbol_breakdown() {
        let airtime = lora_packet_time_on_air(BW_125KHZ, 12, CR_LORA_4_5, 8, false, true, 51).unwrap();
        assert_eq!(airtime.t_symbol_us, 32768);
        assert_eq!(airtime.nb_symbols_payload, 50);
        assert_eq!(airtime.toa_us, 2301952);
    }

    #[test]
    fn test_wider_bandwidth_is_faster() {
        let narrow = TxSettings::lora(923300000, BW_125KHZ, DR_LORA_SF12, TxTime::Immediate);
        let wide = TxSettings { bandwidth: BW_500KHZ, ..narrow };
        assert!(compute(12, &wide).unwrap() < compute(12, &narrow).unwrap());
    }

    #[test]
    fn test_empty_payload_does_not_underflow() {
        let settings = TxSettings::lora(868100000, BW_125KHZ, DR_LORA_SF12, TxTime::Immediate);
        assert!(compute(0, &settings).is_ok());
    }

    #[test]
    fn test_fsk_airtime() {
        let settings = TxSettings::fsk(868800000, 50000, TxTime::Immediate);
        // (5 + 3 + 1 + 10 + 2) bytes at 50 kbps
        assert_eq!(compute(10, &settings).unwrap(), Duration::from_micros(3360));
    }

    #[test]
    fn test_invalid_settings() {
        let mut settings = TxSettings::lora(868100000, BW_125KHZ, DR_LORA_SF7, TxTime::Immediate);
        assert!(compute(256, &settings).is_err());
        settings.bandwidth = 0x07;
        assert!(matches!(compute(10, &settings), Err(Error::InvalidSettings(_))));
        settings.bandwidth = BW_125KHZ;
        settings.datarate = 300;
        assert!(matches!(compute(10, &settings), Err(Error::InvalidSettings(_))));
    }
}
