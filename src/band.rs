//! Regional band table: the duty-cycle sub-bands of each region.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Frequency range `[min_frequency, max_frequency)` in Hz with its duty-cycle limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubBandParameters {
    pub min_frequency: u64,
    pub max_frequency: u64,
    pub duty_cycle: f64, /* fraction in (0, 1] */
}

impl SubBandParameters {
    /// Single sub-band spanning every frequency, without duty-cycle restriction.
    pub fn unrestricted() -> Self {
        Self {
            min_frequency: 0,
            max_frequency: u64::MAX,
            duty_cycle: 1.0,
        }
    }

    pub fn comprises(&self, frequency: u64) -> bool {
        frequency >= self.min_frequency && frequency < self.max_frequency
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub id: String,
    pub sub_bands: Vec<SubBandParameters>,
}

pub const EU_863_870: &str = "EU_863_870";
pub const EU_433: &str = "EU_433";
pub const US_902_928: &str = "US_902_928";
pub const AU_915_928: &str = "AU_915_928";
pub const AS_923: &str = "AS_923";
pub const KR_920_923: &str = "KR_920_923";
pub const IN_865_867: &str = "IN_865_867";
pub const CN_470_510: &str = "CN_470_510";

const fn sub_band(min_frequency: u64, max_frequency: u64, duty_cycle: f64) -> SubBandParameters {
    SubBandParameters {
        min_frequency,
        max_frequency,
        duty_cycle,
    }
}

/// Looks up the band with the given identifier.
pub fn get_by_id(id: &str) -> Result<Band, Error> {
    let sub_bands = match id {
        EU_863_870 => vec![
            sub_band(863000000, 865000000, 0.001),
            sub_band(865000000, 868000000, 0.01),
            sub_band(868000000, 868600000, 0.01),
            sub_band(868700000, 869200000, 0.001),
            sub_band(869400000, 869650000, 0.1),
            sub_band(869700000, 870000000, 0.01),
        ],
        EU_433 => vec![sub_band(433175000, 434665000, 0.01)],
        US_902_928 => vec![sub_band(902000000, 928000000, 1.0)],
        AU_915_928 => vec![sub_band(915000000, 928000000, 1.0)],
        AS_923 => vec![sub_band(915000000, 928000000, 0.01)],
        KR_920_923 => vec![sub_band(920900000, 923300000, 1.0)],
        IN_865_867 => vec![sub_band(865000000, 867000000, 1.0)],
        CN_470_510 => vec![sub_band(470000000, 510000000, 1.0)],
        _ => return Err(Error::UnknownBand(id.to_owned())),
    };
    Ok(Band {
        id: id.to_owned(),
        sub_bands,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eu_sub_bands() {
        let band = get_by_id(EU_863_870).unwrap();
        assert_eq!(band.sub_bands.len(), 6);
        let g3 = band.sub_bands.iter().find(|sb| sb.comprises(869525000)).unwrap();
        assert_eq!(g3.duty_cycle, 0.1);
        // 868.6 - 868.7 MHz is not a duty-cycle sub-band
        assert!(!band.sub_bands.iter().any(|sb| sb.comprises(868650000)));
    }

    #[test]
    fn test_range_is_half_open() {
        let sb = sub_band(865000000, 868000000, 0.01);
        assert!(sb.comprises(865000000));
        assert!(!sb.comprises(868000000));
        assert!(SubBandParameters::unrestricted().comprises(u64::MAX - 1));
    }

    #[test]
    fn test_unknown_band() {
        assert_eq!(get_by_id("XX_000"), Err(Error::UnknownBand("XX_000".to_owned())));
    }
}
