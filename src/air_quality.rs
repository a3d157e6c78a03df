//! Air quality categories derived from the CO₂ concentration.

use core::fmt::{self, Display};

/// Five level air quality scale, ordered from best to worst.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum AirQuality {
    /// Up to 800ppm.
    Excellent = 1,
    /// Up to 1200ppm.
    Good = 2,
    /// Up to 2000ppm.
    Moderate = 3,
    /// Up to 3000ppm.
    Poor = 4,
    /// Above 3000ppm.
    Hazardous = 5,
}

impl AirQuality {
    /// Classify a (filtered) CO₂ concentration.
    pub fn from_co2_ppm(co2_ppm: f32) -> Self {
        if co2_ppm <= 800.0 {
            Self::Excellent
        } else if co2_ppm <= 1200.0 {
            Self::Good
        } else if co2_ppm <= 2000.0 {
            Self::Moderate
        } else if co2_ppm <= 3000.0 {
            Self::Poor
        } else {
            Self::Hazardous
        }
    }

    /// Ordinal level from 1 (excellent) to 5 (hazardous).
    pub fn level(&self) -> u8 {
        *self as u8
    }
}

impl Display for AirQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Moderate => "moderate",
            Self::Poor => "poor",
            Self::Hazardous => "hazardous",
        };
        f.write_str(name)
    }
}
