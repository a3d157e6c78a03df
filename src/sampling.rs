//! Periodic sampling: rate limiting, range validation and smoothing.

use crate::air_quality::AirQuality;
use crate::config::Config;
use crate::filter::FilterState;
use crate::{Error, SensorReading};

/// Monotonic millisecond time source.
pub trait Clock {
    fn now_ms(&mut self) -> u64;
}

impl<F> Clock for F
where
    F: FnMut() -> u64,
{
    fn now_ms(&mut self) -> u64 {
        self()
    }
}

/// Outcome of a sampling request that did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Refresh {
    /// A new reading was taken and the filtered values were updated.
    Updated,
    /// The refresh interval has not elapsed yet. Nothing was read; `valid`
    /// repeats whether the cached values came from a successful cycle.
    Skipped { valid: bool },
}

/// Sampling pipeline state.
///
/// The pipeline does not own a timer. The caller polls [`Sampler::update`]
/// from its own loop and the pipeline only reads when the refresh interval has
/// passed since the previous attempt. Failed attempts count as well so that a
/// faulty bus is not hammered.
#[derive(Clone, Debug)]
pub struct Sampler {
    refresh_interval_ms: u64,
    min_co2_ppm: u32,
    max_co2_ppm: u32,
    last_attempt_ms: Option<u64>,
    filters: FilterState,
    air_quality: Option<AirQuality>,
    data_valid: bool,
}

impl Sampler {
    pub fn new(config: &Config) -> Self {
        Self {
            refresh_interval_ms: config.refresh_interval_ms,
            min_co2_ppm: config.min_co2_ppm,
            max_co2_ppm: config.max_co2_ppm,
            last_attempt_ms: None,
            filters: FilterState::new(config.ewma_alpha),
            air_quality: None,
            data_valid: false,
        }
    }

    /// Whether a call to [`Sampler::update`] at `now_ms` would read.
    pub fn is_due(&self, now_ms: u64) -> bool {
        match self.last_attempt_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.refresh_interval_ms,
        }
    }

    /// Run one sampling cycle if it is due, taking the raw reading from `read`.
    ///
    /// On failure the filtered values are kept as they are and the data is
    /// marked invalid.
    pub fn update<F>(&mut self, now_ms: u64, read: F) -> Result<Refresh, Error>
    where
        F: FnOnce() -> Result<SensorReading, Error>,
    {
        if !self.is_due(now_ms) {
            log::trace!("sampling skipped, last attempt at {:?}ms", self.last_attempt_ms);
            return Ok(Refresh::Skipped {
                valid: self.data_valid,
            });
        }
        self.last_attempt_ms = Some(now_ms);

        match read().and_then(|reading| self.ingest(&reading)) {
            Ok(()) => {
                self.data_valid = true;
                Ok(Refresh::Updated)
            }
            Err(err) => {
                self.data_valid = false;
                Err(err)
            }
        }
    }

    fn ingest(&mut self, reading: &SensorReading) -> Result<(), Error> {
        if !(self.min_co2_ppm..=self.max_co2_ppm).contains(&reading.co2_ppm) {
            log::warn!(
                "CO2 reading of {}ppm outside of [{}, {}]ppm, discarded",
                reading.co2_ppm,
                self.min_co2_ppm,
                self.max_co2_ppm
            );
            return Err(Error::InvalidData);
        }

        self.filters.temperature.apply(reading.temp_celsius);
        let co2 = self.filters.co2.apply(reading.co2_ppm as f32);
        self.air_quality = Some(AirQuality::from_co2_ppm(co2));
        Ok(())
    }

    /// Whether the last sampling cycle succeeded.
    pub fn is_data_valid(&self) -> bool {
        self.data_valid
    }

    /// Smoothed CO₂ concentration in ppm, `None` before the first good cycle.
    pub fn filtered_co2(&self) -> Option<f32> {
        self.filters.co2.value()
    }

    /// Smoothed temperature in °C, `None` before the first good cycle.
    pub fn filtered_temperature(&self) -> Option<f32> {
        self.filters.temperature.value()
    }

    pub fn air_quality(&self) -> Option<AirQuality> {
        self.air_quality
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    fn reading(co2_ppm: u32, temp_celsius: f32) -> Result<SensorReading, Error> {
        Ok(SensorReading {
            co2_ppm,
            temp_celsius,
            valid: true,
            timestamp_ms: 0,
        })
    }

    #[test]
    fn test_first_update_is_always_due() {
        let mut sampler = Sampler::new(&Config::default());
        assert!(sampler.is_due(0));
        assert_eq!(sampler.update(0, || reading(800, 21.0)), Ok(Refresh::Updated));
        assert_eq!(sampler.filtered_co2(), Some(800.0));
        assert_eq!(sampler.filtered_temperature(), Some(21.0));
        assert_eq!(sampler.air_quality(), Some(AirQuality::Excellent));
        assert!(sampler.is_data_valid());
    }

    #[test]
    fn test_rate_limiting() {
        let reads = Cell::new(0);
        let read = || {
            reads.set(reads.get() + 1);
            reading(900, 20.0)
        };
        let mut sampler = Sampler::new(&Config::default());
        assert_eq!(sampler.update(10_000, read), Ok(Refresh::Updated));
        assert_eq!(
            sampler.update(11_999, read),
            Ok(Refresh::Skipped { valid: true })
        );
        assert_eq!(reads.get(), 1);
        assert_eq!(sampler.update(12_000, read), Ok(Refresh::Updated));
        assert_eq!(reads.get(), 2);
    }

    #[test]
    fn test_failed_attempt_is_rate_limited_too() {
        let mut sampler = Sampler::new(&Config::default());
        assert_eq!(
            sampler.update(0, || Err(Error::NotResponding)),
            Err(Error::NotResponding)
        );
        assert_eq!(
            sampler.update(1000, || reading(800, 20.0)),
            Ok(Refresh::Skipped { valid: false })
        );
    }

    #[test]
    fn test_range_is_inclusive() {
        for (co2_ppm, accepted) in [(399, false), (400, true), (5000, true), (5001, false)] {
            let mut sampler = Sampler::new(&Config::default());
            let result = sampler.update(0, || reading(co2_ppm, 20.0));
            if accepted {
                assert_eq!(result, Ok(Refresh::Updated), "{}ppm", co2_ppm);
            } else {
                assert_eq!(result, Err(Error::InvalidData), "{}ppm", co2_ppm);
                assert_eq!(sampler.filtered_co2(), None);
            }
            assert_eq!(sampler.is_data_valid(), accepted);
        }
    }

    #[test]
    fn test_failure_keeps_stale_values() {
        let mut sampler = Sampler::new(&Config::default());
        sampler.update(0, || reading(1500, 22.5)).unwrap();
        assert_eq!(
            sampler.update(2000, || Err(Error::ChecksumMismatch)),
            Err(Error::ChecksumMismatch)
        );
        assert!(!sampler.is_data_valid());
        assert_eq!(sampler.filtered_co2(), Some(1500.0));
        assert_eq!(sampler.filtered_temperature(), Some(22.5));
        assert_eq!(sampler.air_quality(), Some(AirQuality::Moderate));
    }

    #[test]
    fn test_rejected_reading_does_not_enter_filters() {
        let mut sampler = Sampler::new(&Config::default());
        sampler.update(0, || reading(1000, 20.0)).unwrap();
        assert_eq!(sampler.update(2000, || reading(6000, 30.0)), Err(Error::InvalidData));
        sampler.update(4000, || reading(1000, 20.0)).unwrap();
        assert_eq!(sampler.filtered_co2(), Some(1000.0));
        assert_eq!(sampler.filtered_temperature(), Some(20.0));
    }

    #[test]
    fn test_filters_smooth_each_channel() {
        let mut sampler = Sampler::new(&Config::default());
        sampler.update(0, || reading(1000, 20.0)).unwrap();
        sampler.update(2000, || reading(2000, 30.0)).unwrap();
        // Moving average 1500, EWMA 0.3 * 1500 + 0.7 * 1000.
        assert_eq!(sampler.filtered_co2(), Some(0.3 * 1500.0 + (1.0 - 0.3) * 1000.0));
        assert_eq!(sampler.filtered_temperature(), Some(0.3 * 25.0 + (1.0 - 0.3) * 20.0));
        assert_eq!(sampler.air_quality(), Some(AirQuality::Good));
    }
}
