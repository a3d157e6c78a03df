//! Crate to read out the Aosong ACD1100 CO2 sensor.
//!
//! This crate provides an API to read out the nondispersive infrared (NDIR)
//! CO₂ sensor ACD1100 via its I2C interface, optionally behind an I2C
//! multiplexer, or via its serial (UART) interface.
//!
//! Besides single raw readings it provides a sampling pipeline that rate
//! limits reads, discards implausible concentrations, smooths CO₂ and
//! temperature, and classifies the smoothed CO₂ into an [`AirQuality`] level.
//!
//! The provided API is blocking and `no_std`.
//!
//!
//! # Example
//!
//! ```
//! use acd1100::Acd1100;
//!
//! # use embedded_hal_mock::delay::MockNoop;
//! # use embedded_hal_mock::i2c::{Mock as I2cMock, Transaction};
//! # use test_support::{ManualClock, I2C_MEASUREMENT_RESPONSE, SENSOR_ADDRESS};
//! # fn main() -> Result<(), acd1100::Error> {
//! # let i2c = I2cMock::new(&[
//! #     Transaction::write(SENSOR_ADDRESS, vec![0x03, 0x00]),
//! #     Transaction::read(SENSOR_ADDRESS, I2C_MEASUREMENT_RESPONSE.to_vec()),
//! # ]);
//! # let delay = MockNoop::new();
//! # let clock = ManualClock::new(0).source();
//! let mut co2sensor = Acd1100::new_i2c(i2c, delay, clock);
//! co2sensor.update()?;
//! println!(
//!     "CO₂ concentration: {:?}ppm, air quality: {:?}",
//!     co2sensor.filtered_co2(),
//!     co2sensor.air_quality()
//! );
//! # Ok(())
//! # }
//! ```
//!
//!
//! # Timing
//!
//! The driver does not own a timer. It is given a [`Clock`] (any
//! `FnMut() -> u64` returning monotonic milliseconds will do) and
//! [`Acd1100::update`] only talks to the sensor once the configured refresh
//! interval has passed. Call it as often as convenient.
//!
//!
//! # no_std
//!
//! This crate is `no_std` by default, unless the `std` feature is activated.
//! Currently, the `std` feature will only add [`std::error::Error`] trait
//! implementations to the error types.
//!
//!
//! # Versioning
//!
//! This crate uses [Semantic Versioning](https://semver.org/).

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(doc)]
extern crate std;

#[macro_use]
extern crate lazy_static;

use crate::command::CalibrationMode;
use crate::config::Config;
use crate::i2c::{I2cInterface, SensorText};
use crate::mux::{Diagnostics, NoDiagnostics, NoMux};
use crate::sampling::Sampler;
use crate::uart::UartInterface;
use core::convert::Infallible;
use core::fmt::{self, Debug, Display};
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::i2c::{Read as I2cRead, Write as I2cWrite};
use embedded_hal::serial::{Read as SerialRead, Write as SerialWrite};

pub mod air_quality;
pub mod checksum;
pub mod command;
pub mod config;
pub mod filter;
pub mod frame;
pub mod i2c;
pub mod mux;
mod nb_comm;
pub mod sampling;
pub mod uart;

pub use crate::air_quality::AirQuality;
pub use crate::sampling::{Clock, Refresh};

/// Which of the sensor's interfaces measurements are taken over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommunicationMode {
    I2c,
    Uart,
}

/// One decoded measurement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SensorReading {
    pub co2_ppm: u32,
    pub temp_celsius: f32,
    /// Cleared when an I2C CRC mismatch was tolerated.
    pub valid: bool,
    /// Clock time at which the measurement was requested.
    pub timestamp_ms: u64,
}

/// Stand-in for the interface a driver was not given.
///
/// Never used for communication. The driver has no link of this type and
/// reports [`Error::Communication`] instead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Unconnected;

impl I2cWrite for Unconnected {
    type Error = Infallible;

    fn write(&mut self, _address: u8, _bytes: &[u8]) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl I2cRead for Unconnected {
    type Error = Infallible;

    fn read(&mut self, _address: u8, _buffer: &mut [u8]) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl SerialRead<u8> for Unconnected {
    type Error = Infallible;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        Err(nb::Error::WouldBlock)
    }
}

impl SerialWrite<u8> for Unconnected {
    type Error = Infallible;

    fn write(&mut self, _word: u8) -> nb::Result<(), Self::Error> {
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        Ok(())
    }
}

/// Driver for the ACD1100 sensor.
///
/// * `I2C`: blocking I2C bus, or [`Unconnected`].
/// * `S`: serial port, or [`Unconnected`].
/// * `D`: delay provider.
/// * `C`: millisecond [`Clock`].
/// * `M`: I2C multiplexer, [`NoMux`] if the sensor is wired directly.
///
/// Every operation that talks to the sensor records its outcome, see
/// [`Acd1100::last_error`].
#[derive(Debug)]
pub struct Acd1100<I2C, S, D, C, M = NoMux> {
    config: Config,
    mode: CommunicationMode,
    i2c: Option<I2cInterface<I2C, M>>,
    uart: Option<UartInterface<S>>,
    delay: D,
    clock: C,
    sampler: Sampler,
    last_reading: Option<SensorReading>,
    last_error: Option<Error>,
}

impl<I2C, D, C> Acd1100<I2C, Unconnected, D, C, NoMux> {
    /// Create a new instance talking I2C to a directly wired sensor.
    ///
    /// * `i2c`: I2C bus the sensor is connected to.
    /// * `delay`: Delay provider for the sensor's conversion times.
    /// * `clock`: Monotonic millisecond clock for rate limiting.
    pub fn new_i2c(i2c: I2C, delay: D, clock: C) -> Self {
        Self::new(
            CommunicationMode::I2c,
            Some(I2cInterface::new(i2c)),
            None,
            delay,
            clock,
        )
    }
}

impl<I2C, D, C, M> Acd1100<I2C, Unconnected, D, C, M> {
    /// Create a new instance talking I2C to a sensor on `channel` of `mux`.
    pub fn new_i2c_muxed(i2c: I2C, mux: M, channel: u8, delay: D, clock: C) -> Self {
        Self::new(
            CommunicationMode::I2c,
            Some(I2cInterface::with_mux(i2c, mux, channel)),
            None,
            delay,
            clock,
        )
    }
}

impl<S, D, C> Acd1100<Unconnected, S, D, C, NoMux> {
    /// Create a new instance talking to the sensor's UART.
    ///
    /// * `uart`: Serial (UART) interface configured for
    ///   [`config::UART_BAUD_RATE`] baud, 8N1.
    pub fn new_uart(uart: S, delay: D, clock: C) -> Self {
        Self::new(
            CommunicationMode::Uart,
            None,
            Some(UartInterface::new(uart)),
            delay,
            clock,
        )
    }
}

impl<I2C, S, D, C, M> Acd1100<I2C, S, D, C, M> {
    /// Create a new instance with any combination of links.
    ///
    /// Operations in a `mode` whose link is missing fail with
    /// [`Error::Communication`].
    pub fn new(
        mode: CommunicationMode,
        i2c: Option<I2cInterface<I2C, M>>,
        uart: Option<UartInterface<S>>,
        delay: D,
        clock: C,
    ) -> Self {
        let config = Config::default();
        Self {
            config,
            mode,
            i2c,
            uart,
            delay,
            clock,
            sampler: Sampler::new(&config),
            last_reading: None,
            last_error: None,
        }
    }

    /// Replace the configuration. Resets the sampling pipeline.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self.sampler = Sampler::new(&config);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the owned links, delay provider and clock.
    pub fn release(self) -> (Option<I2cInterface<I2C, M>>, Option<UartInterface<S>>, D, C) {
        (self.i2c, self.uart, self.delay, self.clock)
    }

    pub fn communication_mode(&self) -> CommunicationMode {
        self.mode
    }

    /// Switch the interface used by subsequent operations.
    ///
    /// Only changes which link is used. The sensor's own interface selection
    /// is a matter of wiring.
    pub fn set_communication_mode(&mut self, mode: CommunicationMode) {
        if mode != self.mode {
            log::info!("switching communication mode to {:?}", mode);
        }
        self.mode = mode;
    }

    /// Outcome of the most recent operation, `None` if it succeeded.
    pub fn last_error(&self) -> Option<Error> {
        self.last_error
    }

    /// Most recent reading obtained by [`Acd1100::read_raw`] or
    /// [`Acd1100::update`], even if the pipeline rejected it afterwards.
    pub fn last_reading(&self) -> Option<SensorReading> {
        self.last_reading
    }

    /// Whether the last sampling cycle succeeded.
    pub fn is_data_valid(&self) -> bool {
        self.sampler.is_data_valid()
    }

    /// Smoothed CO₂ concentration in ppm.
    ///
    /// Keeps its value across failed cycles, check
    /// [`Acd1100::is_data_valid`] for freshness.
    pub fn filtered_co2(&self) -> Option<f32> {
        self.sampler.filtered_co2()
    }

    /// Smoothed temperature in °C.
    pub fn filtered_temperature(&self) -> Option<f32> {
        self.sampler.filtered_temperature()
    }

    pub fn air_quality(&self) -> Option<AirQuality> {
        self.sampler.air_quality()
    }

    fn record<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        self.last_error = result.as_ref().err().copied();
        result
    }
}

fn missing_link(mode: CommunicationMode) -> Error {
    log::warn!("no {:?} link configured", mode);
    Error::Communication
}

fn read_measurement<I2C, S, D, M, IE, SE>(
    mode: CommunicationMode,
    i2c: Option<&mut I2cInterface<I2C, M>>,
    uart: Option<&mut UartInterface<S>>,
    config: &Config,
    delay: &mut D,
    timestamp_ms: u64,
) -> Result<SensorReading, Error>
where
    I2C: I2cWrite<Error = IE> + I2cRead<Error = IE>,
    S: SerialRead<u8, Error = SE> + SerialWrite<u8, Error = SE>,
    D: DelayMs<u32>,
    M: mux::ChannelSelector,
    IE: Debug,
    SE: Debug,
{
    match mode {
        CommunicationMode::I2c => i2c
            .ok_or_else(|| missing_link(mode))?
            .read_measurement(config, delay, timestamp_ms),
        CommunicationMode::Uart => uart
            .ok_or_else(|| missing_link(mode))?
            .read_measurement(config, delay, timestamp_ms),
    }
}

impl<I2C, S, D, C, M, IE, SE> Acd1100<I2C, S, D, C, M>
where
    I2C: I2cWrite<Error = IE> + I2cRead<Error = IE>,
    S: SerialRead<u8, Error = SE> + SerialWrite<u8, Error = SE>,
    D: DelayMs<u32>,
    C: Clock,
    M: mux::ChannelSelector,
    IE: Debug,
    SE: Debug,
{
    /// Check that the sensor answers, running `diagnostics` if it does not.
    ///
    /// Pass [`NoDiagnostics`] to skip them or [`mux::BusScan`] to log what
    /// is on the bus.
    pub fn init<G: Diagnostics<I2C, M>>(&mut self, diagnostics: &mut G) -> Result<(), Error> {
        let result = self.check_connection(diagnostics);
        match result {
            Ok(()) => log::info!("ACD1100 answers on {:?}", self.mode),
            Err(err) => log::warn!("ACD1100 initialization failed: {}", err),
        }
        self.record(result)
    }

    /// Whether the sensor answers on the active interface.
    ///
    /// Over UART this only checks that a serial port is configured; the
    /// protocol has no side effect free request.
    pub fn is_connected(&mut self) -> bool {
        self.is_connected_with(&mut NoDiagnostics)
    }

    pub fn is_connected_with<G: Diagnostics<I2C, M>>(&mut self, diagnostics: &mut G) -> bool {
        self.check_connection(diagnostics).is_ok()
    }

    fn check_connection<G: Diagnostics<I2C, M>>(&mut self, diagnostics: &mut G) -> Result<(), Error> {
        match self.mode {
            CommunicationMode::I2c => {
                let link = self.i2c.as_mut().ok_or_else(|| missing_link(self.mode))?;
                link.probe(&self.config, &mut self.delay).map_err(|err| {
                    let (i2c, mux) = link.parts_mut();
                    diagnostics.connection_failed(i2c, mux, self.config.i2c_address);
                    err
                })
            }
            CommunicationMode::Uart => match self.uart {
                Some(_) => Ok(()),
                None => Err(missing_link(self.mode)),
            },
        }
    }

    /// Take one measurement right away, bypassing rate limiting and
    /// filtering.
    pub fn read_raw(&mut self) -> Result<SensorReading, Error> {
        let now = self.clock.now_ms();
        let result = read_measurement(
            self.mode,
            self.i2c.as_mut(),
            self.uart.as_mut(),
            &self.config,
            &mut self.delay,
            now,
        );
        if let Ok(reading) = result {
            self.last_reading = Some(reading);
        }
        self.record(result)
    }

    /// Run one sampling cycle if the refresh interval has elapsed.
    ///
    /// On success the filtered values and the air quality level are
    /// updated. On failure they keep their previous values and
    /// [`Acd1100::is_data_valid`] turns false. A skipped cycle leaves
    /// [`Acd1100::last_error`] untouched.
    pub fn update(&mut self) -> Result<Refresh, Error> {
        let now = self.clock.now_ms();
        let Self {
            config,
            mode,
            i2c,
            uart,
            delay,
            sampler,
            last_reading,
            ..
        } = &mut *self;
        let result = sampler.update(now, || {
            let reading = read_measurement(*mode, i2c.as_mut(), uart.as_mut(), config, delay, now)?;
            *last_reading = Some(reading);
            Ok(reading)
        });
        match result {
            Ok(Refresh::Skipped { .. }) => result,
            _ => self.record(result),
        }
    }

    fn with_i2c<T, F>(&mut self, operation: F) -> Result<T, Error>
    where
        F: FnOnce(&mut I2cInterface<I2C, M>, &Config, &mut D) -> Result<T, Error>,
    {
        let result = match self.i2c.as_mut() {
            Some(link) => operation(link, &self.config, &mut self.delay),
            None => Err(missing_link(CommunicationMode::I2c)),
        };
        self.record(result)
    }

    /// Select automatic (background) or manual calibration.
    ///
    /// Calibration and identity commands always go over I2C, whatever the
    /// active communication mode.
    pub fn set_calibration_mode(&mut self, mode: CalibrationMode) -> Result<(), Error> {
        self.with_i2c(|link, config, delay| link.set_calibration_mode(config, delay, mode))
    }

    pub fn calibration_mode(&mut self) -> Result<CalibrationMode, Error> {
        self.with_i2c(|link, config, delay| link.calibration_mode(config, delay))
    }

    /// Calibrate against a known concentration, usually fresh outdoor air.
    ///
    /// See [`command::DEFAULT_CALIBRATION_PPM`].
    pub fn manual_calibration(&mut self, target_ppm: u16) -> Result<(), Error> {
        self.with_i2c(|link, config, delay| link.manual_calibration(config, delay, target_ppm))
    }

    pub fn factory_reset(&mut self) -> Result<(), Error> {
        log::info!("resetting ACD1100 to factory settings");
        self.with_i2c(|link, config, delay| link.factory_reset(config, delay))
    }

    pub fn software_version(&mut self) -> Result<SensorText, Error> {
        self.with_i2c(|link, config, delay| link.software_version(config, delay))
    }

    pub fn sensor_id(&mut self) -> Result<SensorText, Error> {
        self.with_i2c(|link, config, delay| link.sensor_id(config, delay))
    }

    fn with_uart<T, F>(&mut self, operation: F) -> Result<T, Error>
    where
        F: FnOnce(&mut UartInterface<S>, &Config, &mut D) -> Result<T, Error>,
    {
        let result = match self.uart.as_mut() {
            Some(link) => operation(link, &self.config, &mut self.delay),
            None => Err(missing_link(CommunicationMode::Uart)),
        };
        self.record(result)
    }

    /// Send an arbitrary UART command.
    pub fn send_uart_command(&mut self, op_code: u8, payload: &[u8]) -> Result<(), Error> {
        self.with_uart(|link, config, delay| link.send_command(config, delay, op_code, payload))
    }

    /// Collect the reply to a command sent with
    /// [`Acd1100::send_uart_command`], see [`UartInterface::read_frame`].
    pub fn read_uart_frame(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.with_uart(|link, config, delay| link.read_frame(config, delay, buf))
    }
}

/// Driver errors.
///
/// Bus errors are logged where they occur and reported as
/// [`Error::Communication`] or [`Error::NotResponding`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// A transaction on the bus failed, or no link is configured for the
    /// requested interface.
    Communication,
    /// The sensor did not answer or answered with too few bytes.
    NotResponding,
    /// The answer was malformed or out of the plausible range.
    InvalidData,
    /// The answer failed checksum validation.
    ChecksumMismatch,
}

impl From<frame::Error> for Error {
    fn from(err: frame::Error) -> Self {
        log::warn!("UART frame rejected: {}", err);
        match err {
            frame::Error::InvalidStartByte(_) | frame::Error::PayloadTooLong(_) => Self::InvalidData,
            frame::Error::InvalidChecksum => Self::ChecksumMismatch,
            frame::Error::TooShort(_) => Self::NotResponding,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Communication => write!(f, "communication with the sensor failed"),
            Self::NotResponding => write!(f, "sensor is not responding"),
            Self::InvalidData => write!(f, "sensor returned invalid data"),
            Self::ChecksumMismatch => write!(f, "checksum mismatch"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
