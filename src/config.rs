//! Driver configuration.

/// Default 7 bit I2C address of the sensor.
pub const DEFAULT_I2C_ADDRESS: u8 = 0x2a;

/// Baud rate the sensor's UART runs at. The serial port itself is set up by
/// the caller.
pub const UART_BAUD_RATE: u32 = 1200;

/// How the I2C codec treats a response whose per-field CRC does not match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrcPolicy {
    /// Log the mismatch and return the reading anyway, flagged as not
    /// validated. This is what deployed firmware does.
    Lenient,
    /// Reject the reading with [`crate::Error::ChecksumMismatch`].
    Strict,
}

/// Timing, filtering and validation parameters.
///
/// All delays are in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Config {
    pub i2c_address: u8,
    /// Minimum time between two reads triggered by [`crate::Acd1100::update`].
    pub refresh_interval_ms: u64,
    /// Smallest CO₂ concentration accepted by the sampling pipeline.
    pub min_co2_ppm: u32,
    /// Largest CO₂ concentration accepted by the sampling pipeline.
    pub max_co2_ppm: u32,
    /// Weight of the newest sample in the exponential filter.
    pub ewma_alpha: f32,
    pub crc_policy: CrcPolicy,
    /// Sensor conversion time after an I2C measurement request.
    pub measurement_settle_ms: u32,
    /// Pause between writing an I2C command and reading back its echo.
    pub command_settle_ms: u32,
    /// Pause after switching the multiplexer channel.
    pub mux_settle_ms: u32,
    /// Pause between sending the UART measurement request and reading.
    pub uart_settle_ms: u32,
    /// Pause after each byte written to the UART.
    pub uart_byte_pacing_ms: u32,
    /// Pause before collecting the reply to a generic UART command.
    pub uart_response_wait_ms: u32,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            i2c_address: DEFAULT_I2C_ADDRESS,
            refresh_interval_ms: 2000,
            min_co2_ppm: 400,
            max_co2_ppm: 5000,
            ewma_alpha: 0.3,
            crc_policy: CrcPolicy::Lenient,
            measurement_settle_ms: 100,
            command_settle_ms: 5,
            mux_settle_ms: 20,
            uart_settle_ms: 1000,
            uart_byte_pacing_ms: 5,
            uart_response_wait_ms: 100,
        }
    }

    /// Same as [`Config::new`] but rejects readings that fail any CRC.
    pub const fn strict() -> Self {
        let mut config = Self::new();
        config.crc_policy = CrcPolicy::Strict;
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
