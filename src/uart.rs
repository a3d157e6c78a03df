//! UART protocol of the ACD1100.

use crate::command::UartCommand;
use crate::config::Config;
use crate::frame::{self, CommandFrame, MeasurementFrame, MEASUREMENT_FRAME_LEN, START_BYTE};
use crate::nb_comm::{drain, read_available, read_available_from, write_paced};
use crate::{Error, SensorReading};
use core::fmt::Debug;
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

lazy_static! {
    static ref READ_MEASUREMENT: CommandFrame = UartCommand::ReadMeasurement.into();
}

/// Serial link to the sensor.
#[derive(Debug)]
pub struct UartInterface<S> {
    uart: S,
}

impl<S> UartInterface<S> {
    /// * `uart`: Serial (UART) interface configured for
    ///   [`crate::config::UART_BAUD_RATE`] baud, 8N1.
    pub fn new(uart: S) -> Self {
        Self { uart }
    }

    /// Returns the owned UART interface.
    pub fn into_inner(self) -> S {
        self.uart
    }
}

impl<S, E> UartInterface<S>
where
    S: Read<u8, Error = E> + Write<u8, Error = E>,
    E: Debug,
{
    fn uart_error(err: E) -> Error {
        log::debug!("UART communication error: {:?}", err);
        Error::Communication
    }

    fn transmit<D: DelayMs<u32>>(&mut self, config: &Config, delay: &mut D, frame: &[u8]) -> Result<(), Error> {
        let stale = drain(&mut self.uart).map_err(Self::uart_error)?;
        if stale > 0 {
            log::debug!("discarded {} stale bytes", stale);
        }
        write_paced(&mut self.uart, frame, delay, config.uart_byte_pacing_ms).map_err(Self::uart_error)
    }

    /// Request and decode one measurement.
    ///
    /// Unlike the I2C protocol, a checksum mismatch always rejects the reading.
    pub fn read_measurement<D: DelayMs<u32>>(
        &mut self,
        config: &Config,
        delay: &mut D,
        timestamp_ms: u64,
    ) -> Result<SensorReading, Error> {
        self.transmit(config, delay, READ_MEASUREMENT.as_ref())?;
        delay.delay_ms(config.uart_settle_ms);

        let mut response = [0u8; MEASUREMENT_FRAME_LEN];
        let bytes_read = read_available(&mut self.uart, &mut response).map_err(Self::uart_error)?;
        if bytes_read == 0 {
            log::warn!("no reply on UART, check TX/RX wiring and baud rate");
            return Err(Error::NotResponding);
        }
        if bytes_read < MEASUREMENT_FRAME_LEN {
            log::warn!(
                "expected {} bytes on UART, got {}: {:02x?}",
                MEASUREMENT_FRAME_LEN,
                bytes_read,
                &response[..bytes_read]
            );
            return Err(Error::NotResponding);
        }
        log::debug!("measurement response: {:02x?}", response);

        let frame = MeasurementFrame::new(response);
        frame.validate().map_err(Error::from)?;
        Ok(SensorReading {
            co2_ppm: frame.co2_ppm(),
            temp_celsius: frame.temp_celsius(),
            valid: true,
            timestamp_ms,
        })
    }

    /// Frame and transmit the command `op_code` with `payload`.
    pub fn send_command<D: DelayMs<u32>>(
        &mut self,
        config: &Config,
        delay: &mut D,
        op_code: u8,
        payload: &[u8],
    ) -> Result<(), Error> {
        let frame = CommandFrame::new(op_code, payload).map_err(Error::from)?;
        self.transmit(config, delay, frame.as_ref())
    }

    /// Collect a reply of at most `buf.len()` bytes, skipping anything in
    /// front of the start byte, and verify its checksum.
    ///
    /// Returns the number of bytes stored in `buf`.
    pub fn read_frame<D: DelayMs<u32>>(
        &mut self,
        config: &Config,
        delay: &mut D,
        buf: &mut [u8],
    ) -> Result<usize, Error> {
        delay.delay_ms(config.uart_response_wait_ms);
        let bytes_read = read_available_from(&mut self.uart, START_BYTE, buf).map_err(Self::uart_error)?;
        match frame::validate_response(&buf[..bytes_read]) {
            Ok(()) => Ok(bytes_read),
            Err(frame::Error::TooShort(len)) => {
                log::warn!("reply of {} bytes is too short", len);
                Err(Error::NotResponding)
            }
            Err(err) => Err(err.into()),
        }
    }
}
