//! I2C protocol of the ACD1100.
//!
//! Every exchange starts with a two byte command pair. The measurement reply
//! interleaves a CRC-8 after each two byte field:
//!
//! ```text
//! [0x55] CO2_3 CO2_2 CRC CO2_1 CO2_0 CRC TEMP_H TEMP_L CRC
//! ```
//!
//! The leading `0x55` address marker is missing on some firmware variants, in
//! which case the first byte is `0x00` and belongs to the data.

use crate::checksum::crc8;
use crate::command::{CalibrationMode, I2cCommand};
use crate::config::{Config, CrcPolicy};
use crate::mux::{ChannelSelector, MuxChannel, NoMux};
use crate::{Error, SensorReading};
use core::fmt::Debug;
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::i2c::{Read, Write};

/// First byte of a measurement reply that carries the address marker.
pub const ADDRESS_MARKER: u8 = 0x55;
const MEASUREMENT_LEN: usize = 10;
const MAX_PAYLOAD_LEN: usize = 4;
const TEXT_LEN: usize = 10;

/// Firmware version or sensor id as reported by the sensor.
pub type SensorText = heapless::String<TEXT_LEN>;

/// I2C link to the sensor, optionally behind a multiplexer channel.
#[derive(Debug)]
pub struct I2cInterface<I2C, M = NoMux> {
    i2c: I2C,
    mux: Option<MuxChannel<M>>,
}

impl<I2C> I2cInterface<I2C, NoMux> {
    /// Sensor wired directly to `i2c`.
    pub fn new(i2c: I2C) -> Self {
        Self { i2c, mux: None }
    }
}

impl<I2C, M> I2cInterface<I2C, M> {
    /// Sensor reachable through `channel` of `mux`.
    pub fn with_mux(i2c: I2C, mux: M, channel: u8) -> Self {
        Self {
            i2c,
            mux: Some(MuxChannel { mux, channel }),
        }
    }

    /// Returns the owned bus and multiplexer.
    pub fn release(self) -> (I2C, Option<MuxChannel<M>>) {
        (self.i2c, self.mux)
    }

    /// Move the sensor to another multiplexer channel. Ignored without a
    /// multiplexer.
    pub fn set_channel(&mut self, channel: u8) {
        if let Some(mux) = self.mux.as_mut() {
            mux.channel = channel;
        }
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut I2C, Option<&mut MuxChannel<M>>) {
        (&mut self.i2c, self.mux.as_mut())
    }
}

impl<I2C, M, E> I2cInterface<I2C, M>
where
    I2C: Write<Error = E> + Read<Error = E>,
    E: Debug,
    M: ChannelSelector,
{
    /// Select the sensor's multiplexer channel, if there is one.
    fn acquire<D: DelayMs<u32>>(&mut self, config: &Config, delay: &mut D) -> Result<(), Error> {
        if let Some(MuxChannel { mux, channel }) = self.mux.as_mut() {
            mux.select_channel(*channel).map_err(|err| {
                log::warn!("selecting multiplexer channel {} failed: {:?}", channel, err);
                Error::Communication
            })?;
            delay.delay_ms(config.mux_settle_ms);
        }
        Ok(())
    }

    fn write(&mut self, config: &Config, bytes: &[u8]) -> Result<(), Error> {
        self.i2c.write(config.i2c_address, bytes).map_err(|err| {
            log::debug!("I2C write of {:02x?} failed: {:?}", bytes, err);
            Error::Communication
        })
    }

    fn read(&mut self, config: &Config, buf: &mut [u8]) -> Result<(), Error> {
        self.i2c.read(config.i2c_address, buf).map_err(|err| {
            log::debug!("I2C read of {} bytes failed: {:?}", buf.len(), err);
            Error::NotResponding
        })
    }

    /// Check whether the sensor acknowledges its address.
    pub fn probe<D: DelayMs<u32>>(&mut self, config: &Config, delay: &mut D) -> Result<(), Error> {
        self.acquire(config, delay)?;
        self.write(config, &[])
    }

    /// Request and decode one measurement.
    pub fn read_measurement<D: DelayMs<u32>>(
        &mut self,
        config: &Config,
        delay: &mut D,
        timestamp_ms: u64,
    ) -> Result<SensorReading, Error> {
        self.acquire(config, delay)?;
        self.write(config, &I2cCommand::ReadMeasurement.code())?;
        delay.delay_ms(config.measurement_settle_ms);

        let mut response = [0u8; MEASUREMENT_LEN];
        self.read(config, &mut response)?;
        log::debug!("measurement response: {:02x?}", response);
        decode_measurement(&response, config.crc_policy, timestamp_ms)
    }

    /// Send a bare command pair and read its `N` byte reply.
    pub fn query<D: DelayMs<u32>, const N: usize>(
        &mut self,
        config: &Config,
        delay: &mut D,
        command: I2cCommand,
    ) -> Result<[u8; N], Error> {
        debug_assert_eq!(N, command.response_len());
        self.acquire(config, delay)?;
        self.write(config, &command.code())?;
        let mut response = [0u8; N];
        self.acquire(config, delay)?;
        self.read(config, &mut response)?;
        Ok(response)
    }

    /// Write `command` with `payload`, then read the setting back and check it
    /// with `accept`.
    ///
    /// A reply rejected by `accept` is reported as [`Error::InvalidData`].
    pub fn write_then_verify<D, F, const N: usize>(
        &mut self,
        config: &Config,
        delay: &mut D,
        command: I2cCommand,
        payload: &[u8],
        accept: F,
    ) -> Result<[u8; N], Error>
    where
        D: DelayMs<u32>,
        F: FnOnce(&[u8; N]) -> bool,
    {
        let mut frame: heapless::Vec<u8, { 2 + MAX_PAYLOAD_LEN }> = heapless::Vec::new();
        frame
            .extend_from_slice(&command.code())
            .and_then(|()| frame.extend_from_slice(payload))
            .map_err(|()| Error::InvalidData)?;

        self.acquire(config, delay)?;
        self.write(config, &frame)?;
        delay.delay_ms(config.command_settle_ms);

        let response = self.query(config, delay, command)?;
        if accept(&response) {
            Ok(response)
        } else {
            log::warn!("{:?} not confirmed, sensor replied {:02x?}", command, response);
            Err(Error::InvalidData)
        }
    }

    pub fn set_calibration_mode<D: DelayMs<u32>>(
        &mut self,
        config: &Config,
        delay: &mut D,
        mode: CalibrationMode,
    ) -> Result<(), Error> {
        let flag = mode.flag();
        self.write_then_verify(
            config,
            delay,
            I2cCommand::CalibrationMode,
            &[0x00, flag],
            |response: &[u8; 4]| response[3] == flag,
        )
        .map(|_| ())
    }

    pub fn calibration_mode<D: DelayMs<u32>>(
        &mut self,
        config: &Config,
        delay: &mut D,
    ) -> Result<CalibrationMode, Error> {
        let response: [u8; 4] = self.query(config, delay, I2cCommand::CalibrationMode)?;
        Ok(CalibrationMode::from_flag(response[3]))
    }

    /// Calibrate the sensor to the known concentration `target_ppm`.
    pub fn manual_calibration<D: DelayMs<u32>>(
        &mut self,
        config: &Config,
        delay: &mut D,
        target_ppm: u16,
    ) -> Result<(), Error> {
        self.write_then_verify(
            config,
            delay,
            I2cCommand::ManualCalibration,
            &target_ppm.to_be_bytes(),
            |response: &[u8; 4]| u16::from_be_bytes([response[1], response[2]]) == target_ppm,
        )
        .map(|_| ())
    }

    pub fn factory_reset<D: DelayMs<u32>>(&mut self, config: &Config, delay: &mut D) -> Result<(), Error> {
        self.write_then_verify(
            config,
            delay,
            I2cCommand::FactoryReset,
            &[0x00],
            |response: &[u8; 4]| response[3] == 0x01,
        )
        .map(|_| ())
    }

    pub fn software_version<D: DelayMs<u32>>(
        &mut self,
        config: &Config,
        delay: &mut D,
    ) -> Result<SensorText, Error> {
        let response: [u8; TEXT_LEN + 1] = self.query(config, delay, I2cCommand::SoftwareVersion)?;
        decode_text(&response[1..])
    }

    pub fn sensor_id<D: DelayMs<u32>>(&mut self, config: &Config, delay: &mut D) -> Result<SensorText, Error> {
        let response: [u8; TEXT_LEN + 1] = self.query(config, delay, I2cCommand::SensorId)?;
        decode_text(&response[1..])
    }
}

/// Decode a 10 byte measurement reply.
///
/// CRC mismatches are logged. Under [`CrcPolicy::Lenient`] the reading is
/// still returned with [`SensorReading::valid`] cleared, under
/// [`CrcPolicy::Strict`] it is rejected.
pub fn decode_measurement(
    response: &[u8; MEASUREMENT_LEN],
    crc_policy: CrcPolicy,
    timestamp_ms: u64,
) -> Result<SensorReading, Error> {
    let start = match response[0] {
        ADDRESS_MARKER => 1,
        0x00 => 0,
        other => {
            log::warn!("unexpected first byte 0x{:02x} in measurement reply", other);
            return Err(Error::InvalidData);
        }
    };
    let data = &response[start..];

    let mut valid = true;
    for field in [0, 3, 6] {
        let expected = crc8(&data[field..field + 2]);
        if data[field + 2] != expected {
            log::warn!(
                "CRC mismatch for bytes {:02x?}: got 0x{:02x}, expected 0x{:02x}",
                &data[field..field + 2],
                data[field + 2],
                expected
            );
            valid = false;
        }
    }
    if !valid && crc_policy == CrcPolicy::Strict {
        return Err(Error::ChecksumMismatch);
    }

    Ok(SensorReading {
        co2_ppm: u32::from_be_bytes([data[0], data[1], data[3], data[4]]),
        temp_celsius: f32::from(i16::from_be_bytes([data[6], data[7]])) / 100.0,
        valid,
        timestamp_ms,
    })
}

fn decode_text(bytes: &[u8]) -> Result<SensorText, Error> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let text = core::str::from_utf8(&bytes[..end]).map_err(|_| Error::InvalidData)?;
    let text = text.trim_end_matches(' ');
    if !text.is_ascii() {
        return Err(Error::InvalidData);
    }
    SensorText::try_from(text).map_err(|_| Error::InvalidData)
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::delay::MockNoop;
    use embedded_hal_mock::i2c::{Mock as I2cMock, Transaction};
    use embedded_hal_mock::MockError;
    use std::io::ErrorKind;
    use std::vec::Vec;
    use test_support::{
        i2c_measurement_response, RecordingDelay, I2C_MEASUREMENT_RESPONSE, SENSOR_ADDRESS,
    };

    fn read_measurement_transactions(response: &[u8]) -> Vec<Transaction> {
        vec![
            Transaction::write(SENSOR_ADDRESS, vec![0x03, 0x00]),
            Transaction::read(SENSOR_ADDRESS, response.to_vec()),
        ]
    }

    struct RecordingMux {
        selected: Vec<u8>,
        fail: bool,
    }

    impl ChannelSelector for RecordingMux {
        type Error = &'static str;

        fn select_channel(&mut self, channel: u8) -> Result<(), Self::Error> {
            if self.fail {
                return Err("mux gone");
            }
            self.selected.push(channel);
            Ok(())
        }

        fn channel_count(&self) -> u8 {
            8
        }
    }

    #[test]
    fn test_decode_measurement_with_marker() {
        let mut response = [0x55, 0x01, 0xf4, 0x00, 0x00, 0x64, 0x00, 0x00, 0xc8, 0x00];
        response[3] = crc8(&[0x01, 0xf4]);
        response[6] = crc8(&[0x00, 0x64]);
        response[9] = crc8(&[0x00, 0xc8]);
        let reading = decode_measurement(&response, CrcPolicy::Lenient, 7).unwrap();
        assert_eq!(reading.co2_ppm, 0x01f4_0064);
        assert_eq!(reading.temp_celsius, 2.0);
        assert!(reading.valid);
        assert_eq!(reading.timestamp_ms, 7);
    }

    #[test]
    fn test_decode_measurement_without_marker() {
        let with_marker = i2c_measurement_response(800, -125);
        let mut response = [0u8; 10];
        response[..9].copy_from_slice(&with_marker[1..]);
        let reading = decode_measurement(&response, CrcPolicy::Strict, 0).unwrap();
        assert_eq!(reading.co2_ppm, 800);
        assert_eq!(reading.temp_celsius, -1.25);
    }

    #[test]
    fn test_decode_measurement_rejects_unknown_marker() {
        let mut response = I2C_MEASUREMENT_RESPONSE;
        response[0] = 0x42;
        assert_eq!(
            decode_measurement(&response, CrcPolicy::Lenient, 0),
            Err(Error::InvalidData)
        );
    }

    #[test]
    fn test_crc_mismatch_is_tolerated_when_lenient() {
        let mut response = I2C_MEASUREMENT_RESPONSE;
        response[6] ^= 0xff;
        let reading = decode_measurement(&response, CrcPolicy::Lenient, 0).unwrap();
        assert_eq!(reading.co2_ppm, 800);
        assert!(!reading.valid);
    }

    #[test]
    fn test_crc_mismatch_is_rejected_when_strict() {
        for crc_index in [3, 6, 9] {
            let mut response = I2C_MEASUREMENT_RESPONSE;
            response[crc_index] ^= 0x01;
            assert_eq!(
                decode_measurement(&response, CrcPolicy::Strict, 0),
                Err(Error::ChecksumMismatch)
            );
        }
    }

    #[test]
    fn test_read_measurement() {
        let expectations = read_measurement_transactions(&I2C_MEASUREMENT_RESPONSE);
        let mut mock = I2cMock::new(&expectations);
        let mut i2c = I2cInterface::new(mock.clone());
        let reading = i2c
            .read_measurement(&Config::default(), &mut MockNoop::new(), 42)
            .unwrap();
        assert_eq!(reading.co2_ppm, 800);
        assert_eq!(reading.temp_celsius, 2.0);
        mock.done();
    }

    #[test]
    fn test_read_measurement_write_error() {
        let expectations = [Transaction::write(SENSOR_ADDRESS, vec![0x03, 0x00])
            .with_error(MockError::Io(ErrorKind::Other))];
        let mut mock = I2cMock::new(&expectations);
        let mut i2c = I2cInterface::new(mock.clone());
        assert_eq!(
            i2c.read_measurement(&Config::default(), &mut MockNoop::new(), 0),
            Err(Error::Communication)
        );
        mock.done();
    }

    #[test]
    fn test_read_measurement_short_read() {
        let expectations = [
            Transaction::write(SENSOR_ADDRESS, vec![0x03, 0x00]),
            Transaction::read(SENSOR_ADDRESS, I2C_MEASUREMENT_RESPONSE.to_vec())
                .with_error(MockError::Io(ErrorKind::UnexpectedEof)),
        ];
        let mut mock = I2cMock::new(&expectations);
        let mut i2c = I2cInterface::new(mock.clone());
        assert_eq!(
            i2c.read_measurement(&Config::default(), &mut MockNoop::new(), 0),
            Err(Error::NotResponding)
        );
        mock.done();
    }

    #[test]
    fn test_read_measurement_selects_mux_channel() {
        let expectations = read_measurement_transactions(&I2C_MEASUREMENT_RESPONSE);
        let mut mock = I2cMock::new(&expectations);
        let mux = RecordingMux {
            selected: vec![],
            fail: false,
        };
        let mut i2c = I2cInterface::with_mux(mock.clone(), mux, 3);
        assert!(i2c
            .read_measurement(&Config::default(), &mut MockNoop::new(), 0)
            .is_ok());
        let (_, mux) = i2c.release();
        assert_eq!(mux.unwrap().mux.selected, [3]);
        mock.done();
    }

    #[test]
    fn test_read_measurement_mux_failure() {
        let mut mock = I2cMock::new(&[]);
        let mux = RecordingMux {
            selected: vec![],
            fail: true,
        };
        let mut i2c = I2cInterface::with_mux(mock.clone(), mux, 3);
        assert_eq!(
            i2c.read_measurement(&Config::default(), &mut MockNoop::new(), 0),
            Err(Error::Communication)
        );
        mock.done();
    }

    #[test]
    fn test_read_measurement_waits_for_conversion() {
        let expectations = read_measurement_transactions(&I2C_MEASUREMENT_RESPONSE);
        let mut mock = I2cMock::new(&expectations);
        let mut i2c = I2cInterface::new(mock.clone());
        let delay = RecordingDelay::new();
        i2c.read_measurement(&Config::default(), &mut delay.clone(), 0).unwrap();
        assert_eq!(delay.delays(), [100]);
        mock.done();
    }

    #[test]
    fn test_read_measurement_settles_after_mux_selection() {
        let expectations = read_measurement_transactions(&I2C_MEASUREMENT_RESPONSE);
        let mut mock = I2cMock::new(&expectations);
        let mux = RecordingMux {
            selected: vec![],
            fail: false,
        };
        let mut i2c = I2cInterface::with_mux(mock.clone(), mux, 5);
        let delay = RecordingDelay::new();
        i2c.read_measurement(&Config::default(), &mut delay.clone(), 0).unwrap();
        assert_eq!(delay.delays(), [20, 100]);
        mock.done();
    }

    #[test]
    fn test_set_calibration_mode_reselects_channel_for_every_transaction() {
        let expectations = [
            Transaction::write(SENSOR_ADDRESS, vec![0x53, 0x06, 0x00, 0x01]),
            Transaction::write(SENSOR_ADDRESS, vec![0x53, 0x06]),
            Transaction::read(SENSOR_ADDRESS, vec![0x55, 0x00, 0x00, 0x01]),
        ];
        let mut mock = I2cMock::new(&expectations);
        let mux = RecordingMux {
            selected: vec![],
            fail: false,
        };
        let mut i2c = I2cInterface::with_mux(mock.clone(), mux, 2);
        let delay = RecordingDelay::new();
        assert_eq!(
            i2c.set_calibration_mode(&Config::default(), &mut delay.clone(), CalibrationMode::Automatic),
            Ok(())
        );
        // select, write, settle, select, write header, select, read
        assert_eq!(delay.delays(), [20, 5, 20, 20]);
        let (_, mux) = i2c.release();
        assert_eq!(mux.unwrap().mux.selected, [2, 2, 2]);
        mock.done();
    }

    #[test]
    fn test_write_then_verify_waits_before_reading_back() {
        let expectations = [
            Transaction::write(SENSOR_ADDRESS, vec![0x52, 0x02, 0x00]),
            Transaction::write(SENSOR_ADDRESS, vec![0x52, 0x02]),
            Transaction::read(SENSOR_ADDRESS, vec![0x55, 0x00, 0x00, 0x01]),
        ];
        let mut mock = I2cMock::new(&expectations);
        let mut i2c = I2cInterface::new(mock.clone());
        let delay = RecordingDelay::new();
        assert_eq!(i2c.factory_reset(&Config::default(), &mut delay.clone()), Ok(()));
        assert_eq!(delay.delays(), [5]);
        mock.done();
    }

    #[test]
    fn test_set_calibration_mode() {
        let expectations = [
            Transaction::write(SENSOR_ADDRESS, vec![0x53, 0x06, 0x00, 0x01]),
            Transaction::write(SENSOR_ADDRESS, vec![0x53, 0x06]),
            Transaction::read(SENSOR_ADDRESS, vec![0x55, 0x00, 0x00, 0x01]),
        ];
        let mut mock = I2cMock::new(&expectations);
        let mut i2c = I2cInterface::new(mock.clone());
        assert_eq!(
            i2c.set_calibration_mode(&Config::default(), &mut MockNoop::new(), CalibrationMode::Automatic),
            Ok(())
        );
        mock.done();
    }

    #[test]
    fn test_set_calibration_mode_not_confirmed() {
        let expectations = [
            Transaction::write(SENSOR_ADDRESS, vec![0x53, 0x06, 0x00, 0x00]),
            Transaction::write(SENSOR_ADDRESS, vec![0x53, 0x06]),
            Transaction::read(SENSOR_ADDRESS, vec![0x55, 0x00, 0x00, 0x01]),
        ];
        let mut mock = I2cMock::new(&expectations);
        let mut i2c = I2cInterface::new(mock.clone());
        assert_eq!(
            i2c.set_calibration_mode(&Config::default(), &mut MockNoop::new(), CalibrationMode::Manual),
            Err(Error::InvalidData)
        );
        mock.done();
    }

    #[test]
    fn test_calibration_mode() {
        let expectations = [
            Transaction::write(SENSOR_ADDRESS, vec![0x53, 0x06]),
            Transaction::read(SENSOR_ADDRESS, vec![0x55, 0x00, 0x00, 0x00]),
        ];
        let mut mock = I2cMock::new(&expectations);
        let mut i2c = I2cInterface::new(mock.clone());
        assert_eq!(
            i2c.calibration_mode(&Config::default(), &mut MockNoop::new()),
            Ok(CalibrationMode::Manual)
        );
        mock.done();
    }

    #[test]
    fn test_manual_calibration() {
        let expectations = [
            Transaction::write(SENSOR_ADDRESS, vec![0x52, 0x04, 0x01, 0xc2]),
            Transaction::write(SENSOR_ADDRESS, vec![0x52, 0x04]),
            Transaction::read(SENSOR_ADDRESS, vec![0x55, 0x01, 0xc2, 0x00]),
        ];
        let mut mock = I2cMock::new(&expectations);
        let mut i2c = I2cInterface::new(mock.clone());
        assert_eq!(
            i2c.manual_calibration(&Config::default(), &mut MockNoop::new(), 450),
            Ok(())
        );
        mock.done();
    }

    #[test]
    fn test_factory_reset_failure_flag() {
        let expectations = [
            Transaction::write(SENSOR_ADDRESS, vec![0x52, 0x02, 0x00]),
            Transaction::write(SENSOR_ADDRESS, vec![0x52, 0x02]),
            Transaction::read(SENSOR_ADDRESS, vec![0x55, 0x00, 0x00, 0x00]),
        ];
        let mut mock = I2cMock::new(&expectations);
        let mut i2c = I2cInterface::new(mock.clone());
        assert_eq!(
            i2c.factory_reset(&Config::default(), &mut MockNoop::new()),
            Err(Error::InvalidData)
        );
        mock.done();
    }

    #[test]
    fn test_software_version() {
        let mut reply = vec![0x55];
        reply.extend_from_slice(b"V1.2.3\0\0\0\0");
        let expectations = [
            Transaction::write(SENSOR_ADDRESS, vec![0xd1, 0x00]),
            Transaction::read(SENSOR_ADDRESS, reply),
        ];
        let mut mock = I2cMock::new(&expectations);
        let mut i2c = I2cInterface::new(mock.clone());
        let version = i2c
            .software_version(&Config::default(), &mut MockNoop::new())
            .unwrap();
        assert_eq!(version.as_str(), "V1.2.3");
        mock.done();
    }

    #[test]
    fn test_text_ends_at_first_nul() {
        assert_eq!(decode_text(b"V1.0\0ABCDE").unwrap().as_str(), "V1.0");
        assert_eq!(decode_text(b"ID 42  \0\0\0").unwrap().as_str(), "ID 42");
        assert_eq!(decode_text(b"ABCDEFGHIJ").unwrap().as_str(), "ABCDEFGHIJ");
    }

    #[test]
    fn test_sensor_id_rejects_binary_garbage() {
        let mut reply = vec![0x55];
        reply.extend_from_slice(&[0xff; 10]);
        let expectations = [
            Transaction::write(SENSOR_ADDRESS, vec![0xd2, 0x01]),
            Transaction::read(SENSOR_ADDRESS, reply),
        ];
        let mut mock = I2cMock::new(&expectations);
        let mut i2c = I2cInterface::new(mock.clone());
        assert_eq!(
            i2c.sensor_id(&Config::default(), &mut MockNoop::new()),
            Err(Error::InvalidData)
        );
        mock.done();
    }

    #[test]
    fn test_probe() {
        let expectations = [Transaction::write(SENSOR_ADDRESS, vec![])];
        let mut mock = I2cMock::new(&expectations);
        let mut i2c = I2cInterface::new(mock.clone());
        assert_eq!(i2c.probe(&Config::default(), &mut MockNoop::new()), Ok(()));
        mock.done();
    }
}
