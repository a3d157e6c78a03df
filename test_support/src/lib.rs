//! Shared test doubles and frame fixtures for the ACD1100 driver tests.

pub mod serial_mock;

use crc_any::CRCu8;
use embedded_hal::blocking::delay::DelayMs;
use serial_mock::SerialMock;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::vec::Vec;

/// I2C address of the sensor.
pub const SENSOR_ADDRESS: u8 = 0x2a;

/// UART command frame requesting a measurement.
pub const READ_MEASUREMENT_COMMAND: [u8; 5] = [0xfe, 0xa6, 0x00, 0x01, 0xa7];

/// UART measurement response: 800ppm, 2.00°C.
pub const READ_MEASUREMENT_RESPONSE: [u8; 10] =
    [0xfe, 0xa6, 0x04, 0x01, 0x03, 0x20, 0x00, 0xc8, 0x00, 0x94];

/// I2C measurement response with address marker: 800ppm, 2.00°C.
pub const I2C_MEASUREMENT_RESPONSE: [u8; 10] =
    [0x55, 0x00, 0x00, 0x81, 0x03, 0x20, 0x2a, 0x00, 0xc8, 0x7f];

pub fn crc8(bytes: &[u8]) -> u8 {
    let mut crc = CRCu8::create_crc(0x31, 8, 0xff, 0x00, false);
    crc.digest(bytes);
    crc.get_crc()
}

/// Build an I2C measurement response including the 0x55 address marker.
pub fn i2c_measurement_response(co2_ppm: u32, temp_centi_celsius: i16) -> [u8; 10] {
    let co2 = co2_ppm.to_be_bytes();
    let temp = temp_centi_celsius.to_be_bytes();
    [
        0x55,
        co2[0],
        co2[1],
        crc8(&co2[0..2]),
        co2[2],
        co2[3],
        crc8(&co2[2..4]),
        temp[0],
        temp[1],
        crc8(&temp),
    ]
}

/// Build a UART measurement response with a valid checksum.
pub fn uart_measurement_response(co2_ppm: u16, temp_centi_celsius: i16) -> [u8; 10] {
    let co2 = co2_ppm.to_be_bytes();
    let temp = temp_centi_celsius.to_be_bytes();
    let mut response = [
        0xfe, 0xa6, 0x04, 0x01, co2[0], co2[1], temp[0], temp[1], 0x00, 0x00,
    ];
    response[9] = response[..9]
        .iter()
        .fold(0u8, |acc, &x| acc.wrapping_add(x));
    response
}

pub fn create_serial_mock_returning(response: &[u8]) -> SerialMock {
    SerialMock::responding_with(&[], response)
}

/// Millisecond clock that only moves when told to.
#[derive(Clone, Debug, Default)]
pub struct ManualClock(Rc<Cell<u64>>);

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self(Rc::new(Cell::new(start_ms)))
    }

    pub fn now(&self) -> u64 {
        self.0.get()
    }

    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }

    /// Closure reading this clock, usable wherever a `FnMut() -> u64` time
    /// source is accepted.
    pub fn source(&self) -> impl FnMut() -> u64 {
        let clock = self.clone();
        move || clock.now()
    }
}

/// Delay provider that returns immediately and remembers every requested
/// delay. Clones share the record.
#[derive(Clone, Debug, Default)]
pub struct RecordingDelay(Rc<RefCell<Vec<u32>>>);

impl RecordingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requested delays in milliseconds, in call order.
    pub fn delays(&self) -> Vec<u32> {
        self.0.borrow().clone()
    }
}

impl DelayMs<u32> for RecordingDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.0.borrow_mut().push(ms);
    }
}
