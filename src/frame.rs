//! UART frames.
//!
//! Commands are framed as `FE A6 <len> <cmd> [payload...] <checksum>` where
//! `<len>` counts the payload bytes and the checksum is the 8 bit sum of all
//! bytes after the start byte. Measurement responses are 10 bytes long and
//! their checksum covers the start byte as well.

use crate::checksum::sum8;
use crate::command::UartCommand;
use core::fmt::{self, Display, Formatter};

pub const START_BYTE: u8 = 0xfe;
const FIXED_CODE: u8 = 0xa6;
const HEADER_LEN: usize = 4;

/// Maximum number of payload bytes a command frame can carry.
pub const MAX_PAYLOAD_LEN: usize = 16;
/// Length of the response to [`UartCommand::ReadMeasurement`].
pub const MEASUREMENT_FRAME_LEN: usize = 10;
/// Smallest response accepted by [`validate_response`].
pub const MIN_RESPONSE_LEN: usize = 4;

/// A framed UART command ready to be transmitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandFrame {
    buf: [u8; HEADER_LEN + MAX_PAYLOAD_LEN + 1],
    len: usize,
}

impl CommandFrame {
    /// Frame the command `op_code` with its `payload`.
    ///
    /// The length byte counts the payload only, matching the sensor's fixed
    /// measurement request `FE A6 00 01 A7`. Some host libraries count the
    /// op code as well and send `payload.len() + 1`; frames built here differ
    /// from theirs for every command that carries a payload.
    pub fn new(op_code: u8, payload: &[u8]) -> Result<Self, Error> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLong(payload.len()));
        }
        let mut buf = [0u8; HEADER_LEN + MAX_PAYLOAD_LEN + 1];
        buf[..HEADER_LEN].copy_from_slice(&[START_BYTE, FIXED_CODE, payload.len() as u8, op_code]);
        let end = HEADER_LEN + payload.len();
        buf[HEADER_LEN..end].copy_from_slice(payload);
        buf[end] = sum8(&buf[1..end]);
        Ok(Self { buf, len: end + 1 })
    }

    pub fn op_code(&self) -> u8 {
        self.buf[3]
    }
}

impl From<UartCommand> for CommandFrame {
    fn from(command: UartCommand) -> Self {
        let mut buf = [0u8; HEADER_LEN + MAX_PAYLOAD_LEN + 1];
        buf[..HEADER_LEN].copy_from_slice(&[START_BYTE, FIXED_CODE, 0x00, command.op_code()]);
        buf[HEADER_LEN] = sum8(&buf[1..HEADER_LEN]);
        Self {
            buf,
            len: HEADER_LEN + 1,
        }
    }
}

impl AsRef<[u8]> for CommandFrame {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// Response to [`UartCommand::ReadMeasurement`].
///
/// Layout: `FE A6 04 01 <CO2hi> <CO2lo> <Temphi> <Templo> <reserved> <checksum>`.
pub struct MeasurementFrame([u8; MEASUREMENT_FRAME_LEN]);

impl MeasurementFrame {
    pub fn new(data: [u8; MEASUREMENT_FRAME_LEN]) -> Self {
        Self(data)
    }

    pub fn into_inner(self) -> [u8; MEASUREMENT_FRAME_LEN] {
        self.0
    }

    fn start_byte(&self) -> u8 {
        self.0[0]
    }

    pub fn has_valid_start_byte(&self) -> bool {
        self.start_byte() == START_BYTE
    }

    fn checksum(&self) -> u8 {
        self.0[MEASUREMENT_FRAME_LEN - 1]
    }

    pub fn has_valid_checksum(&self) -> bool {
        sum8(&self.0[..MEASUREMENT_FRAME_LEN - 1]) == self.checksum()
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !self.has_valid_start_byte() {
            Err(Error::InvalidStartByte(self.start_byte()))
        } else if !self.has_valid_checksum() {
            Err(Error::InvalidChecksum)
        } else {
            Ok(())
        }
    }

    pub fn co2_ppm(&self) -> u32 {
        u32::from(u16::from_be_bytes([self.0[4], self.0[5]]))
    }

    pub fn temp_celsius(&self) -> f32 {
        f32::from(i16::from_be_bytes([self.0[6], self.0[7]])) / 100.0
    }
}

/// Check the trailing checksum of a response collected by a resynchronising
/// read. The sum covers everything between the start byte and the checksum.
pub fn validate_response(response: &[u8]) -> Result<(), Error> {
    if response.len() < MIN_RESPONSE_LEN {
        return Err(Error::TooShort(response.len()));
    }
    if response[0] != START_BYTE {
        return Err(Error::InvalidStartByte(response[0]));
    }
    let (body, checksum) = response.split_at(response.len() - 1);
    if sum8(&body[1..]) == checksum[0] {
        Ok(())
    } else {
        Err(Error::InvalidChecksum)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    InvalidStartByte(u8),
    InvalidChecksum,
    TooShort(usize),
    PayloadTooLong(usize),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        use Error::*;
        match self {
            InvalidStartByte(got) => write!(f, "Expected start byte 0xfe, but got 0x{:x}.", got),
            InvalidChecksum => write!(f, "Invalid checksum."),
            TooShort(len) => write!(f, "Frame of {} bytes is too short.", len),
            PayloadTooLong(len) => write!(
                f,
                "Payload of {} bytes exceeds the maximum of {} bytes.",
                len, MAX_PAYLOAD_LEN
            ),
        }
    }
}
