//! Checksums used by the two wire protocols.

use crc_any::CRCu8;

/// CRC-8 protecting each two byte field of an I2C response.
///
/// Polynomial 0x31, initial value 0xFF, MSB first, no reflection and no final
/// XOR. An empty input yields the initial value.
pub fn crc8(bytes: &[u8]) -> u8 {
    let mut crc = CRCu8::create_crc(0x31, 8, 0xff, 0x00, false);
    crc.digest(bytes);
    crc.get_crc()
}

/// Truncating 8 bit sum used by the UART frames.
pub fn sum8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0x00, |acc: u8, &x: &u8| acc.wrapping_add(x))
}
