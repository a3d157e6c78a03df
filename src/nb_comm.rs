//! Blocking helpers on top of the non-blocking serial traits.
//!
//! `nb::Error::WouldBlock` from a read means that no byte is available right
//! now; the helpers use that to drain or collect whatever the receive buffer
//! holds without waiting for more.

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

/// Discard all bytes currently waiting in the receive buffer.
///
/// Returns the number of discarded bytes.
pub fn drain<R, E>(uart: &mut R) -> Result<usize, E>
where
    R: Read<u8, Error = E>,
{
    let mut discarded = 0;
    loop {
        match uart.read() {
            Ok(_) => discarded += 1,
            Err(nb::Error::WouldBlock) => return Ok(discarded),
            Err(nb::Error::Other(err)) => return Err(err),
        }
    }
}

/// Write all bytes in `buf`, pausing `pacing_ms` after each byte, and flush
/// the output afterwards.
pub fn write_paced<W, E, D>(uart: &mut W, buf: &[u8], delay: &mut D, pacing_ms: u32) -> Result<(), E>
where
    W: Write<u8, Error = E>,
    D: DelayMs<u32>,
{
    for &c in buf {
        nb::block!(uart.write(c))?;
        if pacing_ms > 0 {
            delay.delay_ms(pacing_ms);
        }
    }
    nb::block!(uart.flush())
}

/// Read the bytes that are already available, at most `buf.len()` of them.
///
/// Returns the number of bytes read.
pub fn read_available<R, E>(uart: &mut R, buf: &mut [u8]) -> Result<usize, E>
where
    R: Read<u8, Error = E>,
{
    let mut bytes_read = 0;
    while bytes_read < buf.len() {
        match uart.read() {
            Ok(c) => {
                buf[bytes_read] = c;
                bytes_read += 1;
            }
            Err(nb::Error::WouldBlock) => break,
            Err(nb::Error::Other(err)) => return Err(err),
        }
    }
    Ok(bytes_read)
}

/// Like [`read_available`], but skip bytes until `start_byte` shows up so the
/// result starts on a frame boundary.
pub fn read_available_from<R, E>(uart: &mut R, start_byte: u8, buf: &mut [u8]) -> Result<usize, E>
where
    R: Read<u8, Error = E>,
{
    let mut bytes_read = 0;
    while bytes_read < buf.len() {
        match uart.read() {
            Ok(c) if bytes_read == 0 && c != start_byte => {
                log::trace!("skipping 0x{:02x} while waiting for frame start", c);
            }
            Ok(c) => {
                buf[bytes_read] = c;
                bytes_read += 1;
            }
            Err(nb::Error::WouldBlock) => break,
            Err(nb::Error::Other(err)) => return Err(err),
        }
    }
    Ok(bytes_read)
}
