//! I2C multiplexer channel selection and connection diagnostics.

use core::convert::Infallible;
use core::fmt::Debug;
use embedded_hal::blocking::i2c::Write;

/// Default address of a TCA9548 style multiplexer.
pub const DEFAULT_MUX_ADDRESS: u8 = 0x70;

/// Something that gates which downstream I2C segment is connected.
///
/// The driver selects its channel before every transaction and never assumes
/// that the selection is still in place from a previous call.
pub trait ChannelSelector {
    type Error: Debug;

    fn select_channel(&mut self, channel: u8) -> Result<(), Self::Error>;

    fn channel_count(&self) -> u8;
}

/// Placeholder for a sensor wired directly to the bus.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoMux;

impl ChannelSelector for NoMux {
    type Error = Infallible;

    fn select_channel(&mut self, _channel: u8) -> Result<(), Self::Error> {
        Ok(())
    }

    fn channel_count(&self) -> u8 {
        0
    }
}

/// Multiplexer together with the channel the sensor sits on.
#[derive(Debug)]
pub struct MuxChannel<M> {
    pub mux: M,
    pub channel: u8,
}

/// Hook run when the sensor does not acknowledge its address.
///
/// Only used on the connection check, never on the read path.
pub trait Diagnostics<I2C, M> {
    fn connection_failed(&mut self, i2c: &mut I2C, mux: Option<&mut MuxChannel<M>>, address: u8);
}

/// Diagnostics that do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDiagnostics;

impl<I2C, M> Diagnostics<I2C, M> for NoDiagnostics {
    fn connection_failed(&mut self, _i2c: &mut I2C, _mux: Option<&mut MuxChannel<M>>, _address: u8) {}
}

/// Diagnostics that probe the bus and log what they find.
///
/// Checks whether the multiplexer answers, scans all 7 bit addresses, and
/// walks the multiplexer channels looking for the sensor.
#[derive(Clone, Copy, Debug)]
pub struct BusScan {
    pub mux_address: u8,
}

impl Default for BusScan {
    fn default() -> Self {
        Self {
            mux_address: DEFAULT_MUX_ADDRESS,
        }
    }
}

impl BusScan {
    fn probe<I2C: Write>(i2c: &mut I2C, address: u8) -> bool {
        i2c.write(address, &[]).is_ok()
    }

    /// Number of devices acknowledging an address in 1..127.
    pub fn scan<I2C: Write>(&self, i2c: &mut I2C) -> usize {
        let mut found = 0;
        for address in 1..127u8 {
            if Self::probe(i2c, address) {
                log::info!("I2C device found at 0x{:02x}", address);
                found += 1;
            }
        }
        if found == 0 {
            log::info!("no I2C devices found");
        }
        found
    }

    /// First multiplexer channel on which `address` acknowledges.
    pub fn find_channel<I2C, M>(&self, i2c: &mut I2C, mux: &mut M, address: u8) -> Option<u8>
    where
        I2C: Write,
        M: ChannelSelector,
    {
        for channel in 0..mux.channel_count() {
            match mux.select_channel(channel) {
                Ok(()) if Self::probe(i2c, address) => {
                    log::info!("device 0x{:02x} answers on channel {}", address, channel);
                    return Some(channel);
                }
                Ok(()) => log::info!("channel {}: no answer from 0x{:02x}", channel, address),
                Err(err) => log::info!("channel {}: selection failed: {:?}", channel, err),
            }
        }
        None
    }
}

impl<I2C, M> Diagnostics<I2C, M> for BusScan
where
    I2C: Write,
    M: ChannelSelector,
{
    fn connection_failed(&mut self, i2c: &mut I2C, mux: Option<&mut MuxChannel<M>>, address: u8) {
        log::info!("sensor at 0x{:02x} did not answer, running bus diagnostics", address);
        if let Some(mux) = mux {
            if !Self::probe(i2c, self.mux_address) {
                log::info!("multiplexer at 0x{:02x} does not answer", self.mux_address);
                return;
            }
            if mux.mux.select_channel(mux.channel).is_ok() && Self::probe(i2c, address) {
                log::info!("sensor answers after reselecting channel {}", mux.channel);
            }
            self.scan(i2c);
            self.find_channel(i2c, &mut mux.mux, address);
        } else {
            self.scan(i2c);
        }
    }
}
