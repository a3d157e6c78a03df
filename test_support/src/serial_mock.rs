use embedded_hal::serial::{Read, Write};
use std::collections::VecDeque;
use std::string::String;
use std::vec::Vec;

/// Serial port double.
///
/// Bytes in `read_return_values` are available right away. Bytes queued with
/// [`SerialMock::respond_on_flush`] only become available once the driver
/// flushes its output, like a sensor answering a completed command.
#[derive(Debug)]
pub struct SerialMock {
    read_return_values: VecDeque<nb::Result<u8, String>>,
    write_return_values: VecDeque<nb::Result<(), String>>,
    response: Vec<u8>,
    pub write_buf: Vec<u8>,
    pub flushed_up_to: usize,
    pub flush_count: usize,
}

impl SerialMock {
    /// Writes without a queued return value succeed.
    pub fn new(
        read_return_values: Vec<nb::Result<u8, String>>,
        write_return_values: Vec<nb::Result<(), String>>,
    ) -> Self {
        Self {
            read_return_values: VecDeque::from(read_return_values),
            write_return_values: VecDeque::from(write_return_values),
            response: vec![],
            write_buf: vec![],
            flushed_up_to: 0,
            flush_count: 0,
        }
    }

    /// Serial port with `stale` bytes waiting in the receive buffer that
    /// answers the next flushed command with `response`.
    pub fn responding_with(stale: &[u8], response: &[u8]) -> Self {
        let mut mock = Self::new(stale.iter().copied().map(Ok).collect(), vec![]);
        mock.respond_on_flush(response);
        mock
    }

    pub fn respond_on_flush(&mut self, response: &[u8]) {
        self.response = response.to_vec();
    }

    /// Number of bytes still waiting to be read.
    pub fn pending(&self) -> usize {
        self.read_return_values.len()
    }
}

impl Read<u8> for SerialMock {
    type Error = String;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        self.read_return_values
            .pop_front()
            .unwrap_or(Err(nb::Error::WouldBlock))
    }
}

impl Write<u8> for SerialMock {
    type Error = String;

    fn write(&mut self, c: u8) -> nb::Result<(), Self::Error> {
        let return_value = self.write_return_values.pop_front().unwrap_or(Ok(()));
        if return_value.is_ok() {
            self.write_buf.push(c);
        }
        return_value
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        self.flushed_up_to = self.write_buf.len();
        self.flush_count += 1;
        self.read_return_values
            .extend(self.response.drain(..).map(Ok));
        Ok(())
    }
}
