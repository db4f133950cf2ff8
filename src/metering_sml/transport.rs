use std::io::{self, Read};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// An open serial link delivering raw SML bytes. Closing is dropping.
pub trait LinkPort: Send {
    /// Bytes ready to be read without blocking.
    fn bytes_to_read(&mut self) -> Result<u32, LinkError>;

    /// Read whatever is available, up to `buf.len()` bytes. Returns 0 when
    /// nothing arrived within the port's read timeout.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, LinkError>;
}

/// Opens links. This is the seam that lets tests script connection
/// failures and canned byte streams.
pub trait PortOpener: Send {
    fn open(
        &mut self,
        path: &str,
        baud: u32,
        timeout: Duration,
    ) -> Result<Box<dyn LinkPort>, LinkError>;
}

/// Production opener on top of the serialport crate.
pub struct SerialOpener;

impl PortOpener for SerialOpener {
    fn open(
        &mut self,
        path: &str,
        baud: u32,
        timeout: Duration,
    ) -> Result<Box<dyn LinkPort>, LinkError> {
        let port = serialport::new(path, baud)
            .timeout(timeout)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .open()?;
        Ok(Box::new(SerialLink { port }))
    }
}

struct SerialLink {
    port: Box<dyn serialport::SerialPort>,
}

impl LinkPort for SerialLink {
    fn bytes_to_read(&mut self) -> Result<u32, LinkError> {
        Ok(self.port.bytes_to_read()?)
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(LinkError::Io(e)),
        }
    }
}
