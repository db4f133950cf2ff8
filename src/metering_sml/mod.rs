use crate::config::CONFIG;
use crate::store::MeterStore;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;

pub mod mapper;
pub mod parser;
pub mod structs;
pub mod transport;
pub mod utils;

#[cfg(test)]
pub(crate) mod testutil;

use mapper::MeasurementMapper;
use parser::parse_frame;
use transport::{LinkError, LinkPort, PortOpener, SerialOpener};

#[derive(Error, Debug)]
pub enum SmlError {
    #[error("SML parse error: {0}")]
    ParseError(String),
}

// Pause between drain polls while bytes keep arriving.
const DRAIN_PAUSE: Duration = Duration::from_millis(100);
// Pause between poll cycles; reconnects have no extra backoff beyond the
// serial read timeout.
const POLL_PAUSE: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 512;
// A telegram is a few hundred bytes; a buffer this size means the line is
// feeding bytes that will never frame.
const MAX_BUFFER: usize = 16 * 1024;

/// Reads SML telegrams from the serial port and feeds decoded messages
/// into the measurement store.
///
/// Lifecycle: Connecting -> Streaming -> (on any link error) back to
/// Connecting, for as long as the run flag is set. Clearing the flag is
/// the only way out; it is checked at loop boundaries, so a blocked read
/// finishes its timeout first.
pub struct SmlManager {
    device: String,
    baud: u32,
    read_timeout: Duration,
    running: Arc<AtomicBool>,
    store: Arc<MeterStore>,
    mapper: MeasurementMapper,
    opener: Box<dyn PortOpener>,
    buf: Vec<u8>,
}

impl SmlManager {
    pub fn new(device: String, running: Arc<AtomicBool>, store: Arc<MeterStore>) -> Self {
        let serial = CONFIG.read().unwrap().serial.clone();
        Self::with_opener(
            device,
            serial.baud,
            Duration::from_millis(serial.read_timeout_ms),
            running,
            store,
            Box::new(SerialOpener),
        )
    }

    pub fn with_opener(
        device: String,
        baud: u32,
        read_timeout: Duration,
        running: Arc<AtomicBool>,
        store: Arc<MeterStore>,
        opener: Box<dyn PortOpener>,
    ) -> Self {
        SmlManager {
            device,
            baud,
            read_timeout,
            running,
            store,
            mapper: MeasurementMapper::new(),
            opener,
            buf: Vec::new(),
        }
    }

    pub fn run(&mut self) {
        info!("Starting SML reader on {}", self.device);

        while self.running.load(Ordering::SeqCst) {
            info!("sml serial reconnect {}", self.device);
            match self.opener.open(&self.device, self.baud, self.read_timeout) {
                Ok(port) => {
                    if let Err(e) = self.stream(port) {
                        warn!("sml stream aborted: {}", e);
                    }
                }
                Err(e) => {
                    warn!("sml serial open failed: {}", e);
                }
            }
            // a partial frame from the dead connection is worthless
            self.buf.clear();
        }

        info!("SML reader stopped");
    }

    /// One connection's worth of streaming. Any link error propagates to
    /// `run`, which reconnects; decode problems are handled inside the
    /// frame parser and never abort the stream.
    fn stream(&mut self, mut port: Box<dyn LinkPort>) -> Result<(), LinkError> {
        let mut chunk = [0u8; READ_CHUNK];

        while self.running.load(Ordering::SeqCst) {
            // receive data
            while port.bytes_to_read()? > 0 {
                let n = port.read_chunk(&mut chunk)?;
                if n == 0 {
                    break;
                }
                self.buf.extend_from_slice(&chunk[..n]);
                thread::sleep(DRAIN_PAUSE);
            }

            if self.buf.len() > MAX_BUFFER {
                warn!(
                    "Discarding {} unframeable bytes from {}",
                    self.buf.len(),
                    self.device
                );
                self.buf.clear();
            }

            // process data
            loop {
                let (consumed, messages) = parse_frame(&self.buf);
                self.buf.drain(..consumed);
                if consumed == 0 && messages.is_empty() {
                    break;
                }

                let mapper = &mut self.mapper;
                for message in &messages {
                    debug!("sml serial message received");
                    self.store.apply(|data| mapper.map_message(message, data));
                }
            }

            thread::sleep(POLL_PAUSE);
        }

        Ok(())
    }
}
