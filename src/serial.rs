//! Serial line source.
//!
//! The board prints one reading per line, `\r\n` terminated, at a fixed baud
//! rate. `SerialLines` turns any buffered reader into an iterator of lines:
//!
//! - read timeouts are not errors; a partially received line is kept and
//!   completed by the next read
//! - bytes that are not UTF-8 are replaced rather than rejected (the digit
//!   extractor only cares about ASCII digits anyway)
//! - a run of more than `MAX_LINE_BYTES` without a line break (wrong baud
//!   rate, floating pin) is discarded as noise instead of buffered forever
//! - other I/O errors are yielded to the caller, which logs them and keeps
//!   reading after a short pause
//!
//! There is no reconnect: if the device disappears the iterator keeps
//! reporting errors until the process is restarted.

use crate::config::SerialConfig;
use std::io::{self, BufRead, BufReader, Read};
use std::time::Duration;

/// Pause after a hard read error so an unplugged device does not spin the CPU.
const ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Longest line kept in the buffer. Real readings are a handful of bytes.
const MAX_LINE_BYTES: usize = 4096;

pub struct SerialLines<R> {
    reader: R,
    pending: Vec<u8>,
    error_pause: Duration,
    failed_last: bool,
}

impl<R: BufRead> SerialLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: Vec::new(),
            error_pause: ERROR_PAUSE,
            failed_last: false,
        }
    }

    /// Overrides the pause after a hard error.
    pub fn with_error_pause(mut self, pause: Duration) -> Self {
        self.error_pause = pause;
        self
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}

impl<R: BufRead> Iterator for SerialLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed_last {
            self.failed_last = false;
            std::thread::sleep(self.error_pause);
        }

        loop {
            // `pending` stays below the cap, so the limit is never zero and
            // `Ok(0)` below always means end of stream.
            let limit = (MAX_LINE_BYTES - self.pending.len()) as u64;
            match (&mut self.reader).take(limit).read_until(b'\n', &mut self.pending) {
                Ok(0) => {
                    // End of stream: flush an unterminated last line, if any.
                    if self.pending.is_empty() {
                        return None;
                    }
                    return Some(Ok(self.take_line()));
                }
                Ok(_) => {
                    if self.pending.last() == Some(&b'\n') {
                        return Some(Ok(self.take_line()));
                    }
                    if self.pending.len() >= MAX_LINE_BYTES {
                        log::warn!(
                            "discarding {} bytes received without a line break",
                            self.pending.len()
                        );
                        self.pending.clear();
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.failed_last = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Opens the configured serial port.
pub fn open_serial(
    config: &SerialConfig,
) -> Result<SerialLines<BufReader<Box<dyn serialport::SerialPort>>>, serialport::Error> {
    let port = serialport::new(config.path.as_str(), config.baud_rate)
        .timeout(Duration::from_millis(config.read_timeout_ms))
        .open()?;

    log::info!("opened serial port {} at {} baud", config.path, config.baud_rate);
    Ok(SerialLines::new(BufReader::new(port)))
}
