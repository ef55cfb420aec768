//! Serial port transport implementation

use super::{ByteTransport, DataHandler, TransportError, TransportStats};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const READ_CHUNK: usize = 1024;

/// Serial port flow control type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Line settings applied when the port is opened.
///
/// Port name and baud rate come from [`ByteTransport::open`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Flow control
    pub flow_control: SerialFlowControl,
    /// Read timeout of the reader thread, in milliseconds
    pub read_timeout_ms: u64,
}

impl SerialConfig {
    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Set flow control
    #[must_use]
    pub fn flow_control(mut self, flow: SerialFlowControl) -> Self {
        self.flow_control = flow;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
            read_timeout_ms: 40,
        }
    }
}

type SharedPort = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

/// Consecutive read failures after which the device is considered gone
const MAX_READ_FAILURES: u32 = 50;

/// A running reader thread and the port handle it reads from
struct Reader {
    stop: Arc<AtomicBool>,
    port: SharedPort,
    thread: JoinHandle<()>,
}

/// Serial port transport with a background reader thread
pub struct SerialTransport {
    config: SerialConfig,
    port: SharedPort,
    handler: Arc<Mutex<Option<DataHandler>>>,
    reader: Mutex<Option<Reader>>,
    stats: Arc<RwLock<TransportStats>>,
}

impl SerialTransport {
    /// Create a new serial transport
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            port: Arc::new(Mutex::new(None)),
            handler: Arc::new(Mutex::new(None)),
            reader: Mutex::new(None),
            stats: Arc::new(RwLock::new(TransportStats::default())),
        }
    }

    /// Traffic counters since the last `open`
    pub fn stats(&self) -> TransportStats {
        self.stats.read().clone()
    }

    fn spawn_reader(&self, port: Box<dyn SerialPort>) -> Result<Reader, TransportError> {
        let stop = Arc::new(AtomicBool::new(false));
        let reader_port: SharedPort = Arc::new(Mutex::new(Some(port)));

        let thread = {
            let stop = stop.clone();
            let reader_port = reader_port.clone();
            let main_port = self.port.clone();
            let handler = self.handler.clone();
            let stats = self.stats.clone();

            thread::Builder::new()
                .name("serial-reader".to_string())
                .spawn(move || {
                    let mut buffer = [0u8; READ_CHUNK];
                    let mut failures = 0u32;

                    while !stop.load(Ordering::Acquire) {
                        // The slot is only locked around the read so close()
                        // can drop this handle while a handler call runs.
                        let result = match reader_port.lock().as_mut() {
                            Some(port) => port.read(&mut buffer),
                            None => break,
                        };

                        let error = match result {
                            Ok(n) if n > 0 => {
                                failures = 0;
                                {
                                    let mut stats = stats.write();
                                    stats.bytes_received += n as u64;
                                    stats.packets_received += 1;
                                }
                                if stop.load(Ordering::Acquire) {
                                    break;
                                }
                                let current = handler.lock().clone();
                                if let Some(callback) = current {
                                    callback(&buffer[..n]);
                                }
                                continue;
                            }
                            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                            Ok(_) => std::io::Error::from(std::io::ErrorKind::UnexpectedEof),
                            Err(e) => e,
                        };

                        if stop.load(Ordering::Acquire) {
                            break;
                        }
                        failures += 1;
                        if failures == 1 {
                            tracing::warn!("Serial read failed: {}", error);
                        } else {
                            tracing::debug!("Serial read failed ({} in a row): {}", failures, error);
                        }
                        if failures >= MAX_READ_FAILURES {
                            tracing::warn!("Serial device lost after {} read errors", failures);
                            let mut main = main_port.lock();
                            if !stop.load(Ordering::Acquire) {
                                main.take();
                            }
                            break;
                        }
                        thread::sleep(Duration::from_millis(20));
                    }

                    reader_port.lock().take();
                    tracing::debug!("Serial reader stopped");
                })
                .map_err(TransportError::IoError)?
        };

        Ok(Reader {
            stop,
            port: reader_port,
            thread,
        })
    }
}

fn open_error(address: &str, error: &serialport::Error) -> TransportError {
    let missing = match error.kind() {
        serialport::ErrorKind::NoDevice | serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
            !cfg!(unix) || !Path::new(address).exists()
        }
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            return TransportError::PermissionDenied(address.to_string());
        }
        _ => false,
    };

    if missing {
        TransportError::PortNotFound(address.to_string())
    } else {
        TransportError::ConnectionFailed(format!("{}: {}", address, error))
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new(SerialConfig::default())
    }
}

impl ByteTransport for SerialTransport {
    fn open(&self, address: &str, speed: u32) -> Result<(), TransportError> {
        self.close();

        let data_bits = match self.config.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let stop_bits = match self.config.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let parity = match self.config.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let flow_control = match self.config.flow_control {
            SerialFlowControl::Hardware => FlowControl::Hardware,
            SerialFlowControl::Software => FlowControl::Software,
            SerialFlowControl::None => FlowControl::None,
        };

        let mut port = serialport::new(address, speed)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(flow_control)
            .timeout(Duration::from_millis(self.config.read_timeout_ms))
            .open()
            .map_err(|e| open_error(address, &e))?;

        // Most modems ignore commands until DTR is asserted.
        if let Err(e) = port.write_data_terminal_ready(true) {
            tracing::debug!("Could not assert DTR on {}: {}", address, e);
        }
        if let Err(e) = port.write_request_to_send(true) {
            tracing::debug!("Could not assert RTS on {}: {}", address, e);
        }
        if let Err(e) = port.clear(ClearBuffer::All) {
            tracing::debug!("Could not purge buffers on {}: {}", address, e);
        }

        let reader_port = port
            .try_clone()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        *self.stats.write() = TransportStats::default();
        *self.port.lock() = Some(port);
        match self.spawn_reader(reader_port) {
            Ok(reader) => *self.reader.lock() = Some(reader),
            Err(e) => {
                self.port.lock().take();
                return Err(e);
            }
        }
        tracing::info!("Opened {} @ {} baud", address, speed);
        Ok(())
    }

    fn close(&self) {
        let reader = self.reader.lock().take();
        if let Some(reader) = &reader {
            reader.stop.store(true, Ordering::Release);
            // Waits out a read in progress; the device is fully released once
            // both handles are gone.
            reader.port.lock().take();
        }
        let port = self.port.lock().take();

        if let Some(reader) = reader {
            // Closing from inside a data handler runs on the reader itself.
            // That thread exits once the handler returns.
            if reader.thread.thread().id() == thread::current().id() {
                tracing::debug!("close() called from reader thread, not joining");
            } else if reader.thread.join().is_err() {
                tracing::warn!("Serial reader thread panicked");
            }
        }

        if port.is_some() {
            tracing::info!("Serial port closed");
        }
    }

    fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        if data.is_empty() {
            return Ok(());
        }

        let mut port_guard = self.port.lock();
        let port = port_guard.as_mut().ok_or(TransportError::NotConnected)?;

        port.write_all(data).map_err(TransportError::IoError)?;
        port.flush().map_err(TransportError::IoError)?;

        let mut stats = self.stats.write();
        stats.bytes_sent += data.len() as u64;
        stats.packets_sent += 1;

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.lock().is_some()
    }

    fn set_data_handler(&self, handler: Option<DataHandler>) {
        *self.handler.lock() = handler;
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))
}
