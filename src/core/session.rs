//! AT-command session over a byte-stream transport
//!
//! The session owns the transport and all protocol state. Incoming chunks
//! arrive on the transport's reader thread and pass through the line framer,
//! the echo suppressor and the URC classifier. Commands go out from the
//! caller's thread. One short-held lock guards the protocol state; user
//! callbacks are copied out under their own lock and invoked outside it, so a
//! callback may call back into the session.

use super::echo::EchoSuppressor;
use super::framing::LineFramer;
use super::sequencer::{self, Pacer, SendPlan, Step, StepAction, StepSink, ThreadPacer};
use super::sms::{SmsMessage, SmsProfile};
use super::transport::{ByteTransport, DataHandler, SerialTransport, TransportError};
use super::urc::{Classified, UrcClassifier};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Session error types
#[derive(Error, Debug)]
pub enum SessionError {
    /// The transport is not open
    #[error("Not connected")]
    NotConnected,

    /// Command text is empty after trimming
    #[error("Empty command")]
    EmptyCommand,

    /// SMS body is empty after trimming
    #[error("Empty SMS body")]
    EmptyBody,

    /// No SMS destination number configured
    #[error("No SMS destination configured")]
    NoDestination,

    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Events reported to the log callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Transport opened and bootstrap started
    Connected {
        /// Port address
        port: String,
        /// Line speed
        baud_rate: u32,
    },
    /// Transport closed
    Disconnected,
    /// A command line was written
    CommandSent {
        /// Trimmed command text
        command: String,
    },
    /// A line that is neither an echo nor a notification
    LineReceived {
        /// Line as received, without the delimiter
        line: String,
    },
    /// Header and body of an incoming SMS
    SmsReceived(SmsMessage),
    /// SMS text and terminator were written
    SmsSent {
        /// Trimmed message text
        body: String,
    },
    /// The modem stored a new message; it is being read back
    MessageStored {
        /// Storage index
        index: String,
    },
    /// Reading back a stored message could not be requested
    AutoReadFailed {
        /// Storage index
        index: String,
    },
    /// A `+CMTI:` line without an index
    MalformedNotification {
        /// Offending line
        line: String,
    },
    /// A post-connect command could not be sent
    BootstrapFailed {
        /// Command text
        command: String,
    },
    /// SMS send attempted without a destination number
    NoDestination,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected { port, baud_rate } => write!(f, "Connected to {} @ {} baud", port, baud_rate),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::CommandSent { command } => write!(f, "--> {}", command),
            Self::LineReceived { line } => write!(f, "<-- {}", line.trim()),
            Self::SmsReceived(sms) => write!(f, "SMS received: {}", sms.body),
            Self::SmsSent { body } => write!(f, "SMS sent: {}", body),
            Self::MessageStored { index } => write!(f, "New message stored, reading index {}", index),
            Self::AutoReadFailed { index } => write!(f, "Failed to read stored message {}", index),
            Self::MalformedNotification { line } => write!(f, "Malformed notification: {}", line),
            Self::BootstrapFailed { command } => write!(f, "Init command failed: {}", command),
            Self::NoDestination => write!(f, "No SMS destination configured"),
        }
    }
}

/// Receives every [`SessionEvent`]
pub type LogCallback = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Receives `(header, body)` of each incoming SMS
pub type SmsCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    log: Option<LogCallback>,
    sms: Option<SmsCallback>,
}

#[derive(Debug, Default)]
struct LinkState {
    framer: LineFramer,
    echo: EchoSuppressor,
    urc: UrcClassifier,
}

impl LinkState {
    fn reset(&mut self) {
        self.framer.clear();
        self.echo.clear();
        self.urc.reset();
    }
}

struct Inner<T> {
    transport: T,
    link: Mutex<LinkState>,
    callbacks: Mutex<Callbacks>,
    profile: RwLock<SmsProfile>,
    pacer: Box<dyn Pacer>,
    /// Bumped on every connect and disconnect; data from older links is dropped
    generation: AtomicU64,
}

impl<T: ByteTransport> Inner<T> {
    fn emit(&self, event: SessionEvent) {
        tracing::debug!("{}", event);
        let callback = self.callbacks.lock().log.clone();
        if let Some(callback) = callback {
            callback(&event);
        }
    }

    fn deliver_sms(&self, sms: SmsMessage) {
        tracing::info!("SMS received: {}", sms.header);
        let callback = self.callbacks.lock().sms.clone();
        if let Some(callback) = callback {
            callback(&sms.header, &sms.body);
        }
        self.emit(SessionEvent::SmsReceived(sms));
    }

    fn send_command(&self, text: &str) -> Result<(), SessionError> {
        if !self.transport.is_open() {
            return Err(SessionError::NotConnected);
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(SessionError::EmptyCommand);
        }

        let mut line = String::with_capacity(trimmed.len() + 1);
        line.push_str(trimmed);
        if !line.ends_with('\r') {
            line.push('\r');
        }

        {
            // Held across the write so the echo cannot overtake its registration.
            let mut link = self.link.lock();
            self.transport.write(line.as_bytes())?;
            link.echo.command_sent(trimmed);
        }

        self.emit(SessionEvent::CommandSent {
            command: trimmed.to_string(),
        });
        Ok(())
    }

    fn write_payload(&self, data: &[u8]) -> Result<(), SessionError> {
        if !self.transport.is_open() {
            return Err(SessionError::NotConnected);
        }
        self.transport.write(data)?;
        Ok(())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn handle_incoming(&self, generation: u64, chunk: &[u8]) {
        let lines: Vec<String> = {
            let mut link = self.link.lock();
            if !self.is_current(generation) {
                return;
            }
            link.framer.feed(chunk).collect()
        };
        for line in lines {
            // A callback may have reconnected; the rest belongs to the old link.
            if !self.is_current(generation) {
                break;
            }
            self.process_line(&line);
        }
    }

    fn process_line(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }

        let classified = {
            let mut link = self.link.lock();
            if link.echo.is_echo(line) {
                tracing::trace!("Suppressed echo {:?}", line);
                return;
            }
            link.urc.classify(line)
        };

        match classified {
            Classified::Line(line) => self.emit(SessionEvent::LineReceived { line }),
            Classified::HeaderHeld => tracing::trace!("SMS header held, waiting for body"),
            Classified::Sms(sms) => self.deliver_sms(sms),
            Classified::MessageStored { index } => {
                self.emit(SessionEvent::MessageStored { index: index.clone() });
                if let Err(e) = self.send_command(&format!("AT+CMGR={}", index)) {
                    tracing::warn!("Could not read stored message {}: {}", index, e);
                    self.emit(SessionEvent::AutoReadFailed { index });
                }
            }
            Classified::Malformed(line) => {
                tracing::warn!("Malformed notification: {}", line);
                self.emit(SessionEvent::MalformedNotification { line });
            }
        }
    }
}

impl<T: ByteTransport> StepSink for Inner<T> {
    fn command(&self, text: &str) -> Result<(), SessionError> {
        self.send_command(text)
    }

    fn payload(&self, data: &[u8]) -> Result<(), SessionError> {
        self.write_payload(data)
    }

    fn step_failed(&self, step: &Step, error: &SessionError) {
        if let StepAction::Command(command) = &step.action {
            tracing::warn!("Init command {} failed: {}", command, error);
            self.emit(SessionEvent::BootstrapFailed {
                command: command.clone(),
            });
        }
    }
}

/// AT-command session bound to one transport
pub struct AtSession<T: ByteTransport + 'static = SerialTransport> {
    inner: Arc<Inner<T>>,
}

impl AtSession<SerialTransport> {
    /// Create a session over a serial port with default line settings
    pub fn new() -> Self {
        Self::with_transport(SerialTransport::default())
    }
}

impl Default for AtSession<SerialTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ByteTransport + 'static> AtSession<T> {
    /// Create a session over `transport`, pacing sequences by sleeping
    pub fn with_transport(transport: T) -> Self {
        Self::with_pacer(transport, ThreadPacer)
    }

    /// Create a session over `transport` with a custom pacer
    pub fn with_pacer(transport: T, pacer: impl Pacer + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                link: Mutex::new(LinkState::default()),
                callbacks: Mutex::new(Callbacks::default()),
                profile: RwLock::new(SmsProfile::default()),
                pacer: Box::new(pacer),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Open `port` and run the modem bootstrap.
    ///
    /// Any existing connection is closed first and all protocol state reset.
    /// Bootstrap command failures are logged, not returned.
    pub fn connect(&self, port: &str, baud_rate: u32) -> Result<(), SessionError> {
        self.disconnect();
        let generation = {
            let mut link = self.inner.link.lock();
            link.reset();
            self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1
        };

        let weak = Arc::downgrade(&self.inner);
        let handler: DataHandler = Arc::new(move |chunk: &[u8]| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_incoming(generation, chunk);
            }
        });
        self.inner.transport.set_data_handler(Some(handler));

        if let Err(e) = self.inner.transport.open(port, baud_rate) {
            self.inner.transport.set_data_handler(None);
            tracing::warn!("Failed to open {}: {}", port, e);
            return Err(e.into());
        }

        tracing::info!("Connected to {} @ {} baud", port, baud_rate);
        self.inner.emit(SessionEvent::Connected {
            port: port.to_string(),
            baud_rate,
        });
        self.configure_after_connect();
        Ok(())
    }

    /// Close the connection. Safe to call repeatedly.
    ///
    /// No data handler call for the closed connection happens after return,
    /// unless this is called from inside one.
    pub fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        self.inner.transport.set_data_handler(None);
        if self.inner.transport.is_open() {
            self.inner.transport.close();
            tracing::info!("Disconnected");
            self.inner.emit(SessionEvent::Disconnected);
        }
        self.inner.link.lock().echo.clear();
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_open()
    }

    /// Send one AT command line.
    ///
    /// The text is trimmed and terminated with `\r`. On success the command is
    /// queued for echo suppression.
    pub fn send_command(&self, text: &str) -> Result<(), SessionError> {
        self.inner.send_command(text)
    }

    /// Send `body` as a text-mode SMS to the configured destination.
    ///
    /// Blocks for the inter-step delays of the handshake.
    pub fn send_sms(&self, body: &str) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }

        let profile = self.inner.profile.read().clone();
        let plan = SendPlan::sms(&profile, body)?;

        match sequencer::run(&plan, &*self.inner, &*self.inner.pacer) {
            Ok(()) => {
                tracing::info!("SMS sent to {}", profile.target_number);
                self.inner.emit(SessionEvent::SmsSent {
                    body: body.trim().to_string(),
                });
                Ok(())
            }
            Err(SessionError::NoDestination) => {
                self.inner.emit(SessionEvent::NoDestination);
                Err(SessionError::NoDestination)
            }
            Err(e) => Err(e),
        }
    }

    /// Replace the SMS destination settings
    pub fn set_sms_profile(&self, profile: SmsProfile) {
        *self.inner.profile.write() = profile;
    }

    /// Current SMS destination settings
    pub fn sms_profile(&self) -> SmsProfile {
        self.inner.profile.read().clone()
    }

    /// Register the event callback, replacing any previous one
    pub fn set_log_callback<F>(&self, callback: F)
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.callbacks.lock().log = Some(Arc::new(callback));
    }

    /// Drop the event callback; events are discarded until a new one is set
    pub fn clear_log_callback(&self) {
        self.inner.callbacks.lock().log = None;
    }

    /// Register the SMS callback, replacing any previous one
    pub fn set_sms_callback<F>(&self, callback: F)
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.inner.callbacks.lock().sms = Some(Arc::new(callback));
    }

    /// Drop the SMS callback; messages are discarded until a new one is set
    pub fn clear_sms_callback(&self) {
        self.inner.callbacks.lock().sms = None;
    }

    /// Number of sent commands still awaiting their echo
    pub fn pending_echoes(&self) -> usize {
        self.inner.link.lock().echo.len()
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    fn configure_after_connect(&self) {
        if let Err(e) = sequencer::run(&SendPlan::bootstrap(), &*self.inner, &*self.inner.pacer) {
            tracing::warn!("Bootstrap aborted: {}", e);
        }
    }
}

impl<T: ByteTransport + 'static> Drop for AtSession<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
