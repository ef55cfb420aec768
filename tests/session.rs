//! End-to-end behavior of `AtSession` over an in-memory transport

use atlink_core::core::echo::ECHO_CAPACITY;
use atlink_core::{AtSession, ImmediatePacer, MemoryTransport, SessionError, SessionEvent, SmsProfile};
use parking_lot::Mutex;
use std::sync::Arc;

struct Harness {
    session: AtSession<MemoryTransport>,
    events: Arc<Mutex<Vec<SessionEvent>>>,
    sms: Arc<Mutex<Vec<(String, String)>>>,
}

impl Harness {
    /// Connected session with the bootstrap already echoed back
    fn connected() -> Self {
        let session = AtSession::with_pacer(MemoryTransport::new(), ImmediatePacer);
        session.connect("/dev/ttyUSB0", 115_200).unwrap();
        session
            .transport()
            .inject(b"AT\r\r\nOK\r\nAT+CMGF=1\r\r\nOK\r\nAT+CNMI=2,1,0,0,0\r\r\nOK\r\n");
        assert_eq!(session.pending_echoes(), 0);
        session.transport().clear_writes();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        session.set_log_callback(move |event| sink.lock().push(event.clone()));

        let sms = Arc::new(Mutex::new(Vec::new()));
        let sink = sms.clone();
        session.set_sms_callback(move |header, body| {
            sink.lock().push((header.to_string(), body.to_string()));
        });

        Self { session, events, sms }
    }

    fn inject(&self, data: &[u8]) {
        assert!(self.session.transport().inject(data));
    }

    fn received_lines(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::LineReceived { line } => Some(line.clone()),
                _ => None,
            })
            .collect()
    }
}

#[test]
fn echo_of_sent_command_is_suppressed() {
    let h = Harness::connected();
    h.session.send_command("AT").unwrap();
    assert_eq!(h.session.pending_echoes(), 1);

    h.inject(b"AT\r\n");

    assert!(h.received_lines().is_empty());
    assert_eq!(h.session.pending_echoes(), 0);
}

#[test]
fn responses_after_echo_are_forwarded() {
    let h = Harness::connected();
    h.session.send_command("AT+CSQ").unwrap();

    h.inject(b"AT+CSQ\r\r\n+CSQ: 2");
    h.inject(b"1,0\r\n\r\nOK\r\n");

    assert_eq!(h.received_lines(), vec!["+CSQ: 21,0", "OK"]);
}

#[test]
fn sms_push_produces_single_event() {
    let h = Harness::connected();

    h.inject(b"+CMT: \"+123\",,\"25/01/01,00:00:00\"\r\nHello\r\n");

    assert_eq!(
        *h.sms.lock(),
        vec![(
            "+CMT: \"+123\",,\"25/01/01,00:00:00\"".to_string(),
            "Hello".to_string()
        )]
    );
    assert!(h.received_lines().is_empty());
    let sms_events = h
        .events
        .lock()
        .iter()
        .filter(|e| matches!(e, SessionEvent::SmsReceived(_)))
        .count();
    assert_eq!(sms_events, 1);
}

#[test]
fn sms_split_across_chunks() {
    let h = Harness::connected();

    h.inject(b"+CMT: \"+1\",,\"25/01");
    h.inject(b"/01,00:00:00\"\r");
    h.inject(b"\nHel");
    assert!(h.sms.lock().is_empty());
    h.inject(b"lo\r\n");

    assert_eq!(h.sms.lock().len(), 1);
    assert_eq!(h.sms.lock()[0].1, "Hello");
}

#[test]
fn stored_message_indication_triggers_read() {
    let h = Harness::connected();

    h.inject(b"+CMTI: \"SM\",3\r\n");

    assert_eq!(h.session.transport().written_text(), vec!["AT+CMGR=3\r"]);
    assert!(h.received_lines().is_empty());
    assert!(h.sms.lock().is_empty());

    // Echo of the read request, then the stored message itself.
    h.inject(b"AT+CMGR=3\r\r\n+CMGR: \"REC UNREAD\",\"+123\",,\"25/01/01,00:00:00\"\r\nStored text\r\n\r\nOK\r\n");

    assert_eq!(h.sms.lock().len(), 1);
    assert_eq!(h.sms.lock()[0].1, "Stored text");
    assert_eq!(h.received_lines(), vec!["OK"]);
}

#[test]
fn sms_without_destination_stops_before_cmgs() {
    let h = Harness::connected();
    h.session.set_sms_profile(SmsProfile::default());

    let result = h.session.send_sms("Hello");

    assert!(matches!(result, Err(SessionError::NoDestination)));
    let written = h.session.transport().written_text();
    assert_eq!(written, vec!["AT+CMGF=1\r"]);
    assert!(h.events.lock().contains(&SessionEvent::NoDestination));
}

#[test]
fn sms_handshake_and_payload() {
    let h = Harness::connected();
    h.session
        .set_sms_profile(SmsProfile::new("+15551234567").service_center("+15550000000"));

    h.session.send_sms("  Hello world  ").unwrap();

    assert_eq!(
        h.session.transport().writes(),
        vec![
            b"AT+CSCA=\"+15550000000\"\r".to_vec(),
            b"AT+CMGF=1\r".to_vec(),
            b"AT+CMGS=\"+15551234567\"\r".to_vec(),
            b"Hello world\x1A".to_vec(),
        ]
    );
    // The payload is not an AT command and is not queued for echo.
    assert_eq!(h.session.pending_echoes(), 3);
    assert!(h.events.lock().contains(&SessionEvent::SmsSent {
        body: "Hello world".to_string()
    }));
}

#[test]
fn sms_requires_connection_and_body() {
    let session = AtSession::with_pacer(MemoryTransport::new(), ImmediatePacer);
    session.set_sms_profile(SmsProfile::new("+1"));
    assert!(matches!(session.send_sms("Hi"), Err(SessionError::NotConnected)));

    let h = Harness::connected();
    h.session.set_sms_profile(SmsProfile::new("+1"));
    assert!(matches!(h.session.send_sms(" "), Err(SessionError::EmptyBody)));
    assert!(h.session.transport().writes().is_empty());
}

#[test]
fn pending_echo_queue_is_bounded() {
    let h = Harness::connected();
    for i in 0..=ECHO_CAPACITY {
        h.session.send_command(&format!("AT+TEST={}", i)).unwrap();
    }
    assert_eq!(h.session.pending_echoes(), ECHO_CAPACITY);

    // The oldest command was evicted, so its echo is now an ordinary line.
    h.inject(b"AT+TEST=0\r\nAT+TEST=1\r\n");
    assert_eq!(h.received_lines(), vec!["AT+TEST=0"]);
    assert_eq!(h.session.pending_echoes(), ECHO_CAPACITY - 1);
}

#[test]
fn disconnect_is_idempotent() {
    let h = Harness::connected();

    h.session.disconnect();
    assert!(!h.session.is_connected());
    assert!(!h.session.transport().has_handler());

    h.session.disconnect();
    assert!(!h.session.is_connected());

    let disconnects = h
        .events
        .lock()
        .iter()
        .filter(|e| matches!(e, SessionEvent::Disconnected))
        .count();
    assert_eq!(disconnects, 1);
    assert!(matches!(h.session.send_command("AT"), Err(SessionError::NotConnected)));
}

#[test]
fn no_delivery_after_disconnect() {
    let h = Harness::connected();
    h.session.disconnect();

    assert!(!h.session.transport().inject(b"RING\r\n"));
    assert!(h.received_lines().is_empty());
}

#[test]
fn concurrent_commands_and_incoming_data() {
    let h = Arc::new(Harness::connected());

    let writer = {
        let h = h.clone();
        std::thread::spawn(move || {
            for _ in 0..100 {
                h.session.send_command("AT").unwrap();
            }
        })
    };
    for _ in 0..100 {
        h.inject(b"RING\r\n");
    }
    writer.join().unwrap();

    assert_eq!(h.received_lines().len(), 100);
    assert_eq!(h.session.pending_echoes(), ECHO_CAPACITY);
}

#[test]
fn reconnect_from_callback_drops_rest_of_old_chunk() {
    let session = Arc::new(AtSession::with_pacer(MemoryTransport::new(), ImmediatePacer));
    session.connect("/dev/ttyUSB0", 115_200).unwrap();

    let lines = Arc::new(Mutex::new(Vec::new()));
    let outcome = Arc::new(Mutex::new(None));
    {
        let weak = Arc::downgrade(&session);
        let lines = lines.clone();
        let outcome = outcome.clone();
        session.set_log_callback(move |event| {
            if let SessionEvent::LineReceived { line } = event {
                lines.lock().push(line.clone());
                if line == "RECONNECT" {
                    if let Some(session) = weak.upgrade() {
                        *outcome.lock() = Some(session.connect("/dev/ttyUSB1", 9600).is_ok());
                    }
                }
            }
        });
    }

    session.transport().inject(b"RECONNECT\r\nSTALE\r\n");

    assert_eq!(*outcome.lock(), Some(true));
    assert!(session.is_connected());
    assert_eq!(
        session.transport().opened_with(),
        Some(("/dev/ttyUSB1".to_string(), 9600))
    );
    assert_eq!(*lines.lock(), vec!["RECONNECT"]);

    session.transport().inject(b"FRESH\r\n");
    assert_eq!(*lines.lock(), vec!["RECONNECT", "FRESH"]);
}
