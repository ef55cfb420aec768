//! Unsolicited result code classification
//!
//! Incoming SMS arrive as a header line (`+CMT:` for direct delivery,
//! `+CMGR:` when reading a stored message) followed by exactly one body line.
//! `+CMTI:` announces a message stored on the SIM and carries its index.

use crate::core::sms::SmsMessage;

/// Header of a pushed SMS
pub const CMT_PREFIX: &str = "+CMT:";
/// Header of a stored SMS being read back
pub const CMGR_PREFIX: &str = "+CMGR:";
/// New-message-stored indication
pub const CMTI_PREFIX: &str = "+CMTI:";

/// What a received line turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// Ordinary response line
    Line(String),
    /// SMS header stored, waiting for the body line
    HeaderHeld,
    /// Header and body combined
    Sms(SmsMessage),
    /// A message was stored at `index` and should be read back
    MessageStored {
        /// Storage index token as sent by the modem
        index: String,
    },
    /// `+CMTI:` without a usable index
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum AssemblerState {
    #[default]
    Idle,
    AwaitingSmsBody {
        header: String,
    },
}

/// Two-state classifier holding one line of lookahead for SMS bodies
#[derive(Debug, Default)]
pub struct UrcClassifier {
    state: AssemblerState,
}

impl UrcClassifier {
    /// Create a classifier in the idle state
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a header is waiting for its body line
    pub fn awaiting_body(&self) -> bool {
        matches!(self.state, AssemblerState::AwaitingSmsBody { .. })
    }

    /// Return to idle, dropping any held header
    pub fn reset(&mut self) {
        self.state = AssemblerState::Idle;
    }

    /// Classify one received line.
    ///
    /// Prefix matching is done on the trimmed line. While a header is held the
    /// next line is taken as the body verbatim, without further matching.
    pub fn classify(&mut self, line: &str) -> Classified {
        if let AssemblerState::AwaitingSmsBody { header } = std::mem::take(&mut self.state) {
            return Classified::Sms(SmsMessage {
                header,
                body: line.to_string(),
            });
        }

        let normalized = line.trim();
        if normalized.starts_with(CMT_PREFIX) || normalized.starts_with(CMGR_PREFIX) {
            self.state = AssemblerState::AwaitingSmsBody {
                header: normalized.to_string(),
            };
            return Classified::HeaderHeld;
        }

        if normalized.starts_with(CMTI_PREFIX) {
            return match stored_index(normalized) {
                Some(index) => Classified::MessageStored {
                    index: index.to_string(),
                },
                None => Classified::Malformed(normalized.to_string()),
            };
        }

        Classified::Line(line.to_string())
    }
}

/// Token after the last comma of a `+CMTI:` line, e.g. `3` in `+CMTI: "SM",3`
fn stored_index(line: &str) -> Option<&str> {
    let (_, index) = line.rsplit_once(',')?;
    let index = index.trim();
    (!index.is_empty()).then_some(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmt_header_and_body() {
        let mut urc = UrcClassifier::new();
        assert_eq!(
            urc.classify("+CMT: \"+123\",,\"25/01/01,00:00:00\""),
            Classified::HeaderHeld
        );
        assert!(urc.awaiting_body());

        let sms = urc.classify("Hello");
        assert_eq!(
            sms,
            Classified::Sms(SmsMessage {
                header: "+CMT: \"+123\",,\"25/01/01,00:00:00\"".to_string(),
                body: "Hello".to_string(),
            })
        );
        assert!(!urc.awaiting_body());
    }

    #[test]
    fn test_cmgr_is_header() {
        let mut urc = UrcClassifier::new();
        assert_eq!(
            urc.classify("+CMGR: \"REC UNREAD\",\"+123\",,\"25/01/01,00:00:00\""),
            Classified::HeaderHeld
        );
    }

    #[test]
    fn test_body_is_not_reclassified() {
        let mut urc = UrcClassifier::new();
        urc.classify("+CMT: \"+1\",,\"x\"");
        match urc.classify("+CMTI: \"SM\",4") {
            Classified::Sms(sms) => assert_eq!(sms.body, "+CMTI: \"SM\",4"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(urc.classify("OK"), Classified::Line("OK".to_string()));
    }

    #[test]
    fn test_cmti_index() {
        let mut urc = UrcClassifier::new();
        assert_eq!(
            urc.classify("+CMTI: \"SM\",3"),
            Classified::MessageStored {
                index: "3".to_string()
            }
        );
        assert_eq!(
            urc.classify("+CMTI: \"ME\", 12 "),
            Classified::MessageStored {
                index: "12".to_string()
            }
        );
        assert!(!urc.awaiting_body());
    }

    #[test]
    fn test_malformed_cmti() {
        let mut urc = UrcClassifier::new();
        assert!(matches!(urc.classify("+CMTI: \"SM\""), Classified::Malformed(_)));
        assert!(matches!(urc.classify("+CMTI: \"SM\", "), Classified::Malformed(_)));
        assert_eq!(urc.classify("OK"), Classified::Line("OK".to_string()));
    }

    #[test]
    fn test_prefix_is_case_sensitive() {
        let mut urc = UrcClassifier::new();
        assert_eq!(
            urc.classify("+cmt: \"+1\""),
            Classified::Line("+cmt: \"+1\"".to_string())
        );
        assert!(!urc.awaiting_body());
    }

    #[test]
    fn test_reset_drops_header() {
        let mut urc = UrcClassifier::new();
        urc.classify("+CMT: \"+1\",,\"x\"");
        urc.reset();
        assert_eq!(urc.classify("Hello"), Classified::Line("Hello".to_string()));
    }
}
