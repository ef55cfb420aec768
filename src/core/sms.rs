//! SMS value types

use serde::{Deserialize, Serialize};

/// Destination settings used when sending SMS
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsProfile {
    /// Recipient phone number
    pub target_number: String,
    /// SMS service center address; empty keeps the SIM's setting
    pub service_center: String,
}

impl SmsProfile {
    /// Create a profile for `target_number` without a service center override
    pub fn new(target_number: &str) -> Self {
        Self {
            target_number: target_number.to_string(),
            service_center: String::new(),
        }
    }

    /// Set the service center address
    #[must_use]
    pub fn service_center(mut self, address: &str) -> Self {
        self.service_center = address.to_string();
        self
    }
}

/// A received SMS: the notification header line and the body line after it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsMessage {
    /// `+CMT:` / `+CMGR:` header, trimmed
    pub header: String,
    /// Message text as received
    pub body: String,
}
