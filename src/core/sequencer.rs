//! Multi-step send sequences
//!
//! A [`SendPlan`] is the list of steps for a handshake such as the post-connect
//! bootstrap or an SMS submission. Plans are plain data; [`run`] drives one
//! against a [`StepSink`] and waits between steps through a [`Pacer`], so the
//! same plan can be paced by sleeping the thread or by any other scheduler.

use crate::core::session::SessionError;
use crate::core::sms::SmsProfile;
use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;

/// Delay after each command so the modem can answer before the next one
pub const STEP_DELAY: Duration = Duration::from_millis(150);

/// Ctrl-Z, ends the SMS text in text mode
pub const SMS_TERMINATOR: u8 = 0x1A;

/// Commands sent after every successful connect
pub const BOOTSTRAP_COMMANDS: [&str; 3] = ["AT", "AT+CMGF=1", "AT+CNMI=2,1,0,0,0"];

/// Waits between the steps of a plan
pub trait Pacer: Send + Sync {
    /// Block or yield for `delay`
    fn pause(&self, delay: Duration);
}

/// Sleeps the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&self, delay: Duration) {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

/// Does not wait at all
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediatePacer;

impl Pacer for ImmediatePacer {
    fn pause(&self, _delay: Duration) {}
}

/// What happens when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    /// Stop the plan and return the error
    Abort,
    /// Report through [`StepSink::step_failed`] and continue
    Report,
    /// Continue silently
    Ignore,
}

/// Reason a plan stops by itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    /// No SMS destination configured
    NoDestination,
}

/// Single action of a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// AT command line, sent with echo bookkeeping
    Command(String),
    /// Raw bytes written as-is
    Payload(Bytes),
    /// Stop the plan
    Halt(Halt),
}

/// A step and how to treat it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// What to send
    pub action: StepAction,
    /// Failure policy
    pub on_failure: OnFailure,
    /// Pause after the step completes
    pub delay_after: Duration,
}

impl Step {
    fn command(text: impl Into<String>, on_failure: OnFailure) -> Self {
        Self {
            action: StepAction::Command(text.into()),
            on_failure,
            delay_after: STEP_DELAY,
        }
    }
}

/// Ordered steps of a handshake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendPlan {
    steps: Vec<Step>,
}

impl SendPlan {
    /// Handshake, text mode and URC delivery. Failures are reported, never fatal.
    pub fn bootstrap() -> Self {
        Self {
            steps: BOOTSTRAP_COMMANDS
                .iter()
                .map(|cmd| Step::command(*cmd, OnFailure::Report))
                .collect(),
        }
    }

    /// Text-mode SMS submission of `body` using `profile`.
    ///
    /// Fails with [`SessionError::EmptyBody`] if the trimmed body is empty.
    pub fn sms(profile: &SmsProfile, body: &str) -> Result<Self, SessionError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(SessionError::EmptyBody);
        }

        let mut steps = Vec::with_capacity(4);
        if !profile.service_center.is_empty() {
            steps.push(Step::command(
                format!("AT+CSCA=\"{}\"", profile.service_center),
                OnFailure::Ignore,
            ));
        }
        steps.push(Step::command("AT+CMGF=1", OnFailure::Abort));

        if profile.target_number.is_empty() {
            steps.push(Step {
                action: StepAction::Halt(Halt::NoDestination),
                on_failure: OnFailure::Abort,
                delay_after: Duration::ZERO,
            });
            return Ok(Self { steps });
        }

        steps.push(Step::command(
            format!("AT+CMGS=\"{}\"", profile.target_number),
            OnFailure::Abort,
        ));

        let mut payload = BytesMut::with_capacity(body.len() + 1);
        payload.put_slice(body.as_bytes());
        payload.put_u8(SMS_TERMINATOR);
        steps.push(Step {
            action: StepAction::Payload(payload.freeze()),
            on_failure: OnFailure::Abort,
            delay_after: Duration::ZERO,
        });

        Ok(Self { steps })
    }

    /// Steps in execution order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }
}

/// Executes the actions of a plan
pub trait StepSink {
    /// Send one command line
    fn command(&self, text: &str) -> Result<(), SessionError>;

    /// Write raw bytes
    fn payload(&self, data: &[u8]) -> Result<(), SessionError>;

    /// A step with [`OnFailure::Report`] failed
    fn step_failed(&self, step: &Step, error: &SessionError);
}

/// Run `plan` to completion or to the first aborting failure.
pub fn run(plan: &SendPlan, sink: &dyn StepSink, pacer: &dyn Pacer) -> Result<(), SessionError> {
    for step in plan.steps() {
        let result = match &step.action {
            StepAction::Command(text) => sink.command(text),
            StepAction::Payload(data) => sink.payload(data),
            StepAction::Halt(Halt::NoDestination) => Err(SessionError::NoDestination),
        };

        if let Err(error) = result {
            match step.on_failure {
                OnFailure::Abort => return Err(error),
                OnFailure::Report => sink.step_failed(step, &error),
                OnFailure::Ignore => {
                    tracing::debug!("Ignoring failed step {:?}: {}", step.action, error);
                }
            }
        }

        pacer.pause(step.delay_after);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
        payloads: Mutex<Vec<Vec<u8>>>,
        failed: Mutex<Vec<String>>,
        reject: Vec<&'static str>,
    }

    impl StepSink for Recorder {
        fn command(&self, text: &str) -> Result<(), SessionError> {
            if self.reject.iter().any(|r| *r == text) {
                return Err(SessionError::NotConnected);
            }
            self.sent.lock().push(text.to_string());
            Ok(())
        }

        fn payload(&self, data: &[u8]) -> Result<(), SessionError> {
            self.payloads.lock().push(data.to_vec());
            Ok(())
        }

        fn step_failed(&self, step: &Step, _error: &SessionError) {
            if let StepAction::Command(text) = &step.action {
                self.failed.lock().push(text.clone());
            }
        }
    }

    #[derive(Default)]
    struct CountingPacer {
        pauses: Mutex<Vec<Duration>>,
    }

    impl Pacer for CountingPacer {
        fn pause(&self, delay: Duration) {
            self.pauses.lock().push(delay);
        }
    }

    #[test]
    fn test_bootstrap_continues_after_failure() {
        let sink = Recorder {
            reject: vec!["AT+CMGF=1"],
            ..Default::default()
        };
        let pacer = CountingPacer::default();

        assert!(run(&SendPlan::bootstrap(), &sink, &pacer).is_ok());
        assert_eq!(*sink.sent.lock(), vec!["AT", "AT+CNMI=2,1,0,0,0"]);
        assert_eq!(*sink.failed.lock(), vec!["AT+CMGF=1"]);
        assert_eq!(*pacer.pauses.lock(), vec![STEP_DELAY; 3]);
    }

    #[test]
    fn test_sms_plan_full() {
        let profile = SmsProfile::new("+4412345").service_center("+4400000");
        let sink = Recorder::default();
        let plan = SendPlan::sms(&profile, "  Hi there \n").unwrap();

        assert!(run(&plan, &sink, &ImmediatePacer).is_ok());
        assert_eq!(
            *sink.sent.lock(),
            vec!["AT+CSCA=\"+4400000\"", "AT+CMGF=1", "AT+CMGS=\"+4412345\""]
        );
        assert_eq!(*sink.payloads.lock(), vec![b"Hi there\x1A".to_vec()]);
    }

    #[test]
    fn test_sms_without_service_center() {
        let plan = SendPlan::sms(&SmsProfile::new("123"), "x").unwrap();
        assert_eq!(
            plan.steps()[0].action,
            StepAction::Command("AT+CMGF=1".to_string())
        );
        assert_eq!(plan.steps().len(), 3);
    }

    #[test]
    fn test_sms_without_destination_halts() {
        let sink = Recorder::default();
        let plan = SendPlan::sms(&SmsProfile::default(), "body").unwrap();

        let result = run(&plan, &sink, &ImmediatePacer);
        assert!(matches!(result, Err(SessionError::NoDestination)));
        assert_eq!(*sink.sent.lock(), vec!["AT+CMGF=1"]);
        assert!(sink.payloads.lock().is_empty());
    }

    #[test]
    fn test_sms_aborts_when_text_mode_rejected() {
        let sink = Recorder {
            reject: vec!["AT+CMGF=1"],
            ..Default::default()
        };
        let plan = SendPlan::sms(&SmsProfile::new("123").service_center("456"), "body").unwrap();

        assert!(run(&plan, &sink, &ImmediatePacer).is_err());
        assert_eq!(*sink.sent.lock(), vec!["AT+CSCA=\"456\""]);
        assert!(sink.payloads.lock().is_empty());
    }

    #[test]
    fn test_service_center_failure_ignored() {
        let sink = Recorder {
            reject: vec!["AT+CSCA=\"456\""],
            ..Default::default()
        };
        let plan = SendPlan::sms(&SmsProfile::new("123").service_center("456"), "body").unwrap();

        assert!(run(&plan, &sink, &ImmediatePacer).is_ok());
        assert!(sink.failed.lock().is_empty());
        assert_eq!(sink.payloads.lock().len(), 1);
    }

    #[test]
    fn test_empty_body_rejected() {
        assert!(matches!(
            SendPlan::sms(&SmsProfile::new("123"), "   "),
            Err(SessionError::EmptyBody)
        ));
    }
}
