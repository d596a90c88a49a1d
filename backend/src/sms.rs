use async_trait::async_trait;
use std::sync::{Arc, Mutex};

// 1. SmsSender Contract
/// SmsSender
///
/// Defines the contract for delivering one-time codes to a phone. The concrete
/// transport is swappable: `LogSmsSender` for development, `MockSmsSender` in
/// tests. A carrier integration plugs in behind the same trait.
#[async_trait]
pub trait SmsSender: Send + Sync {
    /// Sends `body` to `phone` (E.164). Errors carry a transport description.
    async fn send(&self, phone: &str, body: &str) -> Result<(), String>;
}

// 2. Development Transport
/// LogSmsSender
///
/// Writes outgoing messages to the tracing log instead of a carrier.
#[derive(Clone, Default)]
pub struct LogSmsSender;

#[async_trait]
impl SmsSender for LogSmsSender {
    async fn send(&self, phone: &str, body: &str) -> Result<(), String> {
        tracing::info!(phone = %mask_phone(phone), "sms dispatched");
        tracing::debug!(phone = %phone, body = %body, "sms body");
        Ok(())
    }
}

/// Keeps the country prefix and the last two digits: `+4915******89`.
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 6 {
        return "*".repeat(chars.len());
    }
    chars
        .iter()
        .enumerate()
        .map(|(i, c)| if i < 4 || i >= chars.len() - 2 { *c } else { '*' })
        .collect()
}

// 3. The Mock Implementation (For Tests)
/// A message captured by `MockSmsSender`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentSms {
    pub phone: String,
    pub body: String,
}

/// MockSmsSender
///
/// Records every message so tests can read back the code that was sent.
#[derive(Clone, Default)]
pub struct MockSmsSender {
    /// When true, every send returns a simulated failure.
    pub should_fail: bool,
    sent: Arc<Mutex<Vec<SentSms>>>,
}

impl MockSmsSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentSms> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// The six-digit code from the most recent message to `phone`.
    pub fn last_code_for(&self, phone: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .find(|sms| sms.phone == phone)
            .and_then(|sms| {
                sms.body
                    .split(|c: char| !c.is_ascii_digit())
                    .find(|part| part.len() == 6)
                    .map(str::to_string)
            })
    }
}

#[async_trait]
impl SmsSender for MockSmsSender {
    async fn send(&self, phone: &str, body: &str) -> Result<(), String> {
        if self.should_fail {
            return Err("Mock SMS Error: Simulation requested".to_string());
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentSms {
                phone: phone.to_string(),
                body: body.to_string(),
            });
        }
        Ok(())
    }
}

/// SmsState
///
/// The concrete type used to share the SMS transport across the application state.
pub type SmsState = Arc<dyn SmsSender>;
