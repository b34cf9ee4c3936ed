//! Inbound action envelope.
//!
//! The wire shape is `{"action": "auth"|"log"|"mail", "<action>": {...}}`.
//! Decoding turns it into [`Action`], a sum type with exactly one payload,
//! so nothing downstream has to check which nested object was populated.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Credentials for the authentication capability.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub email: String,
    pub password: String,
}

// Passwords must never reach a log line.
impl fmt::Debug for AuthPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthPayload")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Log entry for the logging capability.
///
/// No length bound is enforced here; the backend owns persistence limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPayload {
    pub name: String,
    pub data: String,
}

/// Mail for the mail capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailPayload {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub message: String,
}

/// Action tags recognised on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Auth,
    Log,
    Mail,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [ActionKind::Auth, ActionKind::Log, ActionKind::Mail];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Auth => "auth",
            ActionKind::Log => "log",
            ActionKind::Mail => "mail",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == tag)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded, validated action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Authenticate(AuthPayload),
    WriteLog(LogPayload),
    SendMail(MailPayload),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Authenticate(_) => ActionKind::Auth,
            Action::WriteLog(_) => ActionKind::Log,
            Action::SendMail(_) => ActionKind::Mail,
        }
    }
}

/// Reasons an envelope fails to decode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unrecognised action tag '{0}'")]
    UnknownAction(String),

    #[error("action '{0}' has no '{0}' payload")]
    MissingPayload(ActionKind),

    #[error("envelope populates more than one payload: {0:?}")]
    Ambiguous(Vec<&'static str>),

    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Wire form before validation. Nested payloads are kept as raw JSON so
/// objects for non-selected actions are never parsed.
#[derive(Debug, Default, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    action: String,
    #[serde(default)]
    auth: Option<Value>,
    #[serde(default)]
    log: Option<Value>,
    #[serde(default)]
    mail: Option<Value>,
}

impl RawEnvelope {
    fn slot(&self, kind: ActionKind) -> Option<&Value> {
        let slot = match kind {
            ActionKind::Auth => &self.auth,
            ActionKind::Log => &self.log,
            ActionKind::Mail => &self.mail,
        };
        slot.as_ref().filter(|v| !v.is_null())
    }
}

/// Decode and validate an envelope from raw request bytes.
pub fn decode(body: &[u8]) -> Result<Action, EnvelopeError> {
    let raw: RawEnvelope =
        serde_json::from_slice(body).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

    let populated: Vec<&'static str> = ActionKind::ALL
        .into_iter()
        .filter(|k| raw.slot(*k).is_some())
        .map(|k| k.as_str())
        .collect();
    if populated.len() > 1 {
        return Err(EnvelopeError::Ambiguous(populated));
    }

    let kind = ActionKind::parse(&raw.action)
        .ok_or_else(|| EnvelopeError::UnknownAction(raw.action.clone()))?;
    let payload = raw
        .slot(kind)
        .cloned()
        .ok_or(EnvelopeError::MissingPayload(kind))?;

    let action = match kind {
        ActionKind::Auth => Action::Authenticate(parse_payload(payload)?),
        ActionKind::Log => Action::WriteLog(parse_payload(payload)?),
        ActionKind::Mail => Action::SendMail(parse_payload(payload)?),
    };
    validate(&action)?;
    Ok(action)
}

fn parse_payload<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, EnvelopeError> {
    serde_json::from_value(value).map_err(|e| EnvelopeError::Malformed(e.to_string()))
}

fn validate(action: &Action) -> Result<(), EnvelopeError> {
    match action {
        Action::Authenticate(auth) => {
            if auth.email.trim().is_empty() {
                return Err(EnvelopeError::Invalid {
                    field: "email",
                    reason: "must not be empty",
                });
            }
            if auth.password.is_empty() {
                return Err(EnvelopeError::Invalid {
                    field: "password",
                    reason: "must not be empty",
                });
            }
        }
        Action::SendMail(mail) => {
            if !is_email_shaped(&mail.from) {
                return Err(EnvelopeError::Invalid {
                    field: "from",
                    reason: "not an email address",
                });
            }
            if !is_email_shaped(&mail.to) {
                return Err(EnvelopeError::Invalid {
                    field: "to",
                    reason: "not an email address",
                });
            }
        }
        Action::WriteLog(_) => {}
    }
    Ok(())
}

/// `local@domain` with both halves non-empty and no whitespace.
fn is_email_shaped(address: &str) -> bool {
    match address.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !address.chars().any(char::is_whitespace)
        }
        None => false,
    }
}
