//! Synchronous HTTP transport.
//!
//! POSTs JSON to the authentication, logging and mail capabilities. The
//! `reqwest` client pools connections per host and is shared by all callers.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{Outcome, Payload, Result, Transport, TransportError, TransportKind};
use crate::config::{BackendConfig, TimeoutConfig};

/// Reply shape shared by the HTTP capabilities.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BackendReply {
    error: bool,
    message: String,
    data: Option<Value>,
}

/// A resolved backend call.
struct Call {
    backend: &'static str,
    url: String,
    body: Value,
    /// Message reported when the backend does not supply one.
    default_message: String,
}

/// HTTP transport for the request/response capabilities.
pub struct HttpTransport {
    client: Client,
    auth_url: String,
    logger_url: String,
    mail_url: String,
}

impl HttpTransport {
    pub fn new(backends: &BackendConfig, timeouts: &TimeoutConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeouts.dispatch())
            .connect_timeout(timeouts.connect())
            .build()
            .map_err(|e| TransportError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            auth_url: base_url(&backends.auth_url),
            logger_url: base_url(&backends.logger_url),
            mail_url: base_url(&backends.mail_url),
        })
    }

    fn resolve(&self, payload: Payload) -> Result<Call> {
        let call = match payload {
            Payload::Authenticate(auth) => Call {
                backend: "authentication",
                url: format!("{}/authenticate", self.auth_url),
                body: json!({ "email": auth.email, "password": auth.password }),
                default_message: format!("Logged in user {}", auth.email),
            },
            Payload::WriteLog(log) => Call {
                backend: "logger",
                url: format!("{}/log", self.logger_url),
                body: json!({ "name": log.name, "data": log.data }),
                default_message: "logged".to_string(),
            },
            Payload::SendMail(mail) => Call {
                backend: "mailer",
                default_message: format!("Message sent to {}", mail.to),
                url: format!("{}/send", self.mail_url),
                body: json!({
                    "from": mail.from,
                    "to": mail.to,
                    "subject": mail.subject,
                    "message": mail.message,
                }),
            },
            other => {
                return Err(TransportError::Unsupported {
                    transport: TransportKind::Http,
                    payload: other.label(),
                })
            }
        };
        Ok(call)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn submit(&self, payload: Payload) -> Result<Outcome> {
        let call = self.resolve(payload)?;

        let response = self
            .client
            .post(&call.url)
            .json(&call.body)
            .send()
            .await
            .map_err(|e| classify(call.backend, e))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| classify(call.backend, e))?;

        debug!(backend = call.backend, status = status.as_u16(), "Backend replied");
        interpret(call.backend, status, &bytes, call.default_message)
    }
}

/// Turn a backend reply into an outcome or an application error.
fn interpret(
    backend: &str,
    status: StatusCode,
    body: &[u8],
    default_message: String,
) -> Result<Outcome> {
    let reply: Option<BackendReply> = serde_json::from_slice(body).ok();

    if !status.is_success() {
        let message = reply
            .map(|r| r.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("{} returned status {}", backend, status.as_u16()));
        warn!(backend, status = status.as_u16(), message = %message, "Backend reported failure");
        return Err(TransportError::Application {
            message,
            status: Some(status.as_u16()),
        });
    }

    let Some(reply) = reply else {
        return Ok(Outcome::message(default_message));
    };

    if reply.error {
        let message = if reply.message.is_empty() {
            format!("{} reported an error", backend)
        } else {
            reply.message
        };
        return Err(TransportError::Application {
            message,
            status: None,
        });
    }

    Ok(Outcome {
        message: if reply.message.is_empty() {
            default_message
        } else {
            reply.message
        },
        data: reply.data,
    })
}

/// Raw socket detail stays in the error string for logs; callers only see
/// the category.
fn classify(backend: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(format!("{}: {}", backend, err))
    } else {
        TransportError::Unreachable(format!("{}: {}", backend, err))
    }
}

fn base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
