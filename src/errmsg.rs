//! Error message constants for outward responses.
//!
//! User-facing error messages are sanitized to avoid leaking infrastructure
//! details. Full error details are logged internally.

/// Envelope did not decode or failed validation.
pub const INVALID_REQUEST: &str = "invalid request";

/// No recognized action variant was populated.
pub const UNKNOWN_ACTION: &str = "unknown action";

/// Backend connection failed (sanitized - no address details).
pub const SERVICE_UNAVAILABLE: &str = "service temporarily unavailable";

/// Backend did not answer within the per-call bound.
pub const SERVICE_TIMEOUT: &str = "service timed out";

/// Broker refused or could not take the event.
pub const QUEUE_FAILED: &str = "failed to queue event";

/// Internal wiring error (sanitized).
pub const INTERNAL_ERROR: &str = "internal service error";
