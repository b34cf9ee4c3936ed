//! Switchyard - protocol-translating API gateway
//!
//! Accepts one action envelope per request and dispatches it to a backend
//! capability over HTTP, line-delimited JSON-RPC, gRPC, or a topic-exchange
//! queue. A separate consumer drains the queue and forwards log entries to
//! the logging capability.

pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod errmsg;
pub mod handlers;
pub mod listener;
pub mod response;
pub mod transport;
pub mod utils;

pub mod proto {
    tonic::include_proto!("switchyard.logger");
}
