//! Inbound HTTP surface.

pub mod rest;

pub use rest::{router, serve};
