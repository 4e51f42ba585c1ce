//! Turnstile - admission control and input hardening for HTTP APIs
//!
//! Every call passes through a fixed pipeline before it reaches a handler:
//! hardening headers, a fixed-window rate limit backed by a durable store,
//! recursive input sanitization, and declarative schema validation. Failures
//! leave through a single error normalizer that redacts internals in
//! production.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod ratelimit;
pub mod sanitize;
pub mod validate;
