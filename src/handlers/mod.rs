//! HTTP handlers for the lease protocol and its debug endpoints.

pub mod debug;
pub mod lease;
