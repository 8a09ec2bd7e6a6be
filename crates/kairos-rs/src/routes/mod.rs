//! Health and readiness endpoints for the kairos-rs gateway.
//!
//! The request-forwarding surface itself is registered directly by
//! [`crate::proxy::configure`]; this module covers the operational
//! endpoints that sit outside that catch-all.

pub mod health;
