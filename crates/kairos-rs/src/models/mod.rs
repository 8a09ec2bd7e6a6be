//! Data models and domain types for the kairos-rs API gateway.
//!
//! - [`error`] - the terminal `GatewayError` taxonomy and HTTP response mapping
//! - [`route`] - route rule configuration (the route table's unit of data)
//! - [`instance`] - service instance snapshots produced by discovery
//! - [`settings`] - process configuration (`GatewayConfig`)

pub mod error;
pub mod instance;
pub mod route;
pub mod settings;
