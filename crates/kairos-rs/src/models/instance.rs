//! Service instance: a single unit of deployment behind a service name.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A snapshot of one backend instance, as produced by Discovery.
///
/// Consumers (load balancers, the proxy engine) must treat this as a
/// point-in-time snapshot: it is never mutated after being handed out.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServiceInstance {
    pub id: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_healthy")]
    pub healthy: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_weight() -> u32 {
    1
}
fn default_healthy() -> bool {
    true
}

impl ServiceInstance {
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}
