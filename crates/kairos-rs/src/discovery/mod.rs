//! Service discovery: resolves a service name to a snapshot of instances.
//!
//! Two concrete variants share one trait so the rest of the core depends
//! only on the interface: [`StaticDiscovery`] resolves from configuration
//! and republishes on reload; a registry-backed variant would poll on an
//! interval and never block the hot path on registry availability.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

use crate::models::instance::ServiceInstance;
use crate::models::settings::StaticInstanceConfig;

#[derive(Debug, Error, Clone)]
pub enum DiscoveryError {
    #[error("no healthy instance for service {service}")]
    NoInstance { service: String },
    #[error("unknown service {service}")]
    UnknownService { service: String },
}

/// Capability set the core consumes from any discovery backend.
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn get_instances(&self, service: &str) -> Result<Vec<ServiceInstance>, DiscoveryError>;

    /// Subscribes to push updates for a service. The default implementation
    /// returns `None`, signalling that callers must poll instead.
    fn watch(&self, _service: &str) -> Option<broadcast::Receiver<Vec<ServiceInstance>>> {
        None
    }
}

/// Instances loaded from configuration; `watch` notifies subscribers on reload.
pub struct StaticDiscovery {
    instances: RwLock<HashMap<String, Vec<ServiceInstance>>>,
    update_sender: broadcast::Sender<(String, Vec<ServiceInstance>)>,
}

impl StaticDiscovery {
    pub fn new(services: &HashMap<String, Vec<StaticInstanceConfig>>) -> Self {
        let instances = services
            .iter()
            .map(|(name, configs)| {
                let instances: Vec<ServiceInstance> = configs
                    .iter()
                    .map(|c| ServiceInstance {
                        id: c.id.clone(),
                        host: c.host.clone(),
                        port: c.port,
                        weight: c.weight,
                        healthy: true,
                        metadata: HashMap::new(),
                    })
                    .collect();
                (name.clone(), instances)
            })
            .collect();
        let (update_sender, _) = broadcast::channel(64);
        Self {
            instances: RwLock::new(instances),
            update_sender,
        }
    }

    /// Replaces the instance list for `service`, publishing the new snapshot
    /// to anyone subscribed via `watch`. Used by the configuration reload path.
    pub async fn republish(&self, service: &str, instances: Vec<ServiceInstance>) {
        self.instances
            .write()
            .await
            .insert(service.to_string(), instances.clone());
        // No subscribers is not an error; it just means nobody is watching yet.
        let _ = self.update_sender.send((service.to_string(), instances));
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn get_instances(&self, service: &str) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        let guard = self.instances.read().await;
        let all = guard
            .get(service)
            .ok_or_else(|| DiscoveryError::UnknownService {
                service: service.to_string(),
            })?;
        let healthy: Vec<ServiceInstance> = all.iter().filter(|i| i.healthy).cloned().collect();
        if healthy.is_empty() {
            return Err(DiscoveryError::NoInstance {
                service: service.to_string(),
            });
        }
        Ok(healthy)
    }

    fn watch(&self, service: &str) -> Option<broadcast::Receiver<Vec<ServiceInstance>>> {
        // Each subscriber gets the raw (service, instances) stream and
        // filters for its own service name on receive; a thin wrapper type
        // would avoid the filter but isn't worth the extra indirection here.
        let mut rx = self.update_sender.subscribe();
        let service = service.to_string();
        let (tx, out_rx) = broadcast::channel(16);
        tokio::spawn(async move {
            while let Ok((svc, instances)) = rx.recv().await {
                if svc == service {
                    let _ = tx.send(instances);
                }
            }
        });
        Some(out_rx)
    }
}

/// Polls an external registry on a fixed interval for services not actively
/// watched; prefers a stale cached snapshot over blocking the hot path when
/// the registry is unreachable.
pub struct RegistryDiscovery {
    cache: Arc<RwLock<HashMap<String, Vec<ServiceInstance>>>>,
}

impl RegistryDiscovery {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Starts the background refresh loop. `fetch` performs the actual
    /// registry call; failures are logged and the previous snapshot kept.
    pub fn start_refresh<F, Fut>(&self, service: String, fetch: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Vec<ServiceInstance>, String>> + Send,
    {
        let cache = self.cache.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                match fetch().await {
                    Ok(instances) => {
                        cache.write().await.insert(service.clone(), instances);
                    }
                    Err(e) => {
                        log::warn!("registry refresh failed for {}: {} (keeping stale snapshot)", service, e);
                    }
                }
            }
        });
    }
}

impl Default for RegistryDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Discovery for RegistryDiscovery {
    async fn get_instances(&self, service: &str) -> Result<Vec<ServiceInstance>, DiscoveryError> {
        let guard = self.cache.read().await;
        let all = guard
            .get(service)
            .ok_or_else(|| DiscoveryError::UnknownService {
                service: service.to_string(),
            })?;
        let healthy: Vec<ServiceInstance> = all.iter().filter(|i| i.healthy).cloned().collect();
        if healthy.is_empty() {
            return Err(DiscoveryError::NoInstance {
                service: service.to_string(),
            });
        }
        Ok(healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(id: &str, port: u16) -> StaticInstanceConfig {
        StaticInstanceConfig {
            id: id.to_string(),
            host: "127.0.0.1".to_string(),
            port,
            weight: 1,
        }
    }

    #[tokio::test]
    async fn returns_configured_instances() {
        let mut services = HashMap::new();
        services.insert("orders".to_string(), vec![cfg("a", 8001), cfg("b", 8002)]);
        let discovery = StaticDiscovery::new(&services);
        let instances = discovery.get_instances("orders").await.unwrap();
        assert_eq!(instances.len(), 2);
    }

    #[tokio::test]
    async fn unknown_service_is_an_error() {
        let discovery = StaticDiscovery::new(&HashMap::new());
        assert!(matches!(
            discovery.get_instances("ghost").await,
            Err(DiscoveryError::UnknownService { .. })
        ));
    }

    #[tokio::test]
    async fn empty_healthy_set_is_no_instance_error() {
        let mut services = HashMap::new();
        services.insert("orders".to_string(), vec![]);
        let discovery = StaticDiscovery::new(&services);
        assert!(matches!(
            discovery.get_instances("orders").await,
            Err(DiscoveryError::NoInstance { .. })
        ));
    }

    #[tokio::test]
    async fn republish_updates_snapshot() {
        let mut services = HashMap::new();
        services.insert("orders".to_string(), vec![cfg("a", 8001)]);
        let discovery = StaticDiscovery::new(&services);
        discovery
            .republish(
                "orders",
                vec![ServiceInstance {
                    id: "b".to_string(),
                    host: "127.0.0.1".to_string(),
                    port: 9001,
                    weight: 1,
                    healthy: true,
                    metadata: HashMap::new(),
                }],
            )
            .await;
        let instances = discovery.get_instances("orders").await.unwrap();
        assert_eq!(instances[0].id, "b");
    }
}
