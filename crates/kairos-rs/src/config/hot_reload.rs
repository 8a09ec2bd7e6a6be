//! Configuration hot-reload for zero-downtime updates.
//!
//! Watches the configuration file for modifications, reloads and validates
//! it, and broadcasts the new [`GatewayConfig`] together with a freshly
//! built [`RouteTable`] so subscribers can swap both in atomically without
//! re-compiling routes on their own.

use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;

use crate::config::settings::load_from_path;
use crate::config::validation::ConfigValidator;
use crate::models::settings::GatewayConfig;
use crate::route_table::RouteTable;

/// One reload event: the new configuration, its pre-built route table, and
/// a monotonically increasing version number.
#[derive(Clone)]
pub struct ConfigUpdate {
    pub config: Arc<GatewayConfig>,
    pub route_table: Arc<RouteTable>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: u64,
}

impl ConfigUpdate {
    fn from_config(config: GatewayConfig, version: u64) -> Self {
        let route_table = Arc::new(RouteTable::new(config.routes.clone()));
        Self {
            config: Arc::new(config),
            route_table,
            timestamp: chrono::Utc::now(),
            version,
        }
    }
}

/// Watches a configuration file for changes and broadcasts validated updates.
pub struct ConfigWatcher {
    current: Arc<RwLock<ConfigUpdate>>,
    config_path: String,
    update_sender: broadcast::Sender<ConfigUpdate>,
    version_counter: Arc<std::sync::atomic::AtomicU64>,
}

impl ConfigWatcher {
    pub fn new(initial_config: GatewayConfig, config_path: String) -> Self {
        let (update_sender, _) = broadcast::channel(100);
        let initial = ConfigUpdate::from_config(initial_config, 1);

        Self {
            current: Arc::new(RwLock::new(initial)),
            config_path,
            update_sender,
            version_counter: Arc::new(std::sync::atomic::AtomicU64::new(1)),
        }
    }

    pub async fn get_current(&self) -> ConfigUpdate {
        self.current.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigUpdate> {
        self.update_sender.subscribe()
    }

    /// Spawns a background task that polls the file's mtime every 5 seconds
    /// and reloads on change. A failed reload is logged and left for the
    /// next tick rather than poisoning the currently serving configuration.
    pub async fn start_watching(&self) {
        let mut ticker = interval(Duration::from_secs(5));
        let config_path = self.config_path.clone();
        let current = self.current.clone();
        let update_sender = self.update_sender.clone();
        let version_counter = self.version_counter.clone();

        tokio::spawn(async move {
            let mut last_modified = file_modified_time(&config_path).await;

            loop {
                ticker.tick().await;

                match file_modified_time(&config_path).await {
                    Some(modified) if Some(modified) != last_modified => {
                        info!("configuration file changed, reloading");
                        match Self::reload(&config_path).await {
                            Ok(new_config) => {
                                let version = version_counter
                                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
                                    + 1;
                                let update = ConfigUpdate::from_config(new_config, version);
                                *current.write().await = update.clone();
                                if update_sender.send(update).is_err() {
                                    warn!("config update broadcast has no subscribers");
                                }
                                info!("configuration reloaded (version {})", version);
                                last_modified = Some(modified);
                            }
                            Err(e) => {
                                error!("failed to reload configuration, keeping previous: {}", e);
                            }
                        }
                    }
                    Some(_) => {}
                    None => warn!("could not read mtime for config file {}", config_path),
                }
            }
        });
    }

    async fn reload(config_path: &str) -> Result<GatewayConfig, String> {
        let new_config = load_from_path(config_path).map_err(|e| e.to_string())?;

        let report = ConfigValidator::validate_comprehensive(&new_config);
        if !report.is_valid {
            return Err(format!(
                "configuration validation failed: {}",
                report.errors.join(", ")
            ));
        }
        for warning in &report.warnings {
            warn!("config validation warning: {}", warning);
        }

        Ok(new_config)
    }

    /// Forces an immediate reload, bypassing the mtime poll.
    pub async fn manual_reload(&self) -> Result<ConfigUpdate, String> {
        let new_config = Self::reload(&self.config_path).await?;
        let version = self
            .version_counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;
        let update = ConfigUpdate::from_config(new_config, version);

        *self.current.write().await = update.clone();
        if self.update_sender.send(update.clone()).is_err() {
            warn!("manual config update broadcast has no subscribers");
        }
        info!("configuration manually reloaded (version {})", version);
        Ok(update)
    }
}

async fn file_modified_time(path: &str) -> Option<std::time::SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

/// Bundles a [`ConfigWatcher`] for callers that just want start/subscribe/reload.
pub struct ConfigManager {
    watcher: ConfigWatcher,
}

impl ConfigManager {
    pub fn new(initial_config: GatewayConfig, config_path: String) -> Self {
        Self {
            watcher: ConfigWatcher::new(initial_config, config_path),
        }
    }

    pub async fn start(&self) {
        info!("starting configuration hot-reload watcher");
        self.watcher.start_watching().await;
    }

    pub async fn get_current(&self) -> ConfigUpdate {
        self.watcher.get_current().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigUpdate> {
        self.watcher.subscribe()
    }

    pub async fn reload_now(&self) -> Result<ConfigUpdate, String> {
        self.watcher.manual_reload().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(path: &std::path::Path, routes_len: usize) {
        let routes: Vec<String> = (0..routes_len)
            .map(|i| {
                format!(
                    r#"{{"path": "/r{i}", "match_type": "exact", "service": "svc"}}"#,
                )
            })
            .collect();
        let body = format!(
            r#"{{"version": 1, "services": {{"svc": [{{"id": "a", "host": "127.0.0.1", "port": 9000}}]}}, "routes": [{}]}}"#,
            routes.join(",")
        );
        std::fs::File::create(path)
            .unwrap()
            .write_all(body.as_bytes())
            .unwrap();
    }

    #[tokio::test]
    async fn manual_reload_bumps_version_and_route_table() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_config(file.path(), 1);

        let initial = load_from_path(file.path().to_str().unwrap()).unwrap();
        let watcher = ConfigWatcher::new(initial, file.path().to_str().unwrap().to_string());
        assert_eq!(watcher.get_current().await.version, 1);

        write_config(file.path(), 2);
        let update = watcher.manual_reload().await.unwrap();
        assert_eq!(update.version, 2);
        assert_eq!(update.route_table.len(), 2);
    }

    #[tokio::test]
    async fn invalid_reload_is_rejected_and_keeps_previous() {
        let file = tempfile::NamedTempFile::new().unwrap();
        write_config(file.path(), 1);

        let initial = load_from_path(file.path().to_str().unwrap()).unwrap();
        let watcher = ConfigWatcher::new(initial, file.path().to_str().unwrap().to_string());

        std::fs::File::create(file.path())
            .unwrap()
            .write_all(b"not json")
            .unwrap();

        assert!(watcher.manual_reload().await.is_err());
        assert_eq!(watcher.get_current().await.version, 1);
    }
}
