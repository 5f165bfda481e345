use crate::channels::Channel;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Owns the set of registered channels and their lifecycle.
#[derive(Default)]
pub struct ChannelManager {
    channels: RwLock<HashMap<String, Arc<dyn Channel>>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        self.channels
            .write()
            .expect("channel manager lock poisoned")
            .insert(name, channel);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels
            .read()
            .expect("channel manager lock poisoned")
            .get(name)
            .cloned()
    }

    /// Channel names with their running status.
    pub fn list(&self) -> Vec<(String, bool)> {
        let channels = self
            .channels
            .read()
            .expect("channel manager lock poisoned");
        let mut listed: Vec<(String, bool)> = channels
            .iter()
            .map(|(name, ch)| (name.clone(), ch.is_running()))
            .collect();
        listed.sort();
        listed
    }

    pub async fn start_all(&self) -> Result<()> {
        for channel in self.snapshot() {
            channel
                .start()
                .await
                .with_context(|| format!("start {}", channel.name()))?;
            info!("channel started: {}", channel.name());
        }
        Ok(())
    }

    /// Sequentially stop every running channel; failures are logged,
    /// not propagated, so one stuck transport cannot block shutdown.
    pub async fn stop_all(&self) {
        for channel in self.snapshot() {
            if !channel.is_running() {
                continue;
            }
            if let Err(e) = channel.stop().await {
                warn!("error stopping channel {}: {}", channel.name(), e);
            } else {
                info!("channel stopped: {}", channel.name());
            }
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn Channel>> {
        self.channels
            .read()
            .expect("channel manager lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}
