//! Registered channel targets and their built adapters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::info;

use super::channels::{ChannelTarget, NotificationChannel};
use super::events::EventKind;
use crate::{Error, Result};

/// A target together with the adapter built from its config.
#[derive(Clone)]
pub struct RegisteredChannel {
    pub target: ChannelTarget,
    pub channel: Arc<dyn NotificationChannel>,
}

/// Targets keyed by id. Adapters are built once, on registration.
pub struct ChannelRegistry {
    client: reqwest::Client,
    timeout: Duration,
    entries: RwLock<HashMap<String, RegisteredChannel>>,
}

impl ChannelRegistry {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Validate `target` and build its adapter without registering it.
    pub fn build(&self, target: &ChannelTarget) -> Result<Arc<dyn NotificationChannel>> {
        target.validate()?;
        target.config.build(&self.client, self.timeout)
    }

    /// Validate `target`, build its adapter and (re)place it.
    pub fn register(&self, target: ChannelTarget) -> Result<()> {
        let channel = self.build(&target)?;
        self.register_with_channel(target, channel);
        Ok(())
    }

    /// Register a target with an already-built adapter.
    pub fn register_with_channel(&self, target: ChannelTarget, channel: Arc<dyn NotificationChannel>) {
        info!(
            target_id = %target.id,
            name = %target.name,
            kind = %target.kind(),
            enabled = target.enabled,
            "Channel target registered"
        );
        self.entries
            .write()
            .insert(target.id.clone(), RegisteredChannel { target, channel });
    }

    pub fn remove(&self, id: &str) -> Option<ChannelTarget> {
        self.entries.write().remove(id).map(|entry| entry.target)
    }

    pub fn get(&self, id: &str) -> Option<RegisteredChannel> {
        self.entries.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn targets(&self) -> Vec<ChannelTarget> {
        let mut targets: Vec<_> = self
            .entries
            .read()
            .values()
            .map(|entry| entry.target.clone())
            .collect();
        targets.sort_by(|a, b| a.name.cmp(&b.name));
        targets
    }

    /// Enabled targets subscribed to `kind`.
    pub fn subscribed(&self, kind: EventKind) -> Vec<ChannelTarget> {
        self.targets()
            .into_iter()
            .filter(|target| target.subscribes(kind))
            .collect()
    }

    /// Send the fixed test message through target `id`, bypassing queue and limiter.
    pub async fn test(&self, id: &str) -> Result<()> {
        let entry = self
            .get(id)
            .ok_or_else(|| Error::not_found("ChannelTarget", id))?;
        entry.channel.test().await
    }
}
