//! Static tenant directory
//!
//! In-memory implementations of the destination and tenant-config ports,
//! seeded from configuration at startup. Deployments with an admin backend
//! swap these for HTTP-backed variants behind the same traits.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::destination::TransferDestination;
use crate::domain::ports::{DestinationSource, SecretarySettings, TenantConfig};
use crate::domain::shared::Result;

/// Destination lists keyed by (tenant, secretary).
#[derive(Default)]
pub struct StaticDestinationSource {
    entries: Mutex<HashMap<(String, String), Vec<TransferDestination>>>,
}

impl StaticDestinationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, tenant: &str, secretary: &str, destinations: Vec<TransferDestination>) {
        self.entries
            .lock()
            .unwrap()
            .insert((tenant.to_string(), secretary.to_string()), destinations);
    }
}

#[async_trait]
impl DestinationSource for StaticDestinationSource {
    async fn load(&self, tenant: &str, secretary: &str) -> Result<Vec<TransferDestination>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .get(&(tenant.to_string(), secretary.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

/// DND flags and secretary settings held in memory.
#[derive(Default)]
pub struct StaticTenantConfig {
    dnd: Mutex<HashMap<(String, String), bool>>,
    settings: Mutex<HashMap<(String, String), SecretarySettings>>,
}

impl StaticTenantConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_dnd(&self, tenant: &str, extension: &str, enabled: bool) {
        self.dnd
            .lock()
            .unwrap()
            .insert((tenant.to_string(), extension.to_string()), enabled);
    }

    pub fn set_settings(&self, tenant: &str, secretary: &str, settings: SecretarySettings) {
        self.settings
            .lock()
            .unwrap()
            .insert((tenant.to_string(), secretary.to_string()), settings);
    }
}

#[async_trait]
impl TenantConfig for StaticTenantConfig {
    async fn is_dnd(&self, tenant: &str, extension: &str) -> Result<bool> {
        let dnd = self.dnd.lock().unwrap();
        Ok(dnd
            .get(&(tenant.to_string(), extension.to_string()))
            .copied()
            .unwrap_or(false))
    }

    async fn secretary_settings(
        &self,
        tenant: &str,
        secretary: &str,
    ) -> Result<SecretarySettings> {
        let settings = self.settings.lock().unwrap();
        Ok(settings
            .get(&(tenant.to_string(), secretary.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}
