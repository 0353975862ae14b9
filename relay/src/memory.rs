use crate::errors::Result;
use crate::model::{DeviceRecord, DeviceUpdate, TelemetryRecord};
use crate::store::{DeviceRegistry, TelemetryStore};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Registry kept in process memory, for development runs and tests
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    devices: RwLock<HashMap<Uuid, DeviceRecord>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, device: DeviceRecord) {
        self.devices.write().await.insert(device.id, device);
    }
}

#[async_trait]
impl DeviceRegistry for MemoryRegistry {
    async fn find_by_sim(&self, sim_number: &str) -> Result<Option<DeviceRecord>> {
        let devices = self.devices.read().await;
        Ok(devices
            .values()
            .find(|d| d.sim_number == sim_number)
            .cloned())
    }

    async fn apply_update(&self, device_id: Uuid, update: &DeviceUpdate) -> Result<()> {
        match self.devices.write().await.get_mut(&device_id) {
            Some(device) => device.apply(update),
            None => warn!("Device {} vanished before its update was applied", device_id),
        }
        Ok(())
    }
}

/// Telemetry kept in process memory, in append order
#[derive(Debug, Default)]
pub struct MemoryTelemetryStore {
    records: RwLock<Vec<TelemetryRecord>>,
}

impl MemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TelemetryStore for MemoryTelemetryStore {
    async fn append(&self, record: &TelemetryRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn list_for_device(
        &self,
        device_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TelemetryRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<TelemetryRecord> = records
            .iter()
            .filter(|r| r.device_id == device_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }
}

/// Telemetry store whose every call fails, as when the database is down
#[cfg(test)]
pub struct DownTelemetryStore;

#[cfg(test)]
#[async_trait]
impl TelemetryStore for DownTelemetryStore {
    async fn append(&self, _record: &TelemetryRecord) -> Result<()> {
        Err(crate::errors::Error::Database(sqlx::Error::PoolTimedOut))
    }

    async fn list_for_device(
        &self,
        _device_id: Uuid,
        _limit: usize,
        _offset: usize,
    ) -> Result<Vec<TelemetryRecord>> {
        Err(crate::errors::Error::Database(sqlx::Error::PoolTimedOut))
    }
}
