//! Collaborators the relay reads from and writes to.
//!
//! Both are best-effort: the relay never retries a failed call, it logs the
//! error and acknowledges the device anyway.

use crate::errors::Result;
use crate::model::{DeviceRecord, DeviceUpdate, TelemetryRecord};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn find_by_sim(&self, sim_number: &str) -> Result<Option<DeviceRecord>>;

    /// Writes only the fields present in `update`
    async fn apply_update(&self, device_id: Uuid, update: &DeviceUpdate) -> Result<()>;
}

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn append(&self, record: &TelemetryRecord) -> Result<()>;

    /// Records for one device, newest first
    async fn list_for_device(
        &self,
        device_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TelemetryRecord>>;
}
