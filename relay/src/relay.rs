use crate::classify::{Fields, JobFigures, Report, GET_STATUS_COMMAND};
use crate::encode::encode_commands;
use crate::errors::Result;
use crate::metrics::{
    COLLABORATOR_FAILURES_TOTAL, COMMANDS_DELIVERED_TOTAL, COMMANDS_ENQUEUED_TOTAL,
    COMMANDS_EVICTED_TOTAL, POLLS_TOTAL, REPORTS_TOTAL, UNKNOWN_DEVICE_TOTAL,
};
use crate::model::{DeviceUpdate, TelemetryRecord};
use crate::queue::CommandQueues;
use crate::store::{DeviceRegistry, TelemetryStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// What happened to an inbound report. Diagnostic only, the device is
/// acknowledged the same way whatever the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Queued,
    DeviceUpdated,
    TelemetryStored,
    UnknownDevice,
    Unrecognized,
    Failed,
}

/// Routes reports into device queues or the registry, and serves polls
#[derive(Clone)]
pub struct Relay {
    queues: Arc<CommandQueues>,
    registry: Arc<dyn DeviceRegistry>,
    store: Arc<dyn TelemetryStore>,
    default_device_id: String,
}

impl Relay {
    pub fn new(
        queues: Arc<CommandQueues>,
        registry: Arc<dyn DeviceRegistry>,
        store: Arc<dyn TelemetryStore>,
        default_device_id: impl Into<String>,
    ) -> Self {
        Self {
            queues,
            registry,
            store,
            default_device_id: default_device_id.into(),
        }
    }

    pub fn registry(&self) -> &dyn DeviceRegistry {
        self.registry.as_ref()
    }

    pub fn store(&self) -> &dyn TelemetryStore {
        self.store.as_ref()
    }

    pub async fn ingest(&self, fields: &Fields) -> Outcome {
        self.ingest_at(fields, Utc::now()).await
    }

    /// Classifies a report and applies it. Never fails: collaborator errors
    /// are logged and reported as [`Outcome::Failed`].
    async fn ingest_at(&self, fields: &Fields, received_at: DateTime<Utc>) -> Outcome {
        let report = Report::classify(fields, &self.default_device_id, received_at);
        REPORTS_TOTAL.with_label_values(&[report.kind()]).inc();

        match report {
            Report::Message { device_id, text } => {
                info!("Message received for {}: {}", device_id, text);
                self.enqueue(&device_id, text)
            }
            Report::DirectoryUpdate { device_id, command } => {
                info!("Directory update queued for SIM number: {}", device_id);
                self.enqueue(&device_id, command)
            }
            Report::StatusPoll { device_id } => {
                info!("Get status command queued for SIM number: {}", device_id);
                self.enqueue(&device_id, GET_STATUS_COMMAND)
            }
            Report::StatusReport { sim_number, update } => {
                let result = self.update_status(&sim_number, &update).await;
                settle(&sim_number, "status update", result, Outcome::DeviceUpdated)
            }
            Report::JobReport { sim_number, job } => {
                let result = self.record_job(&sim_number, job, received_at).await;
                settle(&sim_number, "job record", result, Outcome::TelemetryStored)
            }
            Report::Unrecognized { reason } => {
                debug!("Ignoring unrecognized report: {}", reason);
                Outcome::Unrecognized
            }
        }
    }

    /// Drains the device queue and encodes it for the response body
    pub fn poll(&self, device_id: Option<&str>) -> String {
        let device_id = device_id
            .filter(|id| !id.is_empty())
            .unwrap_or(self.default_device_id.as_str());

        POLLS_TOTAL.inc();
        let commands = self.queues.drain(device_id);
        if !commands.is_empty() {
            info!(
                "Sending {} messages to device with SIM: {}",
                commands.len(),
                device_id
            );
            COMMANDS_DELIVERED_TOTAL.inc_by(commands.len() as f64);
        }
        encode_commands(&commands)
    }

    fn enqueue(&self, device_id: &str, payload: impl Into<String>) -> Outcome {
        let evicted = self.queues.enqueue(device_id, payload);
        COMMANDS_ENQUEUED_TOTAL.inc();
        if evicted > 0 {
            COMMANDS_EVICTED_TOTAL.inc_by(evicted as f64);
        }
        Outcome::Queued
    }

    async fn update_status(&self, sim_number: &str, update: &DeviceUpdate) -> Result<Option<Uuid>> {
        let Some(device) = self.registry.find_by_sim(sim_number).await? else {
            return Ok(None);
        };
        self.registry.apply_update(device.id, update).await?;
        Ok(Some(device.id))
    }

    async fn record_job(
        &self,
        sim_number: &str,
        job: JobFigures,
        occurred_at: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let Some(device) = self.registry.find_by_sim(sim_number).await? else {
            return Ok(None);
        };
        let record = TelemetryRecord {
            id: Uuid::new_v4(),
            device_id: device.id,
            occurred_at,
            fuel_consumption: job.fuel_consumption,
            pressure: job.pressure,
            process_time: job.process_time,
            location: job.location,
        };
        self.store.append(&record).await?;
        Ok(Some(device.id))
    }
}

fn settle(sim_number: &str, what: &str, result: Result<Option<Uuid>>, stored: Outcome) -> Outcome {
    match result {
        Ok(Some(device_id)) => {
            info!("Stored {} for device {} (SIM: {})", what, device_id, sim_number);
            stored
        }
        Ok(None) => {
            UNKNOWN_DEVICE_TOTAL.inc();
            info!("No machine found with SIM number: {}", sim_number);
            Outcome::UnknownDevice
        }
        Err(e) => {
            COLLABORATOR_FAILURES_TOTAL.inc();
            error!("Failed to store {} for SIM {}: {}", what, sim_number, e);
            Outcome::Failed
        }
    }
}
