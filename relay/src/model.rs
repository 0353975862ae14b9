use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Status a device starts with until it reports otherwise
pub const DEFAULT_STATUS: &str = "OFFLINE";

/// Location stored on a job report that does not carry one
pub const UNKNOWN_LOCATION: &str = "Unknown";

/// Command waiting in a device queue until the device polls
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    pub payload: String,
    pub enqueued_at: DateTime<Utc>,
}

/// Registered field device, keyed by its SIM line number
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeviceRecord {
    pub id: Uuid,
    pub machine_name: String,
    pub sim_number: String,
    pub status: String,
    pub sensor_status: String,
    pub location: String,
    pub server_connection: bool,
    pub last_status_update: Option<DateTime<Utc>>,
    pub phone_book: Vec<String>,
}

impl DeviceRecord {
    pub fn new(machine_name: impl Into<String>, sim_number: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            machine_name: machine_name.into(),
            sim_number: sim_number.into(),
            status: DEFAULT_STATUS.to_string(),
            sensor_status: "None".to_string(),
            location: "None".to_string(),
            server_connection: false,
            last_status_update: None,
            phone_book: Vec::new(),
        }
    }

    /// Applies a partial update in place. Absent fields are left untouched.
    pub fn apply(&mut self, update: &DeviceUpdate) {
        self.last_status_update = Some(update.last_status_update);
        if let Some(status) = &update.status {
            self.status = status.clone();
        }
        if let Some(sensor_status) = &update.sensor_status {
            self.sensor_status = sensor_status.clone();
        }
        if let Some(location) = &update.location {
            self.location = location.clone();
        }
        if let Some(phone_book) = &update.phone_book {
            self.phone_book = phone_book.clone();
        }
    }
}

/// Partial update carried by a status report
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceUpdate {
    pub last_status_update: DateTime<Utc>,
    pub status: Option<String>,
    pub sensor_status: Option<String>,
    pub location: Option<String>,
    pub phone_book: Option<Vec<String>>,
}

/// Operational record produced by a finished job
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TelemetryRecord {
    pub id: Uuid,
    pub device_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub fuel_consumption: f64,
    pub pressure: f64,
    pub process_time: f64,
    pub location: String,
}

/// REST API response wrapper
#[derive(Debug, Serialize)]
pub struct TelemetryResponse {
    pub data: Vec<TelemetryRecord>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_device_defaults() {
        let device = DeviceRecord::new("press-1", "0771234567");
        assert_eq!(device.status, DEFAULT_STATUS);
        assert_eq!(device.sensor_status, "None");
        assert!(!device.server_connection);
        assert!(device.last_status_update.is_none());
        assert!(device.phone_book.is_empty());
    }

    #[test]
    fn test_apply_keeps_absent_fields() {
        let mut device = DeviceRecord::new("press-1", "0771234567");
        device.location = "Yard".to_string();
        let now = Utc::now();

        device.apply(&DeviceUpdate {
            last_status_update: now,
            status: Some("ONLINE".to_string()),
            sensor_status: None,
            location: None,
            phone_book: Some(vec!["111".to_string()]),
        });

        assert_eq!(device.status, "ONLINE");
        assert_eq!(device.sensor_status, "None");
        assert_eq!(device.location, "Yard");
        assert_eq!(device.phone_book, vec!["111".to_string()]);
        assert_eq!(device.last_status_update, Some(now));
    }
}
