use crate::model::{DeviceUpdate, UNKNOWN_LOCATION};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Untyped key/value report as posted by a device or an operator
pub type Fields = Map<String, Value>;

pub const CMD_DIR_UPDATE: &str = "dir_update";
pub const CMD_GET_STATUS: &str = "get_status";
pub const CMD_STATUS_UPDATE: &str = "STATUS_UPDATE";
pub const CMD_JOB: &str = "JOB";

/// Queued in answer to a `get_status` request
pub const GET_STATUS_COMMAND: &str = "cmd=get_status";

/// Job figures reported by a device once a run completes
#[derive(Debug, Clone, PartialEq)]
pub struct JobFigures {
    pub fuel_consumption: f64,
    pub pressure: f64,
    pub process_time: f64,
    pub location: String,
}

/// An inbound report resolved to exactly one kind
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    /// Free text to forward verbatim to the device
    Message { device_id: String, text: String },
    /// Phone directory push, already flattened to the device's command form
    DirectoryUpdate { device_id: String, command: String },
    /// Ask the device to report its status on its next poll
    StatusPoll { device_id: String },
    /// Status reported back by the device
    StatusReport {
        sim_number: String,
        update: DeviceUpdate,
    },
    /// Telemetry for a completed job
    JobReport { sim_number: String, job: JobFigures },
    Unrecognized { reason: &'static str },
}

impl Report {
    /// Resolves the report kind. Shapes are checked in a fixed order and the
    /// first match wins, so a `message` field takes precedence over any `cmd`.
    pub fn classify(fields: &Fields, default_id: &str, received_at: DateTime<Utc>) -> Self {
        let target = || text(fields, "simNumber").unwrap_or_else(|| default_id.to_string());
        let cmd = text(fields, "cmd");

        if let Some(message) = text(fields, "message") {
            return Report::Message {
                device_id: target(),
                text: message,
            };
        }

        match cmd.as_deref() {
            Some(CMD_DIR_UPDATE) => match text(fields, "count") {
                Some(count) => Report::DirectoryUpdate {
                    device_id: target(),
                    command: directory_command(fields, &count),
                },
                None => Report::Unrecognized {
                    reason: "dir_update without count",
                },
            },
            Some(CMD_GET_STATUS) => Report::StatusPoll {
                device_id: target(),
            },
            Some(CMD_STATUS_UPDATE) => match text(fields, "simNumber") {
                Some(sim_number) => Report::StatusReport {
                    sim_number,
                    update: DeviceUpdate {
                        last_status_update: received_at,
                        status: text(fields, "status"),
                        sensor_status: text(fields, "sensorStatus"),
                        location: text(fields, "location"),
                        phone_book: fields.get("phoneBook").and_then(phone_book),
                    },
                },
                None => Report::Unrecognized {
                    reason: "STATUS_UPDATE without simNumber",
                },
            },
            Some(CMD_JOB) => match text(fields, "simNumber") {
                Some(sim_number) => Report::JobReport {
                    sim_number,
                    job: JobFigures {
                        fuel_consumption: number(fields, "fuelConsumption"),
                        pressure: number(fields, "pressure"),
                        process_time: number(fields, "processTime"),
                        location: text(fields, "location")
                            .unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
                    },
                },
                None => Report::Unrecognized {
                    reason: "JOB without simNumber",
                },
            },
            Some(_) => Report::Unrecognized {
                reason: "unknown cmd",
            },
            None => Report::Unrecognized {
                reason: "no message or cmd field",
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Report::Message { .. } => "message",
            Report::DirectoryUpdate { .. } => "dir_update",
            Report::StatusPoll { .. } => "get_status",
            Report::StatusReport { .. } => "status_update",
            Report::JobReport { .. } => "job",
            Report::Unrecognized { .. } => "unrecognized",
        }
    }
}

/// Reads a scalar field as text. Empty strings, nulls and containers count as absent.
fn text(fields: &Fields, key: &str) -> Option<String> {
    match fields.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn number(fields: &Fields, key: &str) -> f64 {
    match fields.get(key) {
        Some(Value::Number(n)) => n.as_f64().filter(|v| v.is_finite()).unwrap_or(0.0),
        Some(Value::String(s)) => parse_float_prefix(s),
        _ => 0.0,
    }
}

/// Parses the longest leading decimal number, so "12.5L" reads as 12.5.
/// Anything without a numeric prefix reads as 0.
fn parse_float_prefix(raw: &str) -> f64 {
    let s = raw.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    let mut seen_digit = false;
    let mut seen_dot = false;
    while let Some(&b) = bytes.get(end) {
        match b {
            b'0'..=b'9' => seen_digit = true,
            b'.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end += 1;
    }
    if !seen_digit {
        return 0.0;
    }
    // exponent only counts when followed by digits
    if let Some(b'e') | Some(b'E') = bytes.get(end) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+') | Some(b'-')) {
            exp_end += 1;
        }
        let digits_start = exp_end;
        while matches!(bytes.get(exp_end), Some(b'0'..=b'9')) {
            exp_end += 1;
        }
        if exp_end > digits_start {
            end = exp_end;
        }
    }
    s[..end]
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Reads the leading digits of a count, so "2.5" and "2abc" both read as 2.
/// Negative or non-numeric counts read as 0.
fn parse_count_prefix(raw: &str) -> u64 {
    let s = raw.trim_start();
    let s = s.strip_prefix('+').unwrap_or(s);
    s.bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0u64, |acc, b| acc.saturating_mul(10).saturating_add(u64::from(b - b'0')))
}

/// Builds `cmd=dir_update&count=<n>&number1=..` from the indexed fields that
/// are present, in index order, up to `count`.
fn directory_command(fields: &Fields, count: &str) -> String {
    let mut command = format!("cmd={}&count={}", CMD_DIR_UPDATE, count);
    let limit = parse_count_prefix(count);

    let mut numbers: Vec<(u64, String)> = fields
        .keys()
        .filter_map(|key| {
            let index = key.strip_prefix("number")?.parse::<u64>().ok()?;
            if index == 0 || index > limit || key != &format!("number{}", index) {
                return None;
            }
            text(fields, key).map(|value| (index, value))
        })
        .collect();
    numbers.sort_by_key(|(index, _)| *index);

    for (index, value) in numbers {
        command.push_str(&format!("&number{}={}", index, value));
    }
    command
}

/// Normalizes the reported phone book into a list of numbers.
fn phone_book(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::Array(items) => Some(items.iter().map(value_text).collect()),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(items)) => Some(items.iter().map(value_text).collect()),
            _ => Some(vec![raw.clone()]),
        },
        other => Some(vec![value_text(other)]),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
