use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;

/// Command decoded from a poll response
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub text: String,
    pub queued_at: Option<DateTime<Utc>>,
}

/// Decodes `message1=..&timestamp1=..` pairs. `status=no_messages` yields nothing.
pub fn parse_poll_body(body: &str) -> Vec<Command> {
    let mut messages: Vec<(usize, String)> = Vec::new();
    let mut timestamps: Vec<(usize, DateTime<Utc>)> = Vec::new();

    for pair in body.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let Ok(value) = urlencoding::decode(value) else {
            continue;
        };
        if let Some(index) = key.strip_prefix("message").and_then(|i| i.parse().ok()) {
            messages.push((index, value.into_owned()));
        } else if let Some(index) = key.strip_prefix("timestamp").and_then(|i| i.parse().ok()) {
            if let Ok(ts) = DateTime::parse_from_rfc3339(&value) {
                timestamps.push((index, ts.with_timezone(&Utc)));
            }
        }
    }

    messages.sort_by_key(|(index, _)| *index);
    messages
        .into_iter()
        .map(|(index, text)| Command {
            text,
            queued_at: timestamps
                .iter()
                .find(|(i, _)| *i == index)
                .map(|(_, ts)| *ts),
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub cmd: &'static str,
    #[serde(rename = "simNumber")]
    pub sim_number: String,
    pub status: String,
    #[serde(rename = "sensorStatus")]
    pub sensor_status: String,
    pub location: String,
    #[serde(rename = "phoneBook")]
    pub phone_book: String,
}

#[derive(Debug, Serialize)]
pub struct JobReport {
    pub cmd: &'static str,
    #[serde(rename = "simNumber")]
    pub sim_number: String,
    #[serde(rename = "fuelConsumption")]
    pub fuel_consumption: String,
    pub pressure: String,
    #[serde(rename = "processTime")]
    pub process_time: String,
    pub location: String,
}

/// State a simulated field device keeps between polls
#[derive(Debug, Clone)]
pub struct SimDevice {
    pub sim_number: String,
    pub phone_book: Vec<String>,
    pub location: String,
    pub status_requested: bool,
}

impl SimDevice {
    pub fn new(sim_number: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            sim_number: sim_number.into(),
            phone_book: Vec::new(),
            location: location.into(),
            status_requested: false,
        }
    }

    /// Executes one command. Returns false for commands the firmware does not know.
    pub fn apply(&mut self, command: &str) -> bool {
        let fields: Vec<(&str, &str)> = command
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .collect();
        let get = |key: &str| fields.iter().find(|(k, _)| *k == key).map(|(_, v)| *v);

        match get("cmd") {
            Some("get_status") => {
                self.status_requested = true;
                true
            }
            Some("dir_update") => {
                let count: usize = get("count").and_then(|c| c.parse().ok()).unwrap_or(0);
                self.phone_book = (1..=count)
                    .filter_map(|i| get(&format!("number{}", i)))
                    .map(str::to_string)
                    .collect();
                true
            }
            // free text is shown on the device display
            None if !command.is_empty() => true,
            _ => false,
        }
    }

    /// Status report, clearing any pending status request
    pub fn status_report(&mut self) -> StatusReport {
        self.status_requested = false;
        StatusReport {
            cmd: "STATUS_UPDATE",
            sim_number: self.sim_number.clone(),
            status: "ONLINE".to_string(),
            sensor_status: "OK".to_string(),
            location: self.location.clone(),
            phone_book: serde_json::to_string(&self.phone_book)
                .unwrap_or_else(|_| "[]".to_string()),
        }
    }

    pub fn job_report(&self, rng: &mut impl Rng) -> JobReport {
        JobReport {
            cmd: "JOB",
            sim_number: self.sim_number.clone(),
            fuel_consumption: format!("{:.2}", rng.gen_range(0.5..12.0)),
            pressure: format!("{:.1}", rng.gen_range(80.0..160.0)),
            process_time: rng.gen_range(30..900).to_string(),
            location: self.location.clone(),
        }
    }
}
