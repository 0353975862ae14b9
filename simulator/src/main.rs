mod device;

use chrono::Utc;
use clap::Parser;
use device::{parse_poll_body, SimDevice};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Simulated cellular field devices talking to the relay
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Relay endpoint devices poll and report to
    #[arg(long, env = "RELAY_URL", default_value = "http://localhost:5000/api/esp32data")]
    relay_url: String,

    /// SIM numbers of the simulated devices
    #[arg(long, env = "SIM_NUMBERS", value_delimiter = ',', default_value = "0771000001")]
    sims: Vec<String>,

    /// Seconds between polls
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 10)]
    poll_interval: u64,

    /// Chance per poll cycle that a device reports a finished job
    #[arg(long, env = "JOB_PROBABILITY", default_value_t = 0.2, value_parser = parse_probability)]
    job_probability: f64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("Starting device simulator");
    info!(
        "Relay: {}, devices: {}, poll interval: {}s",
        args.relay_url,
        args.sims.len(),
        args.poll_interval
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|e| {
            error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        });

    let mut handles = Vec::new();
    for (i, sim) in args.sims.iter().enumerate() {
        let device = SimDevice::new(sim.clone(), format!("site-{}", i + 1));
        let client = client.clone();
        let url = args.relay_url.clone();
        let interval = Duration::from_secs(args.poll_interval.max(1));
        let job_probability = args.job_probability;
        handles.push(tokio::spawn(run_device(
            client,
            url,
            device,
            interval,
            job_probability,
        )));
    }

    tokio::select! {
        _ = wait_for_devices(handles) => {
            error!("All device tasks terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }
}

/// Accepts a finite probability in `0.0..=1.0`
fn parse_probability(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|e| format!("{}", e))?;
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(format!("{} is not a probability between 0 and 1", raw));
    }
    Ok(value)
}

async fn wait_for_devices(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Device task panicked: {}", e);
        }
    }
}

async fn run_device(
    client: reqwest::Client,
    url: String,
    mut device: SimDevice,
    interval: Duration,
    job_probability: f64,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;

        match poll(&client, &url, &device.sim_number).await {
            Ok(body) => {
                for command in parse_poll_body(&body) {
                    let age = command
                        .queued_at
                        .map(|t| (Utc::now() - t).num_seconds())
                        .unwrap_or_default();
                    info!(
                        "[{}] command '{}' (queued {}s ago)",
                        device.sim_number, command.text, age
                    );
                    if !device.apply(&command.text) {
                        warn!("[{}] unsupported command: {}", device.sim_number, command.text);
                    }
                }
            }
            Err(e) => {
                warn!("[{}] poll failed: {}", device.sim_number, e);
                continue;
            }
        }

        if device.status_requested {
            let report = device.status_report();
            if let Err(e) = client.post(&url).form(&report).send().await {
                warn!("[{}] status report failed: {}", device.sim_number, e);
            } else {
                debug!("[{}] status reported", device.sim_number);
            }
        }

        let job_done = rand::thread_rng().gen_bool(job_probability);
        if job_done {
            let report = device.job_report(&mut rand::thread_rng());
            if let Err(e) = client.post(&url).form(&report).send().await {
                warn!("[{}] job report failed: {}", device.sim_number, e);
            } else {
                debug!("[{}] job reported", device.sim_number);
            }
        }
    }
}

async fn poll(client: &reqwest::Client, url: &str, sim: &str) -> reqwest::Result<String> {
    client
        .get(url)
        .query(&[("simNumber", sim)])
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
}
