use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref REPORTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("relay_reports_total", "Inbound reports by classified kind"),
        &["kind"]
    )
    .unwrap();
    pub static ref COMMANDS_ENQUEUED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_commands_enqueued_total",
        "Total commands queued for devices"
    ))
    .unwrap();
    pub static ref COMMANDS_EVICTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_commands_evicted_total",
        "Total queued commands dropped because a device queue was full"
    ))
    .unwrap();
    pub static ref POLLS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_polls_total",
        "Total device polls served"
    ))
    .unwrap();
    pub static ref COMMANDS_DELIVERED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_commands_delivered_total",
        "Total commands handed to polling devices"
    ))
    .unwrap();
    pub static ref UNKNOWN_DEVICE_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_unknown_device_total",
        "Total status or job reports for SIM numbers with no registered device"
    ))
    .unwrap();
    pub static ref COLLABORATOR_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_collaborator_failures_total",
        "Total registry or telemetry store calls that failed"
    ))
    .unwrap();
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "relay_db_failures_total",
        "Total database query failures"
    ))
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(REPORTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COMMANDS_ENQUEUED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COMMANDS_EVICTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(POLLS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COMMANDS_DELIVERED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UNKNOWN_DEVICE_TOTAL.clone()))?;
    REGISTRY.register(Box::new(COLLABORATOR_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DB_FAILURES_TOTAL.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
