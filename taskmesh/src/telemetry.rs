//! Telemetry for message receipt and task execution.
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::Counter;
use prometheus::CounterVec;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::Opts;

/// Total number of messages received from transports.
pub static RECEIVE_COUNT: Lazy<Counter> = Lazy::new(|| {
    Counter::new(
        "taskmesh_receive_count",
        "Total number of messages received from transports",
    )
    .expect("failed to initialise RECEIVE_COUNT counter")
});

/// Number of received messages that failed to decode.
pub static RECEIVE_ERR: Lazy<Counter> = Lazy::new(|| {
    Counter::new(
        "taskmesh_receive_error",
        "Number of received messages that failed to decode",
    )
    .expect("failed to initialise RECEIVE_ERR counter")
});

/// Total number of task executions.
pub static EXEC_COUNT: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        Opts::new("taskmesh_execute_count", "Total number of task executions"),
        &["task"],
    )
    .expect("failed to initialise EXEC_COUNT counter")
});

/// Number of task executions that resulted in error.
pub static EXEC_ERR: Lazy<CounterVec> = Lazy::new(|| {
    CounterVec::new(
        Opts::new(
            "taskmesh_execute_error",
            "Number of task executions that resulted in error",
        ),
        &["task"],
    )
    .expect("failed to initialise EXEC_ERR counter")
});

/// Observed duration (in seconds) of task executions.
pub static EXEC_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "taskmesh_execute_duration",
            "Observed duration (in seconds) of task executions",
        ),
        &["task"],
    )
    .expect("failed to initialise EXEC_DURATION histogram")
});

/// Ensure metrics are registered only once.
static METRICS_REGISTERED: AtomicBool = AtomicBool::new(false);

/// The first time this method is called it will register the engine metrics.
pub fn register_metrics(reg: &prometheus::Registry) -> Result<()> {
    // Skip registration if already done before.
    if METRICS_REGISTERED.swap(true, Ordering::AcqRel) {
        return Ok(());
    }

    let collectors: [Box<dyn prometheus::core::Collector>; 5] = [
        Box::new(RECEIVE_COUNT.clone()),
        Box::new(RECEIVE_ERR.clone()),
        Box::new(EXEC_COUNT.clone()),
        Box::new(EXEC_ERR.clone()),
        Box::new(EXEC_DURATION.clone()),
    ];
    for collector in collectors {
        reg.register(collector)?;
    }
    Ok(())
}
