#![cfg(feature = "metrics")]

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, register_histogram_vec, register_int_counter_vec};

/// Prometheus instrumentation for the reconcile loop, labeled by the
/// request's name/namespace and (where applicable) the action taken.
pub struct ControllerMetrics {
    pub reconcile_counter: IntCounterVec,
    pub action_counter: IntCounterVec,
    pub read_histogram: HistogramVec,
    pub write_histogram: HistogramVec,
}

impl ControllerMetrics {
    pub fn new(subsystem: &str) -> Self {
        let reconcile_counter = register_int_counter_vec!(
            Opts::new("reconcile_total", "Total number of reconciliations observed").subsystem(subsystem),
            &["name", "namespace"]
        )
        .expect("reconcile_total metric registration");

        let action_counter = register_int_counter_vec!(
            Opts::new("action_total", "Total number of reconcile actions taken, by kind").subsystem(subsystem),
            &["name", "namespace", "action"]
        )
        .expect("action_total metric registration");

        let read_histogram = register_histogram_vec!(
            HistogramOpts::new("read_duration_seconds", "Time spent determining the next action").subsystem(subsystem),
            &["name", "namespace"]
        )
        .expect("read_duration_seconds metric registration");

        let write_histogram = register_histogram_vec!(
            HistogramOpts::new("write_duration_seconds", "Time spent applying the chosen action").subsystem(subsystem),
            &["name", "namespace", "action"]
        )
        .expect("write_duration_seconds metric registration");

        ControllerMetrics {
            reconcile_counter,
            action_counter,
            read_histogram,
            write_histogram,
        }
    }
}
