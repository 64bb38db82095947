//! Prometheus metrics for the bridge validator
//!
//! Exposed on the /metrics endpoint for scraping.

#![allow(dead_code)]

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_gauge_vec, register_int_counter, register_int_counter_vec, Gauge,
    GaugeVec, IntCounter, IntCounterVec,
};

lazy_static! {
    // Watcher metrics
    pub static ref IMPORT_EVENTS_OBSERVED: IntCounter = register_int_counter!(
        "validator_import_events_observed_total",
        "Import requests observed on the destination chain"
    ).unwrap();

    pub static ref DUPLICATE_EVENTS_SKIPPED: IntCounter = register_int_counter!(
        "validator_duplicate_events_skipped_total",
        "Import requests skipped because the burn hash was already in flight"
    ).unwrap();

    // Pipeline metrics
    pub static ref ITEMS_PROMOTED: IntCounter = register_int_counter!(
        "validator_items_promoted_total",
        "Items promoted from validation to attestation"
    ).unwrap();

    pub static ref ITEMS_RESCHEDULED: IntCounterVec = register_int_counter_vec!(
        "validator_items_rescheduled_total",
        "Items pushed back for another attempt",
        &["queue"]
    ).unwrap();

    pub static ref ITEMS_DEAD_LETTERED: IntCounterVec = register_int_counter_vec!(
        "validator_items_dead_lettered_total",
        "Items moved to the dead-letter table",
        &["queue", "reason"]
    ).unwrap();

    pub static ref REFUTATIONS_SUBMITTED: IntCounterVec = register_int_counter_vec!(
        "validator_refutations_submitted_total",
        "Refutation votes submitted",
        &["status"]
    ).unwrap();

    pub static ref ATTESTATIONS_SUBMITTED: IntCounterVec = register_int_counter_vec!(
        "validator_attestations_submitted_total",
        "Attestation votes submitted",
        &["status"]
    ).unwrap();

    pub static ref HASHES_CLAIMED: IntCounter = register_int_counter!(
        "validator_hashes_claimed_total",
        "Burn hashes observed reaching the claimed state"
    ).unwrap();

    // Queue depths
    pub static ref QUEUE_DEPTH: GaugeVec = register_gauge_vec!(
        "validator_queue_depth",
        "Items currently available per queue",
        &["queue"]
    ).unwrap();

    pub static ref DEAD_LETTER_COUNT: Gauge = register_gauge!(
        "validator_dead_letter_count",
        "Rows in the dead-letter table"
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "validator_up",
        "Whether the validator is up and running"
    ).unwrap();

    pub static ref CONSECUTIVE_FAILURES: GaugeVec = register_gauge_vec!(
        "validator_consecutive_failures",
        "Consecutive whole-tick failures per loop (circuit breaker)",
        &["loop"]
    ).unwrap();

    pub static ref LAST_SUCCESSFUL_POLL: GaugeVec = register_gauge_vec!(
        "validator_last_successful_poll_timestamp",
        "Unix timestamp of the last successful tick",
        &["loop"]
    ).unwrap();
}

/// Record a vote submission outcome
pub fn record_attestation_submitted(success: bool) {
    let status = if success { "success" } else { "failure" };
    ATTESTATIONS_SUBMITTED.with_label_values(&[status]).inc();
}

pub fn record_refutation_submitted(success: bool) {
    let status = if success { "success" } else { "failure" };
    REFUTATIONS_SUBMITTED.with_label_values(&[status]).inc();
}

pub fn record_rescheduled(queue: &str) {
    ITEMS_RESCHEDULED.with_label_values(&[queue]).inc();
}

pub fn record_dead_lettered(queue: &str, reason: &str) {
    ITEMS_DEAD_LETTERED.with_label_values(&[queue, reason]).inc();
}

pub fn set_queue_depth(queue: &str, depth: u64) {
    QUEUE_DEPTH.with_label_values(&[queue]).set(depth as f64);
}

pub fn set_consecutive_failures(loop_name: &str, count: u32) {
    CONSECUTIVE_FAILURES
        .with_label_values(&[loop_name])
        .set(count as f64);
}

pub fn record_successful_poll(loop_name: &str) {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs_f64();
    LAST_SUCCESSFUL_POLL
        .with_label_values(&[loop_name])
        .set(timestamp);
}
