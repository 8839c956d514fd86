// Shared test helpers
#![allow(dead_code)]

use scrapwatch::aggregator::RecordSink;
use scrapwatch::error::PersistError;
use scrapwatch::models::{AggregatedResult, ScrapEvent, ScrapRecord, format_timestamp_ms};
use std::sync::Mutex;

/// 2026-01-05T10:00:00.000Z
pub const T0: i64 = 1_767_607_200_000;

pub fn iso(ms: i64) -> String {
    format_timestamp_ms(ms)
}

pub fn event(machine_id: &str, scrap_index: i64, value: f64, at_ms: i64) -> ScrapEvent {
    ScrapEvent {
        machine_id: machine_id.into(),
        scrap_index,
        value,
        timestamp: iso(at_ms),
    }
}

pub fn aggregate(machine_id: &str, scrap_index: u32, sum: f64, avg: f64, at_ms: i64) -> AggregatedResult {
    AggregatedResult {
        machine_id: machine_id.into(),
        scrap_index,
        sum,
        avg,
        timestamp: iso(at_ms),
    }
}

/// Keeps every submitted record.
#[derive(Default)]
pub struct RecordingSink(pub Mutex<Vec<ScrapRecord>>);

impl RecordingSink {
    pub fn records(&self) -> Vec<ScrapRecord> {
        self.0.lock().unwrap().clone()
    }
}

impl RecordSink for RecordingSink {
    fn submit(&self, record: ScrapRecord) -> Result<(), PersistError> {
        self.0.lock().unwrap().push(record);
        Ok(())
    }
}

/// Always refuses, as if the writer had stopped.
pub struct ClosedSink;

impl RecordSink for ClosedSink {
    fn submit(&self, _record: ScrapRecord) -> Result<(), PersistError> {
        Err(PersistError::ChannelClosed)
    }
}
