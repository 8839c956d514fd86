// Demo traffic: one random scrap event per interval, fed through the normal ingest path.

use rand::Rng;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::time::{Duration, interval};

use crate::config::SimulatorConfig;
use crate::models::{ScrapEvent, format_timestamp_ms};
use crate::pipeline::Pipeline;

/// Random machine from `machines`, index in `1..=max_index`, value in `1..=max_value`.
pub fn random_event(rng: &mut impl Rng, config: &SimulatorConfig, now_ms: i64) -> Option<ScrapEvent> {
    let machine_id = config.machines.choose(rng)?.clone();
    Some(ScrapEvent {
        machine_id,
        scrap_index: rng.gen_range(1..=config.max_index.max(1)) as i64,
        value: rng.gen_range(1..=config.max_value.max(1)) as f64,
        timestamp: format_timestamp_ms(now_ms),
    })
}

pub fn spawn(pipeline: Arc<Pipeline>, config: SimulatorConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            machines = ?config.machines,
            interval_ms = config.interval_ms,
            "Simulator started"
        );
        let mut tick = interval(Duration::from_millis(config.interval_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            let now_ms = chrono::Utc::now().timestamp_millis();
            let Some(event) = random_event(&mut rand::thread_rng(), &config, now_ms) else {
                tracing::warn!("simulator has no machines configured; stopping");
                break;
            };
            if let Err(e) = pipeline.process(&event) {
                tracing::warn!(error = %e, topic = %event.topic(), "simulated event rejected");
            }
        }
    })
}
