//! Synthetic measurement generator.
//!
//! The real measurement source is the host application's adapter/routing
//! framework, which is out of this crate's scope (see the crate-level
//! docs). This module exists so `sttp-publisher` is runnable end to end
//! without one: it registers a handful of signals in a [`MetadataStore`]
//! and periodically publishes sine-wave samples for them over a broadcast
//! sender, standing in for a real data source in demos and integration
//! tests.

use std::sync::Arc;
use std::time::Duration;

use sttp_core::{Measurement, MeasurementKey, MeasurementValue, StateFlags, Tick};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::metadata_store::MetadataStore;

/// One synthetic signal this generator publishes.
struct DemoSignal {
    key: MeasurementKey,
    amplitude: f64,
    period_secs: f64,
}

const DEMO_SOURCE: &str = "DEMO";

/// `(tag, signal_type, amplitude, period_secs)` for each synthetic signal.
const DEMO_SIGNALS: [(&str, &str, f64, f64); 3] =
    [("DEMO:FREQ", "FREQ", 60.0, 10.0), ("DEMO:VOLT", "VPHM", 120.0, 7.0), ("DEMO:ANGLE", "VPHA", 180.0, 13.0)];

/// Registers a handful of synthetic signals in `store` and returns their
/// identities for [`run`] to drive.
pub fn register_demo_signals(store: &MetadataStore) -> Vec<Uuid> {
    DEMO_SIGNALS
        .iter()
        .enumerate()
        .map(|(i, (tag, signal_type, _amplitude, _period))| {
            let signal_id = Uuid::from_u128(1_000 + i as u128);
            store.register_measurement(signal_id, DEMO_SOURCE, i as u64 + 1, tag, signal_type);
            signal_id
        })
        .collect()
}

/// Runs forever, publishing a batch of synthetic samples every `interval`.
pub async fn run(
    tx: broadcast::Sender<Arc<Vec<Measurement>>>,
    store: Arc<MetadataStore>,
    signal_ids: Vec<Uuid>,
    interval: Duration,
) {
    let signals: Vec<DemoSignal> = signal_ids
        .into_iter()
        .enumerate()
        .filter_map(|(i, signal_id)| {
            let key = store.intern_table().lookup_by_signal_id(signal_id)?;
            let (_, _, amplitude, period_secs) = DEMO_SIGNALS[i];
            Some(DemoSignal { key, amplitude, period_secs })
        })
        .collect();

    let mut elapsed = 0.0f64;
    let step = interval.as_secs_f64();
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;
        elapsed += step;

        let batch: Vec<Measurement> = signals
            .iter()
            .map(|signal| {
                let phase = 2.0 * std::f64::consts::PI * elapsed / signal.period_secs;
                let value = signal.amplitude + signal.amplitude * 0.05 * phase.sin();
                Measurement {
                    key: signal.key.clone(),
                    timestamp: Tick::now(),
                    value: MeasurementValue::Scalar(value),
                    state_flags: StateFlags::empty(),
                }
            })
            .collect();

        // No subscribers yet is normal at startup; ignore the send failure.
        let _ = tx.send(Arc::new(batch));
    }
}
