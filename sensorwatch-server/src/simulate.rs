// Sensorwatch Server - Simulated sensors
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Simulated sensors for demos and local testing.
//!
//! Each cycle submits one uniform random reading per sensor through the
//! synchronous gateway. Occasionally one sensor is pushed 2 to 10 units
//! outside its range so threshold alerts fire.

use rand::Rng;
use sensorwatch::{Pipeline, RawReading, RejectionReason};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A simulated sensor and the range it normally reports
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedSensor {
    pub id: &'static str,
    pub unit: &'static str,
    pub min: f64,
    pub max: f64,
}

/// Two rooms with a temperature and a humidity sensor each
pub const REFERENCE_SENSORS: [SimulatedSensor; 4] = [
    SimulatedSensor {
        id: "temperature_living_room",
        unit: "°C",
        min: 18.0,
        max: 32.0,
    },
    SimulatedSensor {
        id: "temperature_bedroom",
        unit: "°C",
        min: 18.0,
        max: 25.0,
    },
    SimulatedSensor {
        id: "humidity_living_room",
        unit: "%",
        min: 30.0,
        max: 90.0,
    },
    SimulatedSensor {
        id: "humidity_bedroom",
        unit: "%",
        min: 35.0,
        max: 75.0,
    },
];

/// Configuration for the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Pause between cycles.
    pub interval: Duration,
    /// Probability of an out-of-range reading per cycle.
    pub excursion_probability: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            excursion_probability: 0.1,
        }
    }
}

/// Random value inside the sensor's range, rounded to two decimals
pub fn normal_value<R: Rng>(rng: &mut R, sensor: &SimulatedSensor) -> f64 {
    round2(rng.gen_range(sensor.min..=sensor.max))
}

/// Random value 2 to 10 units above max or below min
pub fn excursion_value<R: Rng>(rng: &mut R, sensor: &SimulatedSensor) -> f64 {
    let offset = rng.gen_range(2.0..=10.0);
    if rng.gen_bool(0.5) {
        round2(sensor.max + offset)
    } else {
        round2(sensor.min - offset)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Simulator driving the pipeline until it shuts down
pub struct Simulator {
    pipeline: Arc<Pipeline>,
    config: SimulatorConfig,
    sent: Arc<AtomicU64>,
}

impl Simulator {
    pub fn new(pipeline: Arc<Pipeline>, config: SimulatorConfig) -> Self {
        Self {
            pipeline,
            config,
            sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Readings submitted so far.
    pub fn sent(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.sent)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        info!(
            sensors = REFERENCE_SENSORS.len(),
            interval_ms = self.config.interval.as_millis() as u64,
            "sensor simulator started"
        );

        loop {
            match self.cycle().await {
                Ok(()) => {}
                Err(RejectionReason::Unavailable) => break,
                Err(reason) => warn!(reason = %reason, "simulated reading rejected"),
            }
            tokio::time::sleep(self.config.interval).await;
        }

        info!(sent = self.sent.load(Ordering::Relaxed), "sensor simulator stopped");
    }

    /// Submit one reading per sensor, plus an occasional excursion
    async fn cycle(&self) -> Result<(), RejectionReason> {
        // ThreadRng is not Send, so values are drawn before any await
        let (readings, excursion) = {
            let mut rng = rand::thread_rng();
            let readings: Vec<(SimulatedSensor, f64)> = REFERENCE_SENSORS
                .iter()
                .map(|s| (s.clone(), normal_value(&mut rng, s)))
                .collect();
            let excursion = if rng.gen_bool(self.config.excursion_probability) {
                let sensor = &REFERENCE_SENSORS[rng.gen_range(0..REFERENCE_SENSORS.len())];
                Some((sensor.clone(), excursion_value(&mut rng, sensor)))
            } else {
                None
            };
            (readings, excursion)
        };

        for (sensor, value) in readings {
            self.submit(&sensor, value).await?;
        }
        if let Some((sensor, value)) = excursion {
            info!(sensor_id = sensor.id, value, "simulating out-of-range reading");
            self.submit(&sensor, value).await?;
        }
        Ok(())
    }

    async fn submit(&self, sensor: &SimulatedSensor, value: f64) -> Result<(), RejectionReason> {
        self.pipeline
            .submit(RawReading::new(sensor.id, value).with_unit(sensor.unit))
            .await?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        debug!(sensor_id = sensor.id, value, "simulated reading sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use sensorwatch::MemoryStorage;

    #[test]
    fn test_values_in_and_out_of_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for sensor in &REFERENCE_SENSORS {
            for _ in 0..100 {
                let v = normal_value(&mut rng, sensor);
                assert!(v >= sensor.min && v <= sensor.max);

                let e = excursion_value(&mut rng, sensor);
                assert!(e >= sensor.max + 2.0 || e <= sensor.min - 2.0);
                assert!(e <= sensor.max + 10.0 && e >= sensor.min - 10.0);
            }
        }
    }

    #[tokio::test]
    async fn test_simulator_feeds_pipeline() {
        let pipeline = Arc::new(
            sensorwatch::Pipeline::builder(Arc::new(MemoryStorage::new()))
                .start()
                .await
                .unwrap(),
        );
        let simulator = Simulator::new(
            Arc::clone(&pipeline),
            SimulatorConfig {
                interval: Duration::from_millis(5),
                excursion_probability: 0.0,
            },
        );
        let sent = simulator.sent();
        let handle = simulator.spawn();

        while sent.load(Ordering::Relaxed) < 8 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(pipeline.list_sensors().await.unwrap().len(), 4);

        pipeline.shutdown().await;
        handle.await.unwrap();
        assert!(pipeline.stats().accepted >= 8);
    }
}
