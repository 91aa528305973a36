use foliage::{BatchId, InstanceSink, Transform};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::collections::HashMap;

pub struct SimMetrics {
    pub registry: Registry,
    pub cycles_total: IntCounter,
    pub cycles_failed_total: IntCounter,
    pub instances_generated_total: IntCounter,
    pub instances_live: IntGauge,
    pub recenters_total: IntCounter,
}

impl SimMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("foliage_sim".into()), None)?;

        macro_rules! reg {
            ($m:expr) => {{
                let metric = $m?;
                registry.register(Box::new(metric.clone()))?;
                metric
            }};
        }

        Ok(Self {
            cycles_total: reg!(IntCounter::new("cycles_total", "Capture cycles committed")),
            cycles_failed_total: reg!(IntCounter::new(
                "cycles_failed_total",
                "Capture cycles that failed readback or processing"
            )),
            instances_generated_total: reg!(IntCounter::new(
                "instances_generated_total",
                "Instances queued on batches by committed cycles"
            )),
            instances_live: reg!(IntGauge::new(
                "instances_live",
                "Instances currently committed to batches"
            )),
            recenters_total: reg!(IntCounter::new(
                "recenters_total",
                "Times the capture followed the camera"
            )),
            registry,
        })
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

/// Tracks live instances per batch and mirrors the total into a gauge.
pub struct LiveInstanceSink {
    gauge: IntGauge,
    live: HashMap<BatchId, usize>,
}

impl LiveInstanceSink {
    pub fn new(gauge: IntGauge) -> Self {
        Self {
            gauge,
            live: HashMap::new(),
        }
    }

    fn publish(&self) {
        self.gauge.set(self.live.values().sum::<usize>() as i64);
    }
}

impl InstanceSink for LiveInstanceSink {
    fn batch_created(&mut self, batch: BatchId, descriptor: &foliage::GeometryDescriptor) {
        tracing::debug!(%batch, mesh = ?descriptor.mesh, collides = descriptor.collides_with_world, "Batch created");
        self.live.insert(batch, 0);
    }

    fn batch_destroyed(&mut self, batch: BatchId) {
        self.live.remove(&batch);
        self.publish();
    }

    fn instances_cleared(&mut self, batch: BatchId) {
        self.live.insert(batch, 0);
        self.publish();
    }

    fn instances_added(&mut self, batch: BatchId, transforms: &[Transform]) {
        *self.live.entry(batch).or_insert(0) += transforms.len();
        self.publish();
    }

    fn instances_updated(&mut self, batch: BatchId, transforms: &[Transform]) {
        self.live.insert(batch, transforms.len());
        self.publish();
    }
}
