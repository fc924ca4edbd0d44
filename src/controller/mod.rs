// Gauges keyed by container identity, refreshed by a full scan on every collect.

use crate::collector::{CollectError, Collector};
use crate::config::MetricsConfig;
use crate::models::{MetricsRecord, Snapshot};
use async_trait::async_trait;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

const LABELS: [&str; 4] = ["id", "name", "status", "state"];
const CPU_LABEL: &str = "cpu";

/// Anything that can produce a complete snapshot on demand.
#[async_trait]
pub trait MetricsCollector: Send + Sync {
    async fn collect(&self, cancel: &CancellationToken) -> Result<Snapshot, CollectError>;
}

#[async_trait]
impl MetricsCollector for Collector {
    async fn collect(&self, cancel: &CancellationToken) -> Result<Snapshot, CollectError> {
        Collector::collect(self, cancel).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("metrics registry: {0}")]
    Registry(#[from] prometheus::Error),
    #[error("rendered metrics are not utf-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

type LabelKey = [String; 4];

/// Series written by the last applied scan: identity labels -> number of per-cpu series.
#[derive(Default)]
struct ScanState {
    written: HashMap<LabelKey, usize>,
}

pub struct Controller {
    collector: Arc<dyn MetricsCollector>,
    registry: Registry,
    evict_stale: bool,
    scan: Mutex<ScanState>,

    online_cpus: GaugeVec,
    total_cpu_usage: GaugeVec,
    per_cpu_usage: GaugeVec,
    mem_usage: GaugeVec,
    max_mem_usage: GaugeVec,
    mem_limit: GaugeVec,
}

impl Controller {
    /// Builds the six gauge families and registers them in a registry owned by this controller.
    pub fn new(
        collector: Arc<dyn MetricsCollector>,
        config: &MetricsConfig,
    ) -> Result<Self, ControllerError> {
        debug!("creating metrics controller");
        let registry = Registry::new();
        let gauge = |name: &str, help: &str, labels: &[&str]| -> Result<GaugeVec, ControllerError> {
            let mut opts = Opts::new(name, help);
            if !config.namespace.is_empty() {
                opts = opts.namespace(config.namespace.as_str());
            }
            let vec = GaugeVec::new(opts, labels)?;
            registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        };

        let per_cpu_labels = [LABELS[0], LABELS[1], LABELS[2], LABELS[3], CPU_LABEL];
        let online_cpus = gauge("online_cpus", "Online CPUs", &LABELS)?;
        let total_cpu_usage = gauge("total_cpu_usage", "Total CPU usage", &LABELS)?;
        let per_cpu_usage = gauge("per_cpu_usage", "Per CPU usage", &per_cpu_labels)?;
        let mem_usage = gauge("mem_usage", "Memory usage", &LABELS)?;
        let max_mem_usage = gauge("max_mem_usage", "Maximum memory usage", &LABELS)?;
        let mem_limit = gauge("mem_limit", "Memory limit", &LABELS)?;

        Ok(Self {
            collector,
            registry,
            evict_stale: config.evict_stale,
            scan: Mutex::new(ScanState::default()),
            online_cpus,
            total_cpu_usage,
            per_cpu_usage,
            mem_usage,
            max_mem_usage,
            mem_limit,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Scan and fold the snapshot into the gauges. On error nothing is updated.
    /// Concurrent calls are serialized so their updates never interleave.
    pub async fn collect(&self, cancel: &CancellationToken) -> Result<(), CollectError> {
        let mut scan = self.scan.lock().await;
        debug!("collecting metrics");
        let snapshot = self.collector.collect(cancel).await.inspect_err(|e| {
            error!(error = %e, "failed to collect metrics");
        })?;

        let mut written = HashMap::with_capacity(snapshot.len());
        for record in &snapshot {
            debug!(container_id = %record.id, "updating metrics for container");
            self.apply(record);
            let key = record.labels().map(str::to_string);
            written.insert(key, record.reading.per_cpu_usage.len());
        }

        if self.evict_stale {
            self.evict(&scan.written, &written);
        }
        scan.written = written;

        debug!(containers = snapshot.len(), "metrics updated");
        Ok(())
    }

    fn apply(&self, record: &MetricsRecord) {
        let labels = record.labels();
        let r = &record.reading;

        self.online_cpus
            .with_label_values(&labels)
            .set(r.online_cpus as f64);
        self.total_cpu_usage
            .with_label_values(&labels)
            .set(r.total_cpu_usage as f64);
        for (cpu, usage) in r.per_cpu_usage.iter().enumerate() {
            let cpu = cpu.to_string();
            let [id, name, status, state] = labels;
            self.per_cpu_usage
                .with_label_values(&[id, name, status, state, cpu.as_str()])
                .set(*usage as f64);
        }

        self.mem_usage
            .with_label_values(&labels)
            .set(r.mem_usage as f64);
        self.max_mem_usage
            .with_label_values(&labels)
            .set(r.max_mem_usage as f64);
        self.mem_limit
            .with_label_values(&labels)
            .set(r.mem_limit as f64);
    }

    /// Remove series present after the previous scan but not written by this one.
    fn evict(&self, previous: &HashMap<LabelKey, usize>, current: &HashMap<LabelKey, usize>) {
        for (key, &prev_cpus) in previous {
            let [id, name, status, state] = key.each_ref().map(String::as_str);
            let labels = [id, name, status, state];
            let kept_cpus = match current.get(key) {
                Some(&cpus) => cpus,
                None => {
                    for gauge in [
                        &self.online_cpus,
                        &self.total_cpu_usage,
                        &self.mem_usage,
                        &self.max_mem_usage,
                        &self.mem_limit,
                    ] {
                        // Absent series are not an error here.
                        let _ = gauge.remove_label_values(&labels);
                    }
                    debug!(container_id = %id, "evicted stale series");
                    0
                }
            };
            for cpu in kept_cpus..prev_cpus {
                let cpu = cpu.to_string();
                let _ = self
                    .per_cpu_usage
                    .remove_label_values(&[id, name, status, state, cpu.as_str()]);
            }
        }
    }

    /// Current gauge state in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}
