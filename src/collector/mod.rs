// Scan: list containers, read stats concurrently, normalize into a Snapshot.

mod stats;

pub use stats::ParseError;

use crate::config::CollectorConfig;
use crate::models::{Entity, MetricsRecord, Snapshot};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("docker api: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("encoding stats body: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("no stats returned for container {0}")]
    EmptyStats(String),
    #[error("{0}")]
    Unavailable(String),
}

/// Where containers and their raw stats come from.
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// All containers, running or not.
    async fn list_entities(&self) -> Result<Vec<Entity>, SourceError>;

    /// One stats reading for `id` as the raw JSON body the daemon returned.
    async fn read_stats(&self, id: &str) -> Result<Bytes, SourceError>;
}

/// Scan-fatal errors. Per-container failures never surface here.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("containers list is not received: {0}")]
    SourceUnavailable(#[source] SourceError),
    #[error("scan cancelled")]
    Cancelled,
}

/// Why a single container was left out of a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    #[error("reading stats: {0}")]
    Source(#[from] SourceError),
    #[error("parsing stats: {0}")]
    Parse(#[from] ParseError),
    #[error("stats read timed out after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

pub struct Collector {
    source: Arc<dyn EntitySource>,
    limiter: Option<Arc<Semaphore>>,
    stats_timeout: Duration,
}

impl Collector {
    pub fn new(source: Arc<dyn EntitySource>, config: &CollectorConfig) -> Self {
        let limiter = (config.max_concurrency > 0)
            .then(|| Arc::new(Semaphore::new(config.max_concurrency)));
        Self {
            source,
            limiter,
            stats_timeout: Duration::from_millis(config.stats_timeout_ms),
        }
    }

    /// Run one scan. Fails only when the listing fails or `cancel` fires before it returns;
    /// containers whose stats cannot be read or parsed are logged and omitted.
    pub async fn collect(&self, cancel: &CancellationToken) -> Result<Snapshot, CollectError> {
        debug!("collecting metrics");
        let entities = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CollectError::Cancelled),
            listed = self.source.list_entities() => listed.map_err(CollectError::SourceUnavailable)?,
        };
        debug!(count = entities.len(), "containers list received");

        let records = Arc::new(Mutex::new(Vec::with_capacity(entities.len())));
        let mut tasks = JoinSet::new();
        for entity in entities {
            let source = self.source.clone();
            let limiter = self.limiter.clone();
            let cancel = cancel.clone();
            let records = records.clone();
            let stats_timeout = self.stats_timeout;
            tasks.spawn(async move {
                let id = entity.id.clone();
                match collect_entity(source.as_ref(), entity, limiter, stats_timeout, &cancel).await
                {
                    Ok(record) => {
                        debug!(container_id = %id, "metrics collected");
                        records.lock().await.push(record);
                    }
                    Err(e) => {
                        warn!(container_id = %id, error = %e, "failed to collect metrics for container");
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "container metrics task did not complete");
            }
        }

        let snapshot = std::mem::take(&mut *records.lock().await);
        debug!(records = snapshot.len(), "metrics collection completed");
        Ok(snapshot)
    }
}

async fn collect_entity(
    source: &dyn EntitySource,
    entity: Entity,
    limiter: Option<Arc<Semaphore>>,
    stats_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<MetricsRecord, EntityError> {
    if !entity.lifecycle().is_running() {
        return Ok(MetricsRecord::idle(entity, Utc::now()));
    }

    let _permit = match limiter {
        Some(limiter) => tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EntityError::Cancelled),
            permit = limiter.acquire_owned() => Some(permit.map_err(|_| EntityError::Cancelled)?),
        },
        None => None,
    };

    let raw = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(EntityError::Cancelled),
        read = tokio::time::timeout(stats_timeout, source.read_stats(&entity.id)) => {
            read.map_err(|_| EntityError::Timeout(stats_timeout))??
        }
    };
    let reading = stats::parse_stats(&raw)?;
    Ok(MetricsRecord::new(entity, reading))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const RUNNING_STATS: &str = r#"{
        "read": "2024-05-01T12:00:00Z",
        "cpu_stats": { "online_cpus": 2, "cpu_usage": { "total_usage": 12345, "percpu_usage": [6000, 6345] } },
        "memory_stats": { "usage": 1048576, "max_usage": 1048576, "limit": 2097152 }
    }"#;

    #[derive(Default)]
    struct FakeSource {
        entities: Vec<Entity>,
        stats: HashMap<String, Result<&'static str, &'static str>>,
        fail_listing: bool,
        stall_stats: bool,
        stats_calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl EntitySource for FakeSource {
        async fn list_entities(&self) -> Result<Vec<Entity>, SourceError> {
            if self.fail_listing {
                return Err(SourceError::Unavailable("daemon down".into()));
            }
            Ok(self.entities.clone())
        }

        async fn read_stats(&self, id: &str) -> Result<Bytes, SourceError> {
            self.stats_calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            if self.stall_stats {
                std::future::pending::<()>().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match self.stats.get(id) {
                Some(&Ok(body)) => Ok(Bytes::from_static(body.as_bytes())),
                Some(&Err(msg)) => Err(SourceError::Unavailable(msg.into())),
                None => Ok(Bytes::from_static(RUNNING_STATS.as_bytes())),
            }
        }
    }

    fn entity(id: &str, state: &str) -> Entity {
        Entity {
            id: id.into(),
            name: format!("{id}-name"),
            status: if state == "running" { "Up 1 minute".into() } else { "Exited (0)".into() },
            state: state.into(),
        }
    }

    fn collector(source: FakeSource, config: CollectorConfig) -> (Collector, Arc<FakeSource>) {
        let source = Arc::new(source);
        (Collector::new(source.clone(), &config), source)
    }

    #[tokio::test]
    async fn running_container_record_carries_exact_values() {
        let (c, _) = collector(
            FakeSource {
                entities: vec![entity("abc", "running")],
                ..Default::default()
            },
            CollectorConfig::default(),
        );
        let snapshot = c.collect(&CancellationToken::new()).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        let r = &snapshot[0];
        assert_eq!(r.labels(), ["abc", "abc-name", "Up 1 minute", "running"]);
        assert_eq!(r.reading.total_cpu_usage, 12345);
        assert_eq!(r.reading.mem_usage, 1048576);
        assert_eq!(r.reading.mem_limit, 2097152);
        assert_eq!(r.reading.online_cpus, 2);
        assert_eq!(r.reading.per_cpu_usage, vec![6000, 6345]);
    }

    #[tokio::test]
    async fn exited_container_is_zeroed_without_stats_call() {
        let mut stats = HashMap::new();
        stats.insert("old".to_string(), Ok(RUNNING_STATS));
        let (c, source) = collector(
            FakeSource {
                entities: vec![entity("old", "exited")],
                stats,
                ..Default::default()
            },
            CollectorConfig::default(),
        );
        let before = Utc::now();
        let snapshot = c.collect(&CancellationToken::new()).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        let r = &snapshot[0].reading;
        assert_eq!(r.total_cpu_usage, 0);
        assert_eq!(r.mem_usage, 0);
        assert_eq!(r.mem_limit, 0);
        assert!(r.per_cpu_usage.is_empty());
        assert!(r.read_at >= before);
        assert_eq!(source.stats_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn listing_failure_is_scan_fatal() {
        let (c, _) = collector(
            FakeSource {
                entities: vec![entity("abc", "running")],
                fail_listing: true,
                ..Default::default()
            },
            CollectorConfig::default(),
        );
        let err = c.collect(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, CollectError::SourceUnavailable(_)));
        assert!(err.to_string().contains("daemon down"));
    }

    #[tokio::test]
    async fn failed_reads_are_omitted_not_fatal() {
        let mut stats = HashMap::new();
        stats.insert("b".to_string(), Err("connection reset"));
        stats.insert("c".to_string(), Ok("not json"));
        let (c, _) = collector(
            FakeSource {
                entities: vec![
                    entity("a", "running"),
                    entity("b", "running"),
                    entity("c", "running"),
                    entity("d", "exited"),
                ],
                stats,
                ..Default::default()
            },
            CollectorConfig::default(),
        );
        let snapshot = c.collect(&CancellationToken::new()).await.unwrap();
        let mut ids: Vec<_> = snapshot.iter().map(|r| r.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "d"]);
    }

    #[tokio::test]
    async fn repeated_scans_never_lose_or_duplicate_records() {
        let entities: Vec<_> = (0..64)
            .map(|i| entity(&format!("c{i}"), if i % 5 == 0 { "paused" } else { "running" }))
            .collect();
        let (c, _) = collector(
            FakeSource {
                entities,
                ..Default::default()
            },
            CollectorConfig::default(),
        );
        let c = Arc::new(c);
        let mut scans = JoinSet::new();
        for _ in 0..8 {
            let c = c.clone();
            scans.spawn(async move { c.collect(&CancellationToken::new()).await });
        }
        while let Some(joined) = scans.join_next().await {
            let snapshot = joined.unwrap().unwrap();
            assert_eq!(snapshot.len(), 64);
            let mut ids: Vec<_> = snapshot.iter().map(|r| r.id.clone()).collect();
            ids.sort();
            ids.dedup();
            assert_eq!(ids.len(), 64);
        }
    }

    #[tokio::test]
    async fn max_concurrency_bounds_in_flight_reads() {
        let entities: Vec<_> = (0..20).map(|i| entity(&format!("c{i}"), "running")).collect();
        let (c, source) = collector(
            FakeSource {
                entities,
                ..Default::default()
            },
            CollectorConfig {
                max_concurrency: 3,
                ..Default::default()
            },
        );
        let snapshot = c.collect(&CancellationToken::new()).await.unwrap();
        assert_eq!(snapshot.len(), 20);
        assert!(source.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_read_times_out_and_is_omitted() {
        let (c, _) = collector(
            FakeSource {
                entities: vec![entity("slow", "running"), entity("gone", "exited")],
                stall_stats: true,
                ..Default::default()
            },
            CollectorConfig {
                max_concurrency: 0,
                stats_timeout_ms: 50,
            },
        );
        let snapshot = c.collect(&CancellationToken::new()).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "gone");
    }

    #[tokio::test]
    async fn cancel_during_fan_out_omits_in_flight_containers() {
        let (c, _) = collector(
            FakeSource {
                entities: vec![entity("a", "running"), entity("b", "running"), entity("z", "dead")],
                stall_stats: true,
                ..Default::default()
            },
            CollectorConfig::default(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let snapshot = c.collect(&cancel).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].state, "dead");
    }

    #[tokio::test]
    async fn cancel_before_listing_fails_the_scan() {
        let (c, _) = collector(FakeSource::default(), CollectorConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(c.collect(&cancel).await, Err(CollectError::Cancelled)));
    }
}
