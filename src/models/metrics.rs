// Normalized per-container resource readings

use super::Entity;
use chrono::{DateTime, Utc};

/// Resource snapshot for one running container at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct RawStatsReading {
    pub read_at: DateTime<Utc>,
    pub online_cpus: u32,
    /// Cumulative CPU time in nanoseconds.
    pub total_cpu_usage: u64,
    pub per_cpu_usage: Vec<u64>,
    pub mem_usage: u64,
    pub max_mem_usage: u64,
    pub mem_limit: u64,
}

impl RawStatsReading {
    /// All-zero reading stamped with `at`; used for containers that are not running.
    pub fn zeroed(at: DateTime<Utc>) -> Self {
        Self {
            read_at: at,
            online_cpus: 0,
            total_cpu_usage: 0,
            per_cpu_usage: Vec::new(),
            mem_usage: 0,
            max_mem_usage: 0,
            mem_limit: 0,
        }
    }
}

/// One container's identity merged with its reading. Exactly one per container per scan.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRecord {
    pub id: String,
    pub name: String,
    pub status: String,
    pub state: String,
    pub reading: RawStatsReading,
}

impl MetricsRecord {
    pub fn new(entity: Entity, reading: RawStatsReading) -> Self {
        let Entity {
            id,
            name,
            status,
            state,
        } = entity;
        Self {
            id,
            name,
            status,
            state,
            reading,
        }
    }

    pub fn idle(entity: Entity, at: DateTime<Utc>) -> Self {
        Self::new(entity, RawStatsReading::zeroed(at))
    }

    /// Label values in `id, name, status, state` order.
    pub fn labels(&self) -> [&str; 4] {
        [&self.id, &self.name, &self.status, &self.state]
    }
}

/// Records produced by one scan; order is not meaningful.
pub type Snapshot = Vec<MetricsRecord>;
