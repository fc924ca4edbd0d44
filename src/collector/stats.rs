// Parse a raw Docker stats body into RawStatsReading.

use crate::models::RawStatsReading;
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
#[error("malformed stats body: {0}")]
pub struct ParseError(#[from] serde_json::Error);

// Subset of the Engine API `/containers/{id}/stats` response. cgroup v2 hosts
// omit `percpu_usage` and `max_usage`, and the daemon sends `null` for some
// fields on freshly started containers, so everything is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatsBody {
    read: Option<DateTime<Utc>>,
    cpu_stats: Option<CpuStatsBody>,
    memory_stats: Option<MemoryStatsBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CpuStatsBody {
    online_cpus: Option<u32>,
    cpu_usage: Option<CpuUsageBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CpuUsageBody {
    total_usage: Option<u64>,
    percpu_usage: Option<Vec<u64>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MemoryStatsBody {
    usage: Option<u64>,
    max_usage: Option<u64>,
    limit: Option<u64>,
}

/// Decode one stats body. A missing `read` timestamp falls back to now.
pub(crate) fn parse_stats(raw: &[u8]) -> Result<RawStatsReading, ParseError> {
    let body: StatsBody = serde_json::from_slice(raw)?;

    let cpu = body.cpu_stats.unwrap_or_default();
    let cpu_usage = cpu.cpu_usage.unwrap_or_default();
    let mem = body.memory_stats.unwrap_or_default();

    Ok(RawStatsReading {
        read_at: body.read.unwrap_or_else(Utc::now),
        online_cpus: cpu.online_cpus.unwrap_or(0),
        total_cpu_usage: cpu_usage.total_usage.unwrap_or(0),
        per_cpu_usage: cpu_usage.percpu_usage.unwrap_or_default(),
        mem_usage: mem.usage.unwrap_or(0),
        max_mem_usage: mem.max_usage.unwrap_or(0),
        mem_limit: mem.limit.unwrap_or(0),
    })
}
