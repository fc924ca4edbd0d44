// Shared test helpers: an in-memory container source

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use container_exporter::collector::{EntitySource, SourceError};
use container_exporter::models::Entity;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

pub fn stats_body(total: u64, per_cpu: &[u64], usage: u64, limit: u64) -> String {
    serde_json::json!({
        "read": "2024-05-01T12:00:00Z",
        "cpu_stats": {
            "online_cpus": per_cpu.len(),
            "cpu_usage": { "total_usage": total, "percpu_usage": per_cpu }
        },
        "memory_stats": { "usage": usage, "max_usage": usage, "limit": limit }
    })
    .to_string()
}

pub fn entity(id: &str, state: &str) -> Entity {
    Entity {
        id: id.into(),
        name: format!("{id}-name"),
        status: if state == "running" {
            "Up 2 hours".into()
        } else {
            "Exited (0) 1 hour ago".into()
        },
        state: state.into(),
    }
}

#[derive(Default)]
pub struct FakeSource {
    pub entities: Vec<Entity>,
    /// Raw body per container id; `Err` fails the read.
    pub stats: HashMap<String, Result<String, String>>,
    pub fail_listing: AtomicBool,
    pub stats_calls: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn with(entities: Vec<Entity>) -> Self {
        Self {
            entities,
            ..Default::default()
        }
    }

    pub fn stats(mut self, id: &str, body: Result<String, String>) -> Self {
        self.stats.insert(id.to_string(), body);
        self
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn stats_calls(&self) -> Vec<String> {
        self.stats_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntitySource for FakeSource {
    async fn list_entities(&self) -> Result<Vec<Entity>, SourceError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable(
                "Cannot connect to the Docker daemon".into(),
            ));
        }
        Ok(self.entities.clone())
    }

    async fn read_stats(&self, id: &str) -> Result<Bytes, SourceError> {
        self.stats_calls.lock().unwrap().push(id.to_string());
        match self.stats.get(id) {
            Some(Ok(body)) => Ok(Bytes::from(body.clone())),
            Some(Err(msg)) => Err(SourceError::Unavailable(msg.clone())),
            None => Err(SourceError::EmptyStats(id.to_string())),
        }
    }
}
