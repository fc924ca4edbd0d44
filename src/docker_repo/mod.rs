// Docker containers and one-shot stats via bollard

use crate::collector::{EntitySource, SourceError};
use crate::config::DockerConfig;
use crate::models::Entity;
use async_trait::async_trait;
use bollard::Docker;
use bollard::query_parameters::{ListContainersOptions, StatsOptions};
use bollard::models::{ContainerStatsResponse, ContainerSummary};
use bytes::Bytes;
use futures_util::StreamExt;
use tracing::instrument;

/// Seconds bollard waits on a single daemon request.
const DOCKER_TIMEOUT_SECS: u64 = 120;

pub struct DockerRepo {
    docker: Docker,
}

impl DockerRepo {
    pub fn connect(config: &DockerConfig) -> anyhow::Result<Self> {
        let docker = match config.socket.as_deref() {
            Some(path) => {
                Docker::connect_with_socket(path, DOCKER_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)?
            }
            // Honors DOCKER_HOST, falling back to the local socket.
            None => Docker::connect_with_defaults()?,
        };
        Ok(Self { docker })
    }

    /// Map a list entry into an Entity. Docker reports names with a leading `/`.
    pub(crate) fn entity_from_summary(c: &ContainerSummary) -> Entity {
        let id = c.id.clone().unwrap_or_default();
        let name = c
            .names
            .as_ref()
            .and_then(|n| n.first())
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| id.clone());
        Entity {
            id,
            name,
            status: c.status.clone().unwrap_or_default(),
            state: c.state.as_ref().map(|s| s.to_string()).unwrap_or_default(),
        }
    }
}

#[async_trait]
impl EntitySource for DockerRepo {
    #[instrument(skip(self), fields(repo = "docker", operation = "list_containers"))]
    async fn list_entities(&self) -> Result<Vec<Entity>, SourceError> {
        let options = ListContainersOptions {
            all: true,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers.iter().map(Self::entity_from_summary).collect())
    }

    #[instrument(skip(self), fields(repo = "docker", operation = "stats"))]
    async fn read_stats(&self, id: &str) -> Result<Bytes, SourceError> {
        let options = StatsOptions {
            stream: false,
            one_shot: true,
        };
        let mut stream = self.docker.stats(id, Some(options));
        let stats = stream
            .next()
            .await
            .ok_or_else(|| SourceError::EmptyStats(id.to_string()))??;
        encode_stats(&stats)
    }
}

/// Re-encode a decoded stats response into the JSON body handed to the collector.
pub(crate) fn encode_stats(stats: &ContainerStatsResponse) -> Result<Bytes, SourceError> {
    Ok(Bytes::from(serde_json::to_vec(stats)?))
}
