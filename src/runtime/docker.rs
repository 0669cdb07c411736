/// Docker-backed implementation of the container runtime adapter.
///
/// A thin wrapper over bollard: list running containers, kill by id. All
/// staleness policy lives in the watchdog; this layer only translates wire
/// types and errors.
use crate::runtime::{ContainerRecord, ContainerRuntime, RuntimeError};
use async_trait::async_trait;
use bollard::container::{KillContainerOptions, ListContainersOptions};
use bollard::models::ContainerSummary;
use bollard::{Docker, API_DEFAULT_VERSION};
use chrono::DateTime;
use std::path::Path;

/// Seconds before an idle Docker API request is abandoned.
const CONNECT_TIMEOUT_SECS: u64 = 120;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the Docker daemon.
    ///
    /// With no socket path, platform connection defaults apply (on Linux,
    /// `/var/run/docker.sock`). The connection is lazy; a daemon that is
    /// down surfaces as `Unavailable` on the first request, not here.
    pub fn connect(socket: Option<&Path>) -> Result<Self, RuntimeError> {
        let docker = match socket {
            Some(path) => Docker::connect_with_unix(
                &path.to_string_lossy(),
                CONNECT_TIMEOUT_SECS,
                API_DEFAULT_VERSION,
            ),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| RuntimeError::Unavailable {
            reason: e.to_string(),
        })?;

        Ok(Self { docker })
    }

    /// One-shot reachability probe, used at startup.
    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable {
                reason: e.to_string(),
            })
    }
}

/// Convert one listing entry into a record, or drop it.
///
/// Entries missing an id or creation timestamp are malformed for our
/// purposes; they are skipped with a warning rather than failing the poll.
fn record_from_summary(summary: ContainerSummary) -> Option<ContainerRecord> {
    let id = match summary.id {
        Some(id) => id,
        None => {
            tracing::warn!("skipping container entry with no id");
            return None;
        }
    };
    let created = match summary.created {
        Some(created) => created,
        None => {
            tracing::warn!(id = %id, "skipping container entry with no creation timestamp");
            return None;
        }
    };
    match DateTime::from_timestamp(created, 0) {
        Some(created_at) => Some(ContainerRecord { id, created_at }),
        None => {
            tracing::warn!(
                id = %id,
                created,
                "skipping container entry with out-of-range creation timestamp"
            );
            None
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, RuntimeError> {
        // Running containers only; stopped ones have nothing left to kill.
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| RuntimeError::Unavailable {
                reason: e.to_string(),
            })?;

        Ok(summaries
            .into_iter()
            .filter_map(record_from_summary)
            .collect())
    }

    async fn kill(&self, id: &str) -> Result<(), RuntimeError> {
        // Default signal for the kill endpoint is SIGKILL.
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| RuntimeError::KillFailed {
                id: id.to_string(),
                reason: e.to_string(),
            })
    }
}
