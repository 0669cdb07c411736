pub mod docker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// The runtime-reported view of one container at poll time.
///
/// A fresh, immutable snapshot produced per poll; never stored beyond the
/// current cull/swing cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    /// Opaque identifier used for kill requests.
    pub id: String,
    /// Creation timestamp as reported by the runtime.
    pub created_at: DateTime<Utc>,
}

/// Errors produced by runtime adapter operations.
#[derive(Debug)]
pub enum RuntimeError {
    /// The runtime endpoint could not be reached or returned malformed data.
    Unavailable { reason: String },
    /// A single termination request failed (container already exited, gone,
    /// permission denied, or transport failure).
    KillFailed { id: String, reason: String },
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::Unavailable { reason } => {
                write!(f, "container runtime unavailable: {reason}")
            }
            RuntimeError::KillFailed { id, reason } => {
                write!(f, "failed to kill container {id}: {reason}")
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Capability interface over a container runtime's control API.
///
/// The watchdog depends on this abstractly; any runtime (or a fake for
/// testing) can satisfy it. No retries and no staleness logic live here.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Human-readable runtime name (e.g., "docker").
    fn name(&self) -> &str;

    /// All currently running containers known to the runtime.
    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, RuntimeError>;

    /// Issue a forceful termination request for one container.
    async fn kill(&self, id: &str) -> Result<(), RuntimeError>;
}

// A single long-lived handle is shared across polls without extra
// synchronization in the loop itself.
#[async_trait]
impl<T: ContainerRuntime + ?Sized> ContainerRuntime for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn list_containers(&self) -> Result<Vec<ContainerRecord>, RuntimeError> {
        (**self).list_containers().await
    }

    async fn kill(&self, id: &str) -> Result<(), RuntimeError> {
        (**self).kill(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_display() {
        let err = RuntimeError::Unavailable {
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "container runtime unavailable: connection refused"
        );
    }

    #[test]
    fn test_kill_failed_display() {
        let err = RuntimeError::KillFailed {
            id: "abc123".to_string(),
            reason: "no such container".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to kill container abc123: no such container"
        );
    }
}
