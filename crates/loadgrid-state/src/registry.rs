//! Collaborator contracts consumed by the control loop.
//!
//! The autoscaler never talks to a concrete backend; it holds
//! `Arc<dyn InstanceRegistry>` and `Arc<dyn MetricsSource>`. `StateStore`
//! implements both, and tests substitute failure-injecting mocks.

use async_trait::async_trait;

use crate::error::RegistryResult;
use crate::types::{Instance, InstanceId, Region, SystemMetrics};

/// Source of truth for the instance pool.
///
/// Implementations must apply `create` and `remove` atomically: on error
/// the pool is unchanged.
#[async_trait]
pub trait InstanceRegistry: Send + Sync {
    /// All instances currently reporting healthy.
    async fn list_healthy(&self) -> RegistryResult<Vec<Instance>>;

    /// Provision a new instance in `region`.
    async fn create(&self, region: Region) -> RegistryResult<Instance>;

    /// Decommission an instance.
    async fn remove(&self, id: &InstanceId) -> RegistryResult<()>;
}

/// Provider of the latest system load snapshot.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn latest_snapshot(&self) -> RegistryResult<SystemMetrics>;
}
