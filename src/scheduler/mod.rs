//! Cluster scheduler integration
//!
//! [`SchedulerClient`] is the only way the tuning engine talks to the
//! cluster: job submission, cancellation, liveness and the per-node resource
//! facts the benchmark parameters are derived from. [`SlurmClient`] is the
//! production implementation, [`MockScheduler`] a scripted one for tests and
//! offline planning.

mod executor;
pub mod mock;
pub mod slurm;

pub use executor::{Executor, ShellExecutor};
pub use mock::MockScheduler;
pub use slurm::SlurmClient;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Job submission request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Job name
    pub name: String,
    /// Submitting user
    pub user: String,
    /// Batch script body
    pub body: String,
}

/// Job cancellation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Job name
    pub name: String,
    /// User owning the job
    pub user: String,
}

/// Running-job lookup request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindRunningJobByNameRequest {
    /// Job name
    pub name: String,
    /// User owning the job
    pub user: String,
}

/// Scheduler capabilities consumed by the tuning engine
///
/// Implementations return [`TuneError::Submission`], [`TuneError::Cancellation`],
/// [`TuneError::Unavailable`], [`TuneError::NotFound`] and [`TuneError::Probe`]
/// for the respective failures.
///
/// [`TuneError::Submission`]: crate::error::TuneError::Submission
/// [`TuneError::Cancellation`]: crate::error::TuneError::Cancellation
/// [`TuneError::Unavailable`]: crate::error::TuneError::Unavailable
/// [`TuneError::NotFound`]: crate::error::TuneError::NotFound
/// [`TuneError::Probe`]: crate::error::TuneError::Probe
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    /// Submit a batch script, returning the scheduler's acknowledgement
    async fn submit(&self, req: &SubmitRequest) -> Result<String>;

    /// Cancel all jobs with the given name
    async fn cancel_job(&self, req: &CancelRequest) -> Result<()>;

    /// Check that the scheduler answers queries
    async fn health_check(&self) -> Result<()>;

    /// Id of a still-queued or running job with the given name
    async fn find_running_job_by_name(&self, req: &FindRunningJobByNameRequest) -> Result<u64>;

    /// Configured memory per node, in MB
    async fn find_mem_per_node(&self) -> Result<u64>;

    /// GPUs per node
    async fn find_gpu_per_node(&self) -> Result<u32>;

    /// CPUs per node
    async fn find_cpu_per_node(&self) -> Result<u32>;

    /// Raw `<gpu index> <cpu range>` affinity table
    async fn find_cpu_affinity(&self) -> Result<String>;
}
