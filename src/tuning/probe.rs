//! Resource fact collection

use super::types::ResourceFacts;
use crate::error::Result;
use crate::scheduler::SchedulerClient;

/// Reads a fresh [`ResourceFacts`] snapshot from the scheduler
pub struct ResourceProbe<'a> {
    scheduler: &'a dyn SchedulerClient,
}

impl<'a> ResourceProbe<'a> {
    /// Create a probe backed by `scheduler`
    pub fn new(scheduler: &'a dyn SchedulerClient) -> Self {
        Self { scheduler }
    }

    /// Query memory, GPUs, CPUs and the affinity table, in that order
    pub async fn collect(&self) -> Result<ResourceFacts> {
        let facts = ResourceFacts {
            mem_per_node_mb: self.scheduler.find_mem_per_node().await?,
            gpus_per_node: self.scheduler.find_gpu_per_node().await?,
            cpus_per_node: self.scheduler.find_cpu_per_node().await?,
            affinity_table: self.scheduler.find_cpu_affinity().await?,
        };

        tracing::info!(
            mem_mb = facts.mem_per_node_mb,
            gpus = facts.gpus_per_node,
            cpus = facts.cpus_per_node,
            "resource facts collected"
        );
        Ok(facts)
    }
}
