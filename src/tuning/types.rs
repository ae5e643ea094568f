//! Data model shared by the tuning phases

use serde::{Deserialize, Serialize};

/// Per-node resource facts read from the cluster at the start of a phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFacts {
    /// Configured memory per node, in MB
    pub mem_per_node_mb: u64,
    /// GPUs per node
    pub gpus_per_node: u32,
    /// CPUs per node
    pub cpus_per_node: u32,
    /// `<gpu index> <cpu range>` lines
    pub affinity_table: String,
}

/// P×Q decomposition of the benchmark ranks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessGrid {
    /// Process rows
    pub p: u32,
    /// Process columns
    pub q: u32,
    /// False when `p * q` is not the rank count it was derived from
    pub exact: bool,
}

impl ProcessGrid {
    /// Number of ranks the grid spans
    pub fn ranks(&self) -> u32 {
        self.p * self.q
    }
}

/// Contents of the HPL numeric-parameters file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatParameters {
    /// Matrix sizes (N), in sweep order
    pub problem_sizes: Vec<u64>,
    /// Block sizes (NB)
    pub block_sizes: Vec<u32>,
    /// Process rows
    pub p: u32,
    /// Process columns
    pub q: u32,
}

/// Contents of the Slurm submission script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SbatchParameters {
    pub node_count: u32,
    pub tasks_per_node: u32,
    pub cpus_per_task: u32,
    pub gpus_per_node: u32,
    /// Colon-separated CPU range per task
    pub cpu_affinity: String,
    /// Colon-separated GPU index per task
    pub gpu_affinity: String,
    pub container_path: String,
    pub workspace: String,
}

/// Rendered benchmark inputs for one submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkArtifacts {
    pub dat_file: String,
    pub sbatch_file: String,
}

/// One result line of an HPL-AI run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResultRow {
    pub problem_size: u64,
    pub block_size: u32,
    pub p: u32,
    pub q: u32,
    /// Wall time, seconds
    pub elapsed_seconds: f64,
    pub gflops: f64,
    /// Residual after iterative refinement
    pub refinement_residual: f64,
    /// Refinement iterations
    pub iterations: u32,
    pub gflops_with_refinement: f64,
}

/// Winning sweep row and the grid it ran on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalConfiguration {
    pub row: SweepResultRow,
    pub grid: ProcessGrid,
}

impl OptimalConfiguration {
    /// Wrap the winning row
    pub fn from_row(row: SweepResultRow) -> Self {
        let grid = ProcessGrid {
            p: row.p,
            q: row.q,
            exact: true,
        };
        Self { row, grid }
    }
}
