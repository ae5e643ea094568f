//! # hpltune - HPL-AI auto-tuning for Slurm clusters
//!
//! hpltune finds a good HPL-AI configuration for a GPU cluster and runs the
//! benchmark with it. A run has two phases:
//!
//! - **Sweep**: one job covering ten problem sizes (75% to 84% of total
//!   memory) and ten block sizes on a square-ish process grid
//! - **Optimal**: one job re-running the sweep row with the highest Gflops
//!
//! Node memory, GPU and CPU counts and the GPU/CPU affinity table are read
//! from the scheduler at the start of each phase.
//!
//! ## Quick Start
//!
//! ```no_run
//! use hpltune::config::TuneConfig;
//! use hpltune::scheduler::{ShellExecutor, SlurmClient};
//! use hpltune::tuning::TuningOrchestrator;
//! use std::sync::Arc;
//!
//! # async fn example() -> hpltune::Result<()> {
//! let config = TuneConfig::default();
//! let slurm = SlurmClient::new(ShellExecutor::new(), config.user.clone())
//!     .with_output_pattern(config.output_pattern());
//! let (_cancel, cancelled) = tokio::sync::watch::channel(false);
//!
//! let report = TuningOrchestrator::new(Arc::new(slurm), config, cancelled)
//!     .run()
//!     .await?;
//! println!("best: N={} NB={}", report.optimal.row.problem_size, report.optimal.row.block_size);
//! # Ok(())
//! # }
//! ```
//!
//! ## Offline Planning
//!
//! ```
//! use hpltune::config::SweepConfig;
//! use hpltune::tuning::{ArtifactGenerator, ParameterCalculator, ResourceFacts};
//!
//! let facts = ResourceFacts {
//!     mem_per_node_mb: 515_000,
//!     gpus_per_node: 8,
//!     cpus_per_node: 128,
//!     affinity_table: (0..8).map(|g| format!("{} {}-{}\n", g, g * 16, g * 16 + 15)).collect(),
//! };
//!
//! let calc = ParameterCalculator::new(SweepConfig::default());
//! let dat = calc.sweep_dat(&facts, 1).unwrap();
//! let sbatch = calc.sbatch(&facts, &dat, 1, "hpl.sqsh", "").unwrap();
//! let artifacts = ArtifactGenerator::default().generate(&dat, &sbatch).unwrap();
//! assert!(artifacts.sbatch_file.contains("#SBATCH --ntasks-per-node=8"));
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod scheduler;
pub mod tuning;

// Re-export commonly used types
pub use config::TuneConfig;
pub use error::{Result, TuneError};
pub use tuning::{TuningOrchestrator, TuningReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use hpltune::prelude::*;
    //! ```

    pub use crate::config::{PollConfig, SweepConfig, TuneConfig};
    pub use crate::error::{Result, TuneError};
    pub use crate::scheduler::{MockScheduler, SchedulerClient, ShellExecutor, SlurmClient};
    pub use crate::tuning::{
        ArtifactGenerator, JobRunner, OptimalConfiguration, ParameterCalculator, ResourceFacts,
        ResultSelector, TuningOrchestrator, TuningReport,
    };
}
