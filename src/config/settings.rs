//! Configuration settings for hpltune
//!
//! Defines the CLI arguments, the tuning configuration and its defaults.
//! A JSON config file can override the defaults; CLI flags override both.

use crate::error::{IoResultExt, Result, TuneError};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Job name used for both benchmark phases unless overridden
pub const DEFAULT_JOB_NAME: &str = "HPL-Benchmark";

/// Identity the benchmark jobs are submitted as
pub const DEFAULT_ADMIN_USER: &str = "root";

/// Where the numeric-parameters file is written before submission
pub const DEFAULT_DAT_PATH: &str = "hpl.dat";

/// Slurm output pattern; `%j` is replaced by the job id
///
/// Slurm writes the log on the first allocated node while the sweep is read
/// on the submit host, so the path must be visible from both. Multi-node runs
/// with a workspace keep the log there instead (see
/// [`TuneConfig::output_pattern`]).
pub const DEFAULT_OUTPUT_LOG: &str = "/tmp/benchmark-%j.log";

/// Log file name used under the shared workspace
const WORKSPACE_OUTPUT_LOG: &str = "benchmark-%j.log";

/// Where parsed sweep rows are persisted
pub const DEFAULT_CSV_PATH: &str = "benchmark.csv";

/// Container image holding the HPL-AI binaries
pub const DEFAULT_CONTAINER: &str = "hpc-benchmarks:21.4-hpl.sqsh";

/// hpltune - two-phase HPL-AI auto-tuner for Slurm clusters
#[derive(Parser, Debug, Clone)]
#[command(name = "hpltune")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Auto-tune and run the HPL-AI benchmark on a Slurm cluster")]
#[command(long_about = r#"
hpltune drives HPL-AI in two phases:

  1. a sweep over ten problem sizes and ten block sizes
  2. a single run with the best configuration found by the sweep

Problem sizes, the process grid and CPU/GPU affinity are derived from
the node resources reported by Slurm and nvidia-smi.

Examples:
  hpltune run --nodes 2                      # Full tuning on two nodes
  hpltune plan --mem 128 --gpus 4 --cpus 32  # Print phase-1 artifacts offline
  hpltune parse /tmp/benchmark-42.log        # Pick the best row of a sweep log
"#)]
pub struct CliArgs {
    /// JSON configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Number of nodes to benchmark on
    #[arg(short = 'N', long, value_name = "NUM", global = true)]
    pub nodes: Option<u32>,

    /// Slurm job name
    #[arg(long, value_name = "NAME", global = true)]
    pub job_name: Option<String>,

    /// Append a UTC timestamp to the job name
    #[arg(long, global = true)]
    pub unique_job_name: bool,

    /// User the jobs are submitted as
    #[arg(long, value_name = "USER", global = true)]
    pub user: Option<String>,

    /// Container image path
    #[arg(long, value_name = "PATH", global = true)]
    pub container_path: Option<String>,

    /// Shared workspace directory for multi-node runs
    #[arg(long, value_name = "PATH", global = true)]
    pub workspace: Option<String>,

    /// Maximum number of completion polls per phase
    #[arg(long, value_name = "NUM", global = true)]
    pub poll_attempts: Option<u32>,

    /// Delay between completion polls (e.g. 5m, 30s)
    #[arg(long, value_name = "DURATION", global = true)]
    pub poll_delay: Option<String>,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run both tuning phases against the cluster
    #[command(name = "run")]
    Run,

    /// Compute and print the phase-1 artifacts without submitting anything
    #[command(name = "plan")]
    Plan {
        /// Memory per node in MB (probed from the cluster when omitted)
        #[arg(long, requires_all = ["gpus", "cpus"])]
        mem: Option<u64>,
        /// GPUs per node
        #[arg(long)]
        gpus: Option<u32>,
        /// CPUs per node
        #[arg(long)]
        cpus: Option<u32>,
        /// File holding the GPU/CPU affinity table
        #[arg(long, value_name = "PATH")]
        affinity_file: Option<PathBuf>,
    },

    /// Parse a benchmark log, persist it as CSV and print the best row
    #[command(name = "parse")]
    Parse {
        /// Benchmark log (or CSV written by a previous run)
        log: PathBuf,
    },

    /// Check that the scheduler answers
    #[command(name = "health")]
    Health,

    /// Cancel the benchmark job
    #[command(name = "cancel")]
    Cancel,
}

/// Problem-size sweep settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Fractions of total memory the matrix may occupy, ascending
    pub memory_fractions: Vec<f64>,
    /// HPL block sizes (NB) probed by the sweep
    pub block_sizes: Vec<u32>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            memory_fractions: vec![0.75, 0.76, 0.77, 0.78, 0.79, 0.80, 0.81, 0.82, 0.83, 0.84],
            block_sizes: vec![64, 128, 224, 256, 384, 512, 640, 768, 896, 1024],
        }
    }
}

/// Completion polling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Number of scheduler queries before giving up
    pub max_attempts: u32,
    /// Milliseconds to sleep between queries
    pub delay_ms: u64,
}

impl PollConfig {
    /// Delay between two queries
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Longest time a phase may wait for its job
    pub fn budget(&self) -> Duration {
        self.delay() * self.max_attempts
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            delay_ms: 5 * 60 * 1000,
        }
    }
}

/// Complete tuning configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuneConfig {
    /// Slurm job name shared by both phases
    pub job_name: String,
    /// Submitting identity
    pub user: String,
    /// Number of nodes
    pub nodes: u32,
    /// Container image path
    pub container_path: String,
    /// Shared workspace directory (multi-node layout)
    pub workspace: String,
    /// Numeric-parameters file path; fixed, so one run per working directory
    pub dat_path: PathBuf,
    /// Slurm output pattern, `%j` is the job id
    pub output_log: String,
    /// CSV file sweep rows are written to
    pub csv_path: PathBuf,
    /// Sweep settings
    pub sweep: SweepConfig,
    /// Polling settings
    pub poll: PollConfig,
}

impl Default for TuneConfig {
    fn default() -> Self {
        Self {
            job_name: DEFAULT_JOB_NAME.to_string(),
            user: DEFAULT_ADMIN_USER.to_string(),
            nodes: 1,
            container_path: DEFAULT_CONTAINER.to_string(),
            workspace: String::new(),
            dat_path: PathBuf::from(DEFAULT_DAT_PATH),
            output_log: DEFAULT_OUTPUT_LOG.to_string(),
            csv_path: PathBuf::from(DEFAULT_CSV_PATH),
            sweep: SweepConfig::default(),
            poll: PollConfig::default(),
        }
    }
}

impl TuneConfig {
    /// Load a configuration file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_path(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| TuneError::config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Build the configuration from the CLI, layered over the config file
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(nodes) = args.nodes {
            config.nodes = nodes;
        }
        if let Some(ref name) = args.job_name {
            config.job_name = name.clone();
        }
        if let Some(ref user) = args.user {
            config.user = user.clone();
        }
        if let Some(ref path) = args.container_path {
            config.container_path = path.clone();
        }
        if let Some(ref workspace) = args.workspace {
            config.workspace = workspace.clone();
        }
        if let Some(attempts) = args.poll_attempts {
            config.poll.max_attempts = attempts;
        }
        if let Some(ref delay) = args.poll_delay {
            let delay = parse_duration(delay)?;
            config.poll.delay_ms = u64::try_from(delay.as_millis())
                .map_err(|_| TuneError::config(format!("poll delay {:?} is too long", delay)))?;
        }
        if args.unique_job_name {
            config.job_name = unique_job_name(&config.job_name, chrono::Utc::now());
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no phase could run with
    pub fn validate(&self) -> Result<()> {
        if self.nodes == 0 {
            return Err(TuneError::config("node count must be at least 1"));
        }
        if self.job_name.trim().is_empty() {
            return Err(TuneError::config("job name must not be empty"));
        }
        if self.poll.max_attempts == 0 {
            return Err(TuneError::config("poll attempts must be at least 1"));
        }
        if self.poll.delay_ms == 0 {
            return Err(TuneError::config("poll delay must be at least 1ms"));
        }
        if self.sweep.memory_fractions.is_empty() {
            return Err(TuneError::config("at least one memory fraction is required"));
        }
        if let Some(f) = self
            .sweep
            .memory_fractions
            .iter()
            .find(|f| !(**f > 0.0 && **f <= 1.0))
        {
            return Err(TuneError::config(format!(
                "memory fraction {} is outside (0, 1]",
                f
            )));
        }
        if self.sweep.block_sizes.is_empty() {
            return Err(TuneError::config("at least one block size is required"));
        }
        if self.nodes > 1 && self.workspace.is_empty() {
            return Err(TuneError::config(
                "multi-node runs need a shared --workspace",
            ));
        }
        Ok(())
    }

    /// Where the `.dat` file is written; multi-node runs keep it in the workspace
    pub fn dat_file_path(&self) -> PathBuf {
        if self.nodes > 1 && self.dat_path.is_relative() && !self.workspace.is_empty() {
            Path::new(&self.workspace).join(&self.dat_path)
        } else {
            self.dat_path.clone()
        }
    }

    /// Pattern passed to `sbatch --output`
    ///
    /// An explicit `output_log` is used as is. The default moves into the
    /// shared workspace for multi-node runs.
    pub fn output_pattern(&self) -> String {
        if self.output_log == DEFAULT_OUTPUT_LOG && self.nodes > 1 && !self.workspace.is_empty() {
            Path::new(&self.workspace)
                .join(WORKSPACE_OUTPUT_LOG)
                .to_string_lossy()
                .into_owned()
        } else {
            self.output_log.clone()
        }
    }

    /// Resolve the Slurm output pattern for a submitted job
    pub fn output_log_for(&self, job_id: &str) -> PathBuf {
        PathBuf::from(self.output_pattern().replace("%j", job_id))
    }
}

/// Parse a human-readable duration ("5m", "30s", "1h 30m")
pub fn parse_duration(s: &str) -> Result<Duration> {
    humantime::parse_duration(s.trim())
        .map_err(|e| TuneError::config(format!("invalid duration '{}': {}", s, e)))
}

/// Suffix a job name so concurrent runs on one cluster do not collide
pub fn unique_job_name(base: &str, now: chrono::DateTime<chrono::Utc>) -> String {
    format!("{}-{}", base, now.format("%Y%m%dT%H%M%S"))
}
