//! Benchmark parameter computation
//!
//! Turns [`ResourceFacts`] into the process grid, the problem-size sweep and
//! the CPU/GPU affinity strings. Nothing here talks to the cluster.

use super::types::{DatParameters, ProcessGrid, ResourceFacts, SbatchParameters};
use crate::config::SweepConfig;
use crate::error::{Result, TuneError};
use regex::Regex;

/// Scale applied to the matrix dimension derived from memory
pub const GB_TO_MB: u64 = 1000;

/// Bytes per matrix element
const ELEMENT_BYTES: f64 = 8.0;

/// Closest-to-square factor pair of `total_gpus` with `p <= q`
///
/// The trivial factor 1 is skipped unless there is a single GPU. A prime
/// rank count has no other factor; it falls back to `(2, total_gpus)`, which
/// over-counts the ranks and is returned with `exact == false`.
pub fn compute_process_grid(total_gpus: u32) -> Result<ProcessGrid> {
    if total_gpus == 0 {
        return Err(TuneError::config("cannot build a process grid for zero GPUs"));
    }
    if total_gpus == 1 {
        return Ok(ProcessGrid {
            p: 1,
            q: 1,
            exact: true,
        });
    }

    let root = (total_gpus as f64).sqrt() as u32;
    if let Some(p) = (2..=root).rev().find(|i| total_gpus % i == 0) {
        return Ok(ProcessGrid {
            p,
            q: total_gpus / p,
            exact: true,
        });
    }

    tracing::warn!(
        total_gpus,
        "prime GPU count has no square-ish factorization, falling back to a 2x{} grid",
        total_gpus
    );
    Ok(ProcessGrid {
        p: 2,
        q: total_gpus,
        exact: false,
    })
}

/// Matrix sizes filling `fractions` of the memory of `node_count` nodes
pub fn compute_problem_sizes(mem_per_node_mb: u64, node_count: u32, fractions: &[f64]) -> Vec<u64> {
    let base = ((mem_per_node_mb * node_count as u64) as f64 / ELEMENT_BYTES).sqrt();
    fractions
        .iter()
        .map(|fraction| (base * fraction).floor() as u64 * GB_TO_MB)
        .collect()
}

/// CPU and GPU affinity strings, one group of `tasks_per_node / gpus_per_node`
/// entries per table line
pub fn compute_affinity(
    affinity_table: &str,
    tasks_per_node: u32,
    gpus_per_node: u32,
) -> Result<(String, String)> {
    if gpus_per_node == 0 {
        return Err(TuneError::Parse("affinity needs at least one GPU per node".into()));
    }
    let tasks_per_gpu = (tasks_per_node / gpus_per_node) as usize;
    if tasks_per_gpu == 0 {
        return Err(TuneError::Parse(format!(
            "{} tasks cannot cover {} GPUs per node",
            tasks_per_node, gpus_per_node
        )));
    }

    let re = Regex::new(r"(\d+)\s+(\d+-\d+)").expect("static regex");
    let mut cpu_groups = Vec::new();
    let mut gpu_groups = Vec::new();

    for line in affinity_table.lines() {
        let Some(caps) = re.captures(line) else {
            continue;
        };
        cpu_groups.push(vec![&caps[2]; tasks_per_gpu].join(":"));
        gpu_groups.push(vec![&caps[1]; tasks_per_gpu].join(":"));
    }

    if cpu_groups.is_empty() {
        return Err(TuneError::Parse(
            "affinity table has no '<gpu> <cpu range>' lines".into(),
        ));
    }
    Ok((cpu_groups.join(":"), gpu_groups.join(":")))
}

/// Derives both artifacts' parameters for one phase
#[derive(Debug, Clone)]
pub struct ParameterCalculator {
    sweep: SweepConfig,
}

impl ParameterCalculator {
    /// Create a calculator for the given sweep settings
    pub fn new(sweep: SweepConfig) -> Self {
        Self { sweep }
    }

    /// Sweep-phase numeric parameters: every configured fraction and block size
    pub fn sweep_dat(&self, facts: &ResourceFacts, node_count: u32) -> Result<DatParameters> {
        let problem_sizes =
            compute_problem_sizes(facts.mem_per_node_mb, node_count, &self.sweep.memory_fractions);
        if problem_sizes.is_empty() || problem_sizes.iter().all(|n| *n == 0) {
            return Err(TuneError::config(format!(
                "{} MB per node is too little memory for a problem size",
                facts.mem_per_node_mb
            )));
        }

        let grid = compute_process_grid(facts.gpus_per_node * node_count)?;
        tracing::debug!(p = grid.p, q = grid.q, exact = grid.exact, "process grid");

        Ok(DatParameters {
            problem_sizes,
            block_sizes: self.sweep.block_sizes.clone(),
            p: grid.p,
            q: grid.q,
        })
    }

    /// Submission-script parameters for a grid of `p * q` ranks
    pub fn sbatch(
        &self,
        facts: &ResourceFacts,
        dat: &DatParameters,
        node_count: u32,
        container_path: &str,
        workspace: &str,
    ) -> Result<SbatchParameters> {
        let ranks = dat.p * dat.q;
        if node_count == 0 || ranks % node_count != 0 {
            return Err(TuneError::config(format!(
                "{} ranks cannot be spread evenly over {} nodes",
                ranks, node_count
            )));
        }
        let tasks_per_node = ranks / node_count;
        let cpus_per_task = facts.cpus_per_node / tasks_per_node;
        if cpus_per_task == 0 {
            return Err(TuneError::config(format!(
                "{} CPUs per node cannot host {} tasks",
                facts.cpus_per_node, tasks_per_node
            )));
        }

        let (cpu_affinity, gpu_affinity) =
            compute_affinity(&facts.affinity_table, tasks_per_node, facts.gpus_per_node)?;

        Ok(SbatchParameters {
            node_count,
            tasks_per_node,
            cpus_per_task,
            gpus_per_node: facts.gpus_per_node,
            cpu_affinity,
            gpu_affinity,
            container_path: container_path.to_string(),
            workspace: workspace.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn facts() -> ResourceFacts {
        ResourceFacts {
            mem_per_node_mb: 128,
            gpus_per_node: 4,
            cpus_per_node: 32,
            affinity_table: "0\t6-7\n1\t6-7\n2\t2-3\n3\t2-3".to_string(),
        }
    }

    #[test]
    fn test_process_grid_known_values() {
        let grid = |n| {
            let g = compute_process_grid(n).unwrap();
            (g.p, g.q, g.exact)
        };
        assert_eq!(grid(1), (1, 1, true));
        assert_eq!(grid(4), (2, 2, true));
        assert_eq!(grid(8), (2, 4, true));
        assert_eq!(grid(12), (3, 4, true));
        assert_eq!(grid(16), (4, 4, true));
    }

    #[test]
    fn test_process_grid_prime_fallback() {
        assert_eq!(
            compute_process_grid(2).unwrap(),
            ProcessGrid { p: 2, q: 2, exact: false }
        );
        let g = compute_process_grid(7).unwrap();
        assert_eq!((g.p, g.q), (2, 7));
        assert!(!g.exact);
        assert_ne!(g.ranks(), 7);
    }

    #[test]
    fn test_process_grid_rejects_zero() {
        assert!(matches!(compute_process_grid(0), Err(TuneError::Config(_))));
    }

    proptest! {
        #[test]
        fn prop_grid_is_ordered(n in 1u32..100_000) {
            let g = compute_process_grid(n).unwrap();
            prop_assert!(g.p <= g.q);
        }

        #[test]
        fn prop_exact_grid_covers_every_rank(n in 1u32..100_000) {
            let g = compute_process_grid(n).unwrap();
            if g.exact {
                prop_assert_eq!(g.p * g.q, n);
            }
        }

        #[test]
        fn prop_composite_grids_are_exact(a in 2u32..300, b in 2u32..300) {
            let g = compute_process_grid(a * b).unwrap();
            prop_assert!(g.exact);
            prop_assert_eq!(g.p * g.q, a * b);
            prop_assert!(g.p >= a.min(b));
        }
    }

    #[test]
    fn test_problem_sizes_single_fraction() {
        assert_eq!(compute_problem_sizes(128, 1, &[0.75]), vec![3000]);
    }

    #[test]
    fn test_problem_sizes_are_ascending() {
        let sizes = compute_problem_sizes(512_000, 2, &SweepConfig::default().memory_fractions);
        assert_eq!(sizes.len(), 10);
        assert!(sizes.windows(2).all(|w| w[0] <= w[1]));
        assert!(sizes.iter().all(|n| n % GB_TO_MB == 0));
        // sqrt(512000 * 2 / 8) = 357.77
        assert_eq!(sizes[0], 268_000);
        assert_eq!(sizes[9], 300_000);
    }

    #[test]
    fn test_affinity_repeats_per_task() {
        let (cpu, gpu) = compute_affinity("0\t6-7\n1\t2-3", 4, 2).unwrap();
        assert_eq!(cpu, "6-7:6-7:2-3:2-3");
        assert_eq!(gpu, "0:0:1:1");
    }

    #[test]
    fn test_affinity_skips_noise() {
        let table = "GPU topology\n0 0-15\nLegend: X = Self\n1    16-31\n";
        let (cpu, gpu) = compute_affinity(table, 2, 2).unwrap();
        assert_eq!(cpu, "0-15:16-31");
        assert_eq!(gpu, "0:1");
    }

    #[test]
    fn test_affinity_errors() {
        assert!(matches!(compute_affinity("no gpus here", 2, 2), Err(TuneError::Parse(_))));
        assert!(matches!(compute_affinity("0 0-3", 1, 2), Err(TuneError::Parse(_))));
        assert!(matches!(compute_affinity("0 0-3", 2, 0), Err(TuneError::Parse(_))));
    }

    #[test]
    fn test_sweep_dat() {
        let calc = ParameterCalculator::new(SweepConfig::default());
        let dat = calc.sweep_dat(&facts(), 1).unwrap();
        assert_eq!((dat.p, dat.q), (2, 2));
        assert_eq!(dat.problem_sizes.len(), 10);
        assert_eq!(dat.problem_sizes[0], 3000);
        assert_eq!(dat.block_sizes.len(), 10);
    }

    #[test]
    fn test_sweep_dat_rejects_tiny_memory() {
        let calc = ParameterCalculator::new(SweepConfig::default());
        let tiny = ResourceFacts {
            mem_per_node_mb: 1,
            ..facts()
        };
        assert!(calc.sweep_dat(&tiny, 1).is_err());
    }

    #[test]
    fn test_sbatch_layout() {
        let calc = ParameterCalculator::new(SweepConfig::default());
        let dat = calc.sweep_dat(&facts(), 1).unwrap();
        let sbatch = calc.sbatch(&facts(), &dat, 1, "hpl.sqsh", "").unwrap();

        assert_eq!(sbatch.tasks_per_node, 4);
        assert_eq!(sbatch.cpus_per_task, 8);
        assert_eq!(sbatch.tasks_per_node * sbatch.node_count, dat.p * dat.q);
        assert!(sbatch.cpus_per_task * sbatch.tasks_per_node <= 32);
        assert_eq!(sbatch.cpu_affinity, "6-7:6-7:2-3:2-3");
        assert_eq!(sbatch.gpu_affinity, "0:1:2:3");
    }

    #[test]
    fn test_sbatch_multi_node() {
        let calc = ParameterCalculator::new(SweepConfig::default());
        let dat = calc.sweep_dat(&facts(), 2).unwrap();
        assert_eq!((dat.p, dat.q), (2, 4));

        let sbatch = calc.sbatch(&facts(), &dat, 2, "hpl.sqsh", "/scratch").unwrap();
        assert_eq!(sbatch.tasks_per_node, 4);
        assert_eq!(sbatch.node_count, 2);
    }

    #[test]
    fn test_sbatch_rejects_uneven_ranks() {
        let calc = ParameterCalculator::new(SweepConfig::default());
        let dat = DatParameters {
            problem_sizes: vec![1000],
            block_sizes: vec![128],
            p: 1,
            q: 3,
        };
        assert!(calc.sbatch(&facts(), &dat, 2, "hpl.sqsh", "/scratch").is_err());
    }
}
