//! Two-phase tuning run
//!
//! `Sweep -> Optimal -> Done`. The sweep submits every problem size and block
//! size in one job; the optimal phase re-runs the best row alone. A failure in
//! either phase ends the run.

use super::artifacts::ArtifactGenerator;
use super::params::ParameterCalculator;
use super::probe::ResourceProbe;
use super::results::ResultSelector;
use super::runner::JobRunner;
use super::types::{
    BenchmarkArtifacts, DatParameters, OptimalConfiguration, ResourceFacts, SbatchParameters,
};
use crate::config::TuneConfig;
use crate::error::{Result, TuneError};
use crate::scheduler::SchedulerClient;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// Tuning state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TuningPhase {
    /// Broad problem-size sweep
    Sweep,
    /// Single run with the best sweep configuration
    Optimal,
    /// Both phases finished
    Done,
}

impl fmt::Display for TuningPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sweep => write!(f, "sweep phase"),
            Self::Optimal => write!(f, "optimal phase"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Everything needed to submit one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhasePlan {
    pub dat: DatParameters,
    pub sbatch: SbatchParameters,
    pub artifacts: BenchmarkArtifacts,
}

/// Outcome of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct TuningReport {
    pub job_name: String,
    pub sweep_submission: String,
    pub sweep_log: PathBuf,
    pub optimal: OptimalConfiguration,
    pub optimal_plan: PhasePlan,
    pub optimal_submission: String,
}

/// Sequences probing, planning, submission and selection
pub struct TuningOrchestrator {
    scheduler: Arc<dyn SchedulerClient>,
    config: TuneConfig,
    calculator: ParameterCalculator,
    generator: ArtifactGenerator,
    selector: ResultSelector,
    cancel: watch::Receiver<bool>,
}

impl TuningOrchestrator {
    /// Create an orchestrator; flipping `cancel` to `true` aborts the run
    pub fn new(
        scheduler: Arc<dyn SchedulerClient>,
        config: TuneConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let generator = ArtifactGenerator::new(config.dat_path.to_string_lossy());
        Self {
            scheduler,
            calculator: ParameterCalculator::new(config.sweep.clone()),
            selector: ResultSelector::new(config.csv_path.clone()),
            generator,
            config,
            cancel,
        }
    }

    /// Read the current resource facts
    pub async fn probe(&self) -> Result<ResourceFacts> {
        ResourceProbe::new(self.scheduler.as_ref()).collect().await
    }

    /// Phase-1 parameters and artifacts for `facts`
    pub fn plan_sweep(&self, facts: &ResourceFacts) -> Result<PhasePlan> {
        let dat = self.calculator.sweep_dat(facts, self.config.nodes)?;
        self.plan(facts, dat)
    }

    /// Phase-2 parameters: the winner's grid, problem size and block size
    pub fn plan_optimal(
        &self,
        facts: &ResourceFacts,
        optimal: &OptimalConfiguration,
    ) -> Result<PhasePlan> {
        let dat = DatParameters {
            problem_sizes: vec![optimal.row.problem_size],
            block_sizes: vec![optimal.row.block_size],
            p: optimal.grid.p,
            q: optimal.grid.q,
        };
        self.plan(facts, dat)
    }

    fn plan(&self, facts: &ResourceFacts, dat: DatParameters) -> Result<PhasePlan> {
        let sbatch = self.calculator.sbatch(
            facts,
            &dat,
            self.config.nodes,
            &self.config.container_path,
            &self.config.workspace,
        )?;
        let artifacts = self.generator.generate(&dat, &sbatch)?;
        Ok(PhasePlan {
            dat,
            sbatch,
            artifacts,
        })
    }

    fn runner(&self) -> JobRunner {
        JobRunner::new(
            self.scheduler.clone(),
            self.config.job_name.clone(),
            self.config.user.clone(),
            self.config.dat_file_path(),
            self.config.poll,
            self.cancel.clone(),
        )
    }

    /// Run both phases to completion
    pub async fn run(&self) -> Result<TuningReport> {
        let runner = self.runner();

        let mut phase = TuningPhase::Sweep;
        tracing::info!(%phase, job = %runner.job_name(), nodes = self.config.nodes, "starting");
        let (sweep_submission, _) = self
            .run_phase(&runner, |facts| self.plan_sweep(facts))
            .await
            .map_err(|e| e.with_context(phase.to_string()))?;

        let sweep_log = self.config.output_log_for(job_id(&sweep_submission));
        let optimal = self
            .selector
            .select_from_file(&sweep_log)
            .await
            .map_err(|e| e.with_context(phase.to_string()))?;

        phase = TuningPhase::Optimal;
        tracing::info!(%phase, n = optimal.row.problem_size, nb = optimal.row.block_size, "starting");
        let (optimal_submission, optimal_plan) = self
            .run_phase(&runner, |facts| self.plan_optimal(facts, &optimal))
            .await
            .map_err(|e| e.with_context(phase.to_string()))?;

        phase = TuningPhase::Done;
        tracing::info!(%phase, gflops = optimal.row.gflops, "tuning finished");

        Ok(TuningReport {
            job_name: runner.job_name().to_string(),
            sweep_submission,
            sweep_log,
            optimal,
            optimal_plan,
            optimal_submission,
        })
    }

    async fn run_phase<F>(&self, runner: &JobRunner, plan: F) -> Result<(String, PhasePlan)>
    where
        F: FnOnce(&ResourceFacts) -> Result<PhasePlan>,
    {
        let facts = self.probe().await?;
        let plan = plan(&facts)?;
        let submission = runner.submit(&plan.artifacts).await?;

        match runner.await_completion().await {
            Ok(()) => Ok((submission, plan)),
            Err(TuneError::Cancelled) => {
                if let Err(e) = runner.cancel().await {
                    tracing::warn!("could not cancel job after abort: {}", e);
                }
                Err(TuneError::Cancelled)
            }
            Err(e) => Err(e),
        }
    }
}

/// Job id in an `sbatch --parsable` acknowledgement (`id` or `id;cluster`)
fn job_id(ack: &str) -> &str {
    ack.split(';').next().unwrap_or(ack).trim()
}
