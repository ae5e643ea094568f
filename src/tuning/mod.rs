//! Tuning engine
//!
//! Parameter computation, artifact rendering, job running and result
//! selection, sequenced by [`TuningOrchestrator`].

mod artifacts;
mod orchestrator;
mod params;
mod probe;
mod results;
mod runner;
mod types;

pub use artifacts::ArtifactGenerator;
pub use orchestrator::{PhasePlan, TuningOrchestrator, TuningPhase, TuningReport};
pub use params::{
    compute_affinity, compute_problem_sizes, compute_process_grid, ParameterCalculator, GB_TO_MB,
};
pub use probe::ResourceProbe;
pub use results::{
    parse_sweep_csv, parse_sweep_log, select_optimal, write_sweep_csv, ResultSelector, CSV_HEADER,
    RESULT_MARKER,
};
pub use runner::JobRunner;
pub use types::{
    BenchmarkArtifacts, DatParameters, OptimalConfiguration, ProcessGrid, ResourceFacts,
    SbatchParameters, SweepResultRow,
};
