//! Benchmark artifact rendering
//!
//! Produces the HPL `.dat` input and the `sbatch` script. Rendering is a pure
//! function of the parameters: identical inputs give byte-identical output.

use super::types::{BenchmarkArtifacts, DatParameters, SbatchParameters};
use crate::config::DEFAULT_DAT_PATH;
use crate::error::{Result, TuneError};

/// Path the `.dat` file is mounted at inside the container
const CONTAINER_DAT_PATH: &str = "/test.dat";

/// Fixed HPL algorithm settings following the process-grid lines
const DAT_TAIL: &str = "16.0         threshold
1            # of panel fact
2            PFACTs (0=left, 1=Crout, 2=Right)
1            # of recursive stopping criterium
4            NBMINs (>= 1)
1            # of panels in recursion
2            NDIVs
1            # of recursive panel fact.
1            RFACTs (0=left, 1=Crout, 2=Right)
1            # of broadcast
1            BCASTs (0=1rg,1=1rM,2=2rg,3=2rM,4=Lng,5=LnM)
1            # of lookahead depth
1            DEPTHs (>=0)
2            SWAP (0=bin-exch,1=long,2=mix)
64           swapping threshold
1            L1 in (0=transposed,1=no-transposed) form
0            U  in (0=transposed,1=no-transposed) form
1            Equilibration (0=no,1=yes)
8            memory alignment in double (> 0)
##### This line (no. 32) is ignored (it serves as a separator). ######
0                               Number of additional problem sizes for PTRANS
1200 10000 30000                values of N
0                               number of additional blocking sizes for PTRANS
40 9 8 13 13 20 16 32 64        values of NB
";

const MPI_ENV: &str = "export PMIX_MCA_pml=ob1
export PMIX_MCA_btl=vader,self,tcp
export OMPI_MCA_pml=ob1
export OMPI_MCA_btl=vader,self,tcp
";

/// Renders [`BenchmarkArtifacts`] from phase parameters
#[derive(Debug, Clone)]
pub struct ArtifactGenerator {
    dat_file_name: String,
}

impl ArtifactGenerator {
    /// Create a generator mounting `dat_file_name` into the container
    pub fn new(dat_file_name: impl Into<String>) -> Self {
        Self {
            dat_file_name: dat_file_name.into(),
        }
    }

    /// Render both artifacts; the script layout follows the node count
    pub fn generate(&self, dat: &DatParameters, sbatch: &SbatchParameters) -> Result<BenchmarkArtifacts> {
        let dat_file = self.render_dat(dat)?;
        let sbatch_file = if sbatch.node_count == 1 {
            self.render_single_node(sbatch)?
        } else {
            self.render_multi_node(sbatch)?
        };

        Ok(BenchmarkArtifacts {
            dat_file,
            sbatch_file,
        })
    }

    /// Render the HPL numeric-parameters file
    pub fn render_dat(&self, dat: &DatParameters) -> Result<String> {
        if dat.problem_sizes.is_empty() {
            return Err(TuneError::template("dat", "problem_sizes"));
        }
        if dat.block_sizes.is_empty() {
            return Err(TuneError::template("dat", "block_sizes"));
        }
        if dat.p == 0 {
            return Err(TuneError::template("dat", "p"));
        }
        if dat.q == 0 {
            return Err(TuneError::template("dat", "q"));
        }

        let mut out = String::from(
            "HPLinpack benchmark input file\n\
             Innovative Computing Laboratory, University of Tennessee\n\
             HPL.out      output file name (if any)\n\
             6            device out (6=stdout,7=stderr,file)\n",
        );
        out.push_str(&format!(
            "{}         # of problems sizes (N)\n",
            dat.problem_sizes.len()
        ));
        out.push_str(&format!("{}        Ns\n", join(&dat.problem_sizes)));
        out.push_str(&format!("{}           # of NBs\n", dat.block_sizes.len()));
        out.push_str(&format!("{}  NBs\n", join(&dat.block_sizes)));
        out.push_str("0            PMAP process mapping (0=Row-,1=Column-major)\n");
        out.push_str("1            # of process grids (P x Q)\n");
        out.push_str(&format!("{}     Ps\n", dat.p));
        out.push_str(&format!("{}      Qs\n", dat.q));
        out.push_str(DAT_TAIL);
        Ok(out)
    }

    /// Script for one node; paths are relative to the submit directory
    pub fn render_single_node(&self, sbatch: &SbatchParameters) -> Result<String> {
        check_sbatch(sbatch)?;

        let mut script = sbatch_header(sbatch);
        script.push_str(&format!(
            "srun  --mpi=pmix_v4 --cpu-bind=none --gpu-bind=none --container-image=\"{}\" \\\n",
            locate("$(pwd)", &sbatch.container_path)
        ));
        script.push_str(&format!(
            "  --container-mounts=\"{}:{}\" {}\n",
            locate("$(pwd)", &self.dat_file_name),
            CONTAINER_DAT_PATH,
            hpl_invocation(sbatch)
        ));
        Ok(script)
    }

    /// Script for several nodes; paths live in the shared workspace
    pub fn render_multi_node(&self, sbatch: &SbatchParameters) -> Result<String> {
        check_sbatch(sbatch)?;
        if sbatch.workspace.is_empty() {
            return Err(TuneError::template("sbatch", "workspace"));
        }

        let mut script = sbatch_header(sbatch);
        script.push_str(&format!("cd {}\n\n", sbatch.workspace));
        script.push_str(&format!(
            "srun  --mpi=pmix_v4 --cpu-bind=none --gpu-bind=none --container-image=\"{}\" \\\n",
            locate(&sbatch.workspace, &sbatch.container_path)
        ));
        script.push_str(&format!(
            "  --container-mounts=\"{}:{}\" {}\n",
            locate(&sbatch.workspace, &self.dat_file_name),
            CONTAINER_DAT_PATH,
            hpl_invocation(sbatch)
        ));
        Ok(script)
    }
}

impl Default for ArtifactGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_DAT_PATH)
    }
}

fn check_sbatch(sbatch: &SbatchParameters) -> Result<()> {
    let missing = if sbatch.node_count == 0 {
        Some("node_count")
    } else if sbatch.tasks_per_node == 0 {
        Some("tasks_per_node")
    } else if sbatch.cpus_per_task == 0 {
        Some("cpus_per_task")
    } else if sbatch.gpus_per_node == 0 {
        Some("gpus_per_node")
    } else if sbatch.cpu_affinity.is_empty() {
        Some("cpu_affinity")
    } else if sbatch.gpu_affinity.is_empty() {
        Some("gpu_affinity")
    } else if sbatch.container_path.is_empty() {
        Some("container_path")
    } else {
        None
    };

    match missing {
        Some(field) => Err(TuneError::template("sbatch", field)),
        None => Ok(()),
    }
}

fn sbatch_header(sbatch: &SbatchParameters) -> String {
    let mut script = String::from("#!/bin/sh\n\n");
    script.push_str(&format!("#SBATCH -N {}\n", sbatch.node_count));
    script.push_str(&format!("#SBATCH --ntasks-per-node={}\n", sbatch.tasks_per_node));
    script.push_str(&format!("#SBATCH --gpus-per-node={}\n", sbatch.gpus_per_node));
    script.push_str("#SBATCH --mem=0\n");
    script.push_str(&format!("#SBATCH --cpus-per-task={}\n", sbatch.cpus_per_task));
    script.push('\n');
    script.push_str(MPI_ENV);
    script.push('\n');
    script
}

fn hpl_invocation(sbatch: &SbatchParameters) -> String {
    format!(
        "sh -c 'sed -Ei \"s/:1//g\" ./hpl.sh && ./hpl.sh --xhpl-ai --cpu-affinity {} --cpu-cores-per-rank {} --gpu-affinity {} --dat \"{}\"'",
        sbatch.cpu_affinity, sbatch.cpus_per_task, sbatch.gpu_affinity, CONTAINER_DAT_PATH
    )
}

fn locate(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), path)
    }
}

fn join<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
