//! Slurm implementation of [`SchedulerClient`]
//!
//! Every call shells out through an [`Executor`]. Output parsing lives in the
//! small `parse_*` functions at the bottom of this module so it can be tested
//! without a cluster.

use super::{CancelRequest, Executor, FindRunningJobByNameRequest, SchedulerClient, SubmitRequest};
use crate::config::DEFAULT_OUTPUT_LOG;
use crate::error::{Result, TuneError};
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use std::collections::HashMap;

/// QoS the benchmark jobs are submitted under
pub const QOS_NAME: &str = "benchmark";

/// Slurm scheduler client
pub struct SlurmClient<E> {
    executor: E,
    admin_user: String,
    qos: String,
    output_pattern: String,
}

impl<E: Executor> SlurmClient<E> {
    /// Create a client; resource probes run as `admin_user`
    pub fn new(executor: E, admin_user: impl Into<String>) -> Self {
        Self {
            executor,
            admin_user: admin_user.into(),
            qos: QOS_NAME.to_string(),
            output_pattern: DEFAULT_OUTPUT_LOG.to_string(),
        }
    }

    /// Set the `--output` pattern jobs are submitted with
    pub fn with_output_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.output_pattern = pattern.into();
        self
    }

    /// Set the QoS jobs are submitted under
    pub fn with_qos(mut self, qos: impl Into<String>) -> Self {
        self.qos = qos.into();
        self
    }

    fn submit_command(&self, req: &SubmitRequest, eof: &str) -> String {
        format!(
            "sbatch \\\n  --job-name={} \\\n  --qos={} \\\n  --output={} \\\n  --parsable << '{}'\n{}\n{}",
            req.name, self.qos, self.output_pattern, eof, req.body, eof
        )
    }

    async fn node_tres(&self, fact: &'static str) -> Result<HashMap<String, String>> {
        let out = self
            .executor
            .exec_as(&self.admin_user, "scontrol show nodes")
            .await
            .map_err(|e| TuneError::probe(fact, e.to_string()))?;
        parse_cfg_tres(&out).map_err(|e| TuneError::probe(fact, e.to_string()))
    }
}

#[async_trait]
impl<E: Executor> SchedulerClient for SlurmClient<E> {
    async fn submit(&self, req: &SubmitRequest) -> Result<String> {
        let eof = heredoc_delimiter();
        let cmd = self.submit_command(req, &eof);

        let out = self
            .executor
            .exec_as(&req.user, &cmd)
            .await
            .map_err(|e| TuneError::submission(&req.name, e.to_string()))?;

        let ack = out.trim().to_string();
        if ack.is_empty() {
            return Err(TuneError::submission(&req.name, "sbatch returned no job id"));
        }
        tracing::info!(job = %req.name, ack = %ack, "submitted batch job");
        Ok(ack)
    }

    async fn cancel_job(&self, req: &CancelRequest) -> Result<()> {
        let cmd = format!("scancel --name={} --me", req.name);
        self.executor
            .exec_as(&req.user, &cmd)
            .await
            .map_err(|e| TuneError::Cancellation {
                job: req.name.clone(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        self.executor
            .exec_as(&self.admin_user, "squeue")
            .await
            .map_err(|e| TuneError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn find_running_job_by_name(&self, req: &FindRunningJobByNameRequest) -> Result<u64> {
        let cmd = format!("squeue --name {} -O ArrayJobId:256 --noheader", req.name);
        let out = self.executor.exec_as(&req.user, &cmd).await?;
        parse_job_id(&out)?.ok_or_else(|| TuneError::NotFound(req.name.clone()))
    }

    async fn find_mem_per_node(&self) -> Result<u64> {
        let tres = self.node_tres("memory per node").await?;
        let mem = tres
            .get("mem")
            .ok_or_else(|| TuneError::probe("memory per node", "CfgTRES has no mem entry"))?;
        parse_mem_mb(mem).map_err(|e| TuneError::probe("memory per node", e.to_string()))
    }

    async fn find_gpu_per_node(&self) -> Result<u32> {
        let tres = self.node_tres("GPUs per node").await?;
        let gpus = tres
            .get("gres/gpu")
            .ok_or_else(|| TuneError::probe("GPUs per node", "CfgTRES has no gres/gpu entry"))?;
        gpus.parse()
            .map_err(|_| TuneError::probe("GPUs per node", format!("invalid GPU count '{}'", gpus)))
    }

    async fn find_cpu_per_node(&self) -> Result<u32> {
        let tres = self.node_tres("CPUs per node").await?;
        let cpus = tres
            .get("cpu")
            .ok_or_else(|| TuneError::probe("CPUs per node", "CfgTRES has no cpu entry"))?;
        cpus.parse()
            .map_err(|_| TuneError::probe("CPUs per node", format!("invalid CPU count '{}'", cpus)))
    }

    async fn find_cpu_affinity(&self) -> Result<String> {
        let out = self
            .executor
            .exec_as(&self.admin_user, "nvidia-smi topo -m")
            .await
            .map_err(|e| TuneError::probe("CPU affinity", e.to_string()))?;
        parse_topology(&out).map_err(|e| TuneError::probe("CPU affinity", e.to_string()))
    }
}

fn heredoc_delimiter() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    format!("EOF_{}", suffix)
}

/// First job id of an `squeue -O ArrayJobId --noheader` listing, `None` when
/// the listing is empty
pub fn parse_job_id(out: &str) -> Result<Option<u64>> {
    match out.lines().map(str::trim).find(|l| !l.is_empty()) {
        None => Ok(None),
        Some(line) => line
            .parse()
            .map(Some)
            .map_err(|_| TuneError::Parse(format!("invalid job id '{}'", line))),
    }
}

/// `CfgTRES` entries of the first node in `scontrol show nodes` output
pub fn parse_cfg_tres(out: &str) -> Result<HashMap<String, String>> {
    let re = Regex::new(r"CfgTRES=(\S+)").expect("static regex");
    let caps = re
        .captures(out)
        .ok_or_else(|| TuneError::Parse("no CfgTRES line in scontrol output".into()))?;

    Ok(caps[1]
        .split(',')
        .filter_map(|entry| entry.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect())
}

/// Memory TRES value (`515000M`, `512G`, `2T`, bare numbers are MB) in MB
pub fn parse_mem_mb(value: &str) -> Result<u64> {
    let re = Regex::new(r"^(\d+)([KMGT]?)$").expect("static regex");
    let caps = re
        .captures(value.trim())
        .ok_or_else(|| TuneError::Parse(format!("invalid memory value '{}'", value)))?;
    let n: u64 = caps[1]
        .parse()
        .map_err(|_| TuneError::Parse(format!("invalid memory value '{}'", value)))?;

    Ok(match &caps[2] {
        "K" => n / 1024,
        "G" => n * 1024,
        "T" => n * 1024 * 1024,
        _ => n,
    })
}

/// Reduce an `nvidia-smi topo -m` matrix to `<gpu index> <cpu affinity>` lines
pub fn parse_topology(out: &str) -> Result<String> {
    let ansi = Regex::new(r"\x1b\[[0-9;]*m").expect("static regex");
    let gpu_row = Regex::new(r"^GPU(\d+)$").expect("static regex");
    let cpu_range = Regex::new(r"^\d+-\d+").expect("static regex");
    let clean = ansi.replace_all(out, "");

    let mut affinity_col = None;
    let mut rows = Vec::new();

    for line in clean.lines() {
        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        if affinity_col.is_none() {
            affinity_col = fields.iter().position(|f| *f == "CPU Affinity");
            if affinity_col.is_some() {
                continue;
            }
        }
        let Some(gpu) = fields.first().and_then(|f| gpu_row.captures(f)) else {
            continue;
        };

        let cpus = match affinity_col {
            Some(col) => fields.get(col).copied(),
            None => fields.iter().skip(1).copied().find(|f| cpu_range.is_match(f)),
        };
        if let Some(cpus) = cpus.filter(|c| cpu_range.is_match(c)) {
            rows.push(format!("{} {}", &gpu[1], cpus));
        }
    }

    if rows.is_empty() {
        return Err(TuneError::Parse("no GPU rows in topology matrix".into()));
    }
    Ok(rows.join("\n"))
}
