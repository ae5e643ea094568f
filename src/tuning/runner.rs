//! Job submission and completion polling
//!
//! The `.dat` file is written to a fixed path before every submission, so two
//! runs sharing a working directory overwrite each other's input. Give each
//! concurrent run its own directory.

use super::types::BenchmarkArtifacts;
use crate::config::PollConfig;
use crate::error::{IoResultExt, Result, TuneError};
use crate::scheduler::{CancelRequest, FindRunningJobByNameRequest, SchedulerClient, SubmitRequest};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// Submits benchmark artifacts and waits for the job to leave the queue
pub struct JobRunner {
    scheduler: Arc<dyn SchedulerClient>,
    job_name: String,
    user: String,
    dat_path: PathBuf,
    poll: PollConfig,
    cancel: watch::Receiver<bool>,
}

impl JobRunner {
    /// Create a runner; `cancel` aborts polling as soon as it turns `true`
    pub fn new(
        scheduler: Arc<dyn SchedulerClient>,
        job_name: impl Into<String>,
        user: impl Into<String>,
        dat_path: impl Into<PathBuf>,
        poll: PollConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            scheduler,
            job_name: job_name.into(),
            user: user.into(),
            dat_path: dat_path.into(),
            poll,
            cancel,
        }
    }

    /// Name the jobs are submitted under
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Write the `.dat` file and submit the script
    pub async fn submit(&self, artifacts: &BenchmarkArtifacts) -> Result<String> {
        if let Some(parent) = self.dat_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.with_path(parent)?;
        }
        tokio::fs::write(&self.dat_path, &artifacts.dat_file)
            .await
            .with_path(&self.dat_path)?;

        let ack = self
            .scheduler
            .submit(&SubmitRequest {
                name: self.job_name.clone(),
                user: self.user.clone(),
                body: artifacts.sbatch_file.clone(),
            })
            .await?;

        tracing::info!(job = %self.job_name, ack = %ack, "benchmark submitted");
        Ok(ack)
    }

    /// Poll until no running job carries the job name
    ///
    /// Each attempt queries the scheduler once and sleeps `poll.delay` when
    /// the job is still there. Transient query failures use up an attempt.
    pub async fn await_completion(&self) -> Result<()> {
        let req = FindRunningJobByNameRequest {
            name: self.job_name.clone(),
            user: self.user.clone(),
        };
        let mut cancel = self.cancel.clone();
        let attempts = self.poll.max_attempts;

        for attempt in 1..=attempts {
            if *cancel.borrow() {
                return Err(TuneError::Cancelled);
            }

            match self.scheduler.find_running_job_by_name(&req).await {
                Err(TuneError::NotFound(_)) => {
                    tracing::info!(job = %self.job_name, attempt, "job completed");
                    return Ok(());
                }
                Ok(job_id) => {
                    tracing::info!(
                        job = %self.job_name,
                        job_id,
                        "still running (attempt {}/{}), next check in {}",
                        attempt,
                        attempts,
                        humantime::format_duration(self.poll.delay())
                    );
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        job = %self.job_name,
                        "job query failed (attempt {}/{}): {}",
                        attempt,
                        attempts,
                        e
                    );
                }
                Err(e) => return Err(e),
            }

            if attempt == attempts {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll.delay()) => {}
                changed = cancel.changed() => {
                    // A dropped sender can no longer cancel; keep waiting out the delay.
                    if changed.is_ok() && *cancel.borrow() {
                        return Err(TuneError::Cancelled);
                    }
                    if changed.is_err() {
                        tokio::time::sleep(self.poll.delay()).await;
                    }
                }
            }
        }

        Err(TuneError::Timeout {
            job: self.job_name.clone(),
            attempts,
        })
    }

    /// Cancel the job by name
    pub async fn cancel(&self) -> Result<()> {
        tracing::warn!(job = %self.job_name, "cancelling benchmark job");
        self.scheduler
            .cancel_job(&CancelRequest {
                name: self.job_name.clone(),
                user: self.user.clone(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::MockScheduler;
    use crate::tuning::ResourceFacts;
    use std::time::Duration;

    fn facts() -> ResourceFacts {
        ResourceFacts {
            mem_per_node_mb: 128,
            gpus_per_node: 4,
            cpus_per_node: 32,
            affinity_table: "0 0-7".into(),
        }
    }

    fn fast_poll(max_attempts: u32) -> PollConfig {
        PollConfig {
            max_attempts,
            delay_ms: 0,
        }
    }

    fn runner(
        scheduler: Arc<MockScheduler>,
        dat_path: PathBuf,
        poll: PollConfig,
    ) -> (JobRunner, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            JobRunner::new(scheduler, "HPL-Benchmark", "root", dat_path, poll, rx),
            tx,
        )
    }

    #[tokio::test]
    async fn test_submit_writes_dat_and_submits_script() {
        let dir = tempfile::tempdir().unwrap();
        let dat_path = dir.path().join("run").join("hpl.dat");
        let scheduler = Arc::new(MockScheduler::new(facts()));
        let (runner, _tx) = runner(scheduler.clone(), dat_path.clone(), fast_poll(1));

        let artifacts = BenchmarkArtifacts {
            dat_file: "testdatfile".into(),
            sbatch_file: "testsbatchfile".into(),
        };
        runner.submit(&artifacts).await.unwrap();

        assert_eq!(std::fs::read_to_string(&dat_path).unwrap(), "testdatfile");
        assert_eq!(
            scheduler.submissions(),
            vec![SubmitRequest {
                name: "HPL-Benchmark".into(),
                user: "root".into(),
                body: "testsbatchfile".into(),
            }]
        );

        // Fixed path: the next submission overwrites it
        let second = BenchmarkArtifacts {
            dat_file: "second".into(),
            sbatch_file: "script".into(),
        };
        runner.submit(&second).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dat_path).unwrap(), "second");
    }

    #[tokio::test]
    async fn test_submit_rejection_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(MockScheduler::new(facts()).rejecting_submissions());
        let (runner, _tx) = runner(scheduler, dir.path().join("hpl.dat"), fast_poll(1));

        let err = runner
            .submit(&BenchmarkArtifacts {
                dat_file: String::new(),
                sbatch_file: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TuneError::Submission { .. }));
    }

    #[tokio::test]
    async fn test_await_returns_on_first_not_found() {
        let scheduler = Arc::new(MockScheduler::new(facts()).with_running_polls([true, true, false]));
        let (runner, _tx) = runner(scheduler.clone(), PathBuf::from("hpl.dat"), fast_poll(60));

        runner.await_completion().await.unwrap();
        assert_eq!(scheduler.poll_count(), 3);
    }

    #[tokio::test]
    async fn test_await_times_out_after_budget() {
        let scheduler = Arc::new(MockScheduler::new(facts()).always_running());
        let (runner, _tx) = runner(scheduler.clone(), PathBuf::from("hpl.dat"), fast_poll(60));

        let err = runner.await_completion().await.unwrap_err();
        assert!(matches!(err, TuneError::Timeout { attempts: 60, .. }));
        assert_eq!(scheduler.poll_count(), 60);
    }

    #[tokio::test]
    async fn test_transient_failures_consume_attempts() {
        let scheduler = Arc::new(MockScheduler::new(facts()).unavailable());
        let (runner, _tx) = runner(scheduler.clone(), PathBuf::from("hpl.dat"), fast_poll(5));

        let err = runner.await_completion().await.unwrap_err();
        assert!(matches!(err, TuneError::Timeout { attempts: 5, .. }));
        assert_eq!(scheduler.poll_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let scheduler = Arc::new(MockScheduler::new(facts()).always_running());
        let (runner, tx) = runner(scheduler.clone(), PathBuf::from("hpl.dat"), PollConfig::default());

        let wait = tokio::spawn(async move { runner.await_completion().await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();

        let err = wait.await.unwrap().unwrap_err();
        assert!(matches!(err, TuneError::Cancelled));
        assert_eq!(scheduler.poll_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_first_poll() {
        let scheduler = Arc::new(MockScheduler::new(facts()));
        let (runner, tx) = runner(scheduler.clone(), PathBuf::from("hpl.dat"), fast_poll(3));
        tx.send(true).unwrap();

        assert!(matches!(runner.await_completion().await, Err(TuneError::Cancelled)));
        assert_eq!(scheduler.poll_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_job_by_name() {
        let scheduler = Arc::new(MockScheduler::new(facts()));
        let (runner, _tx) = runner(scheduler.clone(), PathBuf::from("hpl.dat"), fast_poll(1));

        runner.cancel().await.unwrap();
        assert_eq!(scheduler.cancellations()[0].name, "HPL-Benchmark");
    }
}
