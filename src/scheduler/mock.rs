//! Scripted in-memory scheduler
//!
//! Answers resource probes from fixed facts, records every submission and
//! replays a queue of "still running" answers for completion polling. Used by
//! the test suites and by `hpltune plan` when facts are given on the command
//! line.

use super::{CancelRequest, FindRunningJobByNameRequest, SchedulerClient, SubmitRequest};
use crate::error::{Result, TuneError};
use crate::tuning::ResourceFacts;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// In-memory [`SchedulerClient`]
pub struct MockScheduler {
    facts: ResourceFacts,
    running: Mutex<VecDeque<bool>>,
    submissions: Mutex<Vec<SubmitRequest>>,
    cancellations: Mutex<Vec<CancelRequest>>,
    polls: Mutex<u32>,
    next_job_id: Mutex<u64>,
    reject_submissions: bool,
    unavailable: bool,
}

impl MockScheduler {
    /// Create a scheduler reporting `facts`; jobs finish immediately
    pub fn new(facts: ResourceFacts) -> Self {
        Self {
            facts,
            running: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            cancellations: Mutex::new(Vec::new()),
            polls: Mutex::new(0),
            next_job_id: Mutex::new(1000),
            reject_submissions: false,
            unavailable: false,
        }
    }

    /// Queue answers for successive running-job lookups: `true` reports the
    /// job as still running. Once the queue is drained the job is gone.
    pub fn with_running_polls(self, polls: impl IntoIterator<Item = bool>) -> Self {
        self.running.lock().unwrap().extend(polls);
        self
    }

    /// Report the job as running for every lookup
    pub fn always_running(self) -> Self {
        self.with_running_polls(std::iter::repeat(true).take(10_000))
    }

    /// Reject every submission
    pub fn rejecting_submissions(mut self) -> Self {
        self.reject_submissions = true;
        self
    }

    /// Fail every query as unavailable
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Submissions received so far
    pub fn submissions(&self) -> Vec<SubmitRequest> {
        self.submissions.lock().unwrap().clone()
    }

    /// Cancellations received so far
    pub fn cancellations(&self) -> Vec<CancelRequest> {
        self.cancellations.lock().unwrap().clone()
    }

    /// Number of running-job lookups answered
    pub fn poll_count(&self) -> u32 {
        *self.polls.lock().unwrap()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            Err(TuneError::Unavailable("mock scheduler is down".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SchedulerClient for MockScheduler {
    async fn submit(&self, req: &SubmitRequest) -> Result<String> {
        if self.reject_submissions {
            return Err(TuneError::submission(&req.name, "rejected by mock scheduler"));
        }
        self.submissions.lock().unwrap().push(req.clone());
        let mut id = self.next_job_id.lock().unwrap();
        *id += 1;
        Ok(id.to_string())
    }

    async fn cancel_job(&self, req: &CancelRequest) -> Result<()> {
        self.check_available()?;
        self.cancellations.lock().unwrap().push(req.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        self.check_available()
    }

    async fn find_running_job_by_name(&self, req: &FindRunningJobByNameRequest) -> Result<u64> {
        *self.polls.lock().unwrap() += 1;
        self.check_available()?;
        match self.running.lock().unwrap().pop_front() {
            Some(true) => Ok(*self.next_job_id.lock().unwrap()),
            _ => Err(TuneError::NotFound(req.name.clone())),
        }
    }

    async fn find_mem_per_node(&self) -> Result<u64> {
        Ok(self.facts.mem_per_node_mb)
    }

    async fn find_gpu_per_node(&self) -> Result<u32> {
        Ok(self.facts.gpus_per_node)
    }

    async fn find_cpu_per_node(&self) -> Result<u32> {
        Ok(self.facts.cpus_per_node)
    }

    async fn find_cpu_affinity(&self) -> Result<String> {
        Ok(self.facts.affinity_table.clone())
    }
}
