// src/coordinator.rs

//! The build coordinator: a single actor that owns the configuration, the
//! in-flight job set, the overflow queue, the timing session and the
//! loaded-libraries set. All mutations are serialized through its request
//! channel; replies travel back over oneshot channels.
//!
//! Enqueued jobs launch a runner immediately while a slot is free (at most
//! `max_jobs` at any instant) and queue otherwise; every completion frees a
//! slot and launches the next queued job.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::cli::Config;
use crate::errors::{ExMakeError, Result};
use crate::runner;
use crate::script::{Rule, ScriptEvaluator};
use crate::timing::TimerSession;

/// Opaque per-job datum carried from enqueue to completion; the worker uses
/// it to identify the graph vertex a completion belongs to.
pub type JobData = usize;

/// Outcome of one job, delivered to the enqueuing owner.
#[derive(Debug, Clone)]
pub enum JobResult {
    Ok,
    Failed(ExMakeError),
}

/// Completion message forwarded to the job's owner.
#[derive(Debug, Clone)]
pub struct JobDone {
    pub rule: Rule,
    pub data: JobData,
    pub result: JobResult,
}

/// Channel end a job owner listens on for completions.
pub type OwnerSender = mpsc::UnboundedSender<JobDone>;

struct JobSpec {
    rule: Rule,
    data: JobData,
    owner: OwnerSender,
}

type TimerFn = Box<dyn FnOnce(Option<TimerSession>) -> Option<TimerSession> + Send>;

enum Request {
    SetCfg(Config, oneshot::Sender<()>),
    GetCfg(oneshot::Sender<Config>),
    Enqueue {
        rule: Rule,
        data: JobData,
        owner: OwnerSender,
        reply: oneshot::Sender<()>,
    },
    Done {
        job_id: u64,
        result: JobResult,
    },
    ApplyTimer(TimerFn, oneshot::Sender<Option<TimerSession>>),
    GetLibs(oneshot::Sender<HashSet<String>>),
    AddLib(String, oneshot::Sender<bool>),
    DelLib(String, oneshot::Sender<()>),
    ClearLibs(oneshot::Sender<()>),
}

struct Coordinator {
    config: Config,
    max_jobs: usize,
    jobs: HashMap<u64, JobSpec>,
    queue: VecDeque<JobSpec>,
    timing: Option<TimerSession>,
    libraries: HashSet<String>,
    next_job_id: u64,
    evaluator: Arc<dyn ScriptEvaluator>,
    self_tx: mpsc::Sender<Request>,
}

impl Coordinator {
    async fn run(mut self, mut rx: mpsc::Receiver<Request>) {
        debug!("coordinator started");
        while let Some(request) = rx.recv().await {
            self.handle(request);
        }
        debug!("coordinator stopped (request channel closed)");
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::SetCfg(config, reply) => {
                self.max_jobs = config.options.jobs.max(1);
                self.config = config;
                let _ = reply.send(());
            }
            Request::GetCfg(reply) => {
                let _ = reply.send(self.config.clone());
            }
            Request::Enqueue {
                rule,
                data,
                owner,
                reply,
            } => {
                // Reply first: enqueue always returns immediately.
                let _ = reply.send(());
                let job = JobSpec { rule, data, owner };
                if self.jobs.len() < self.max_jobs {
                    self.launch(job);
                } else {
                    debug!(rule = %job.rule.label(), "all job slots busy; queueing");
                    self.queue.push_back(job);
                }
            }
            Request::Done { job_id, result } => {
                let Some(job) = self.jobs.remove(&job_id) else {
                    warn!(job_id, "completion for unknown job; ignoring");
                    return;
                };
                let done = JobDone {
                    rule: job.rule,
                    data: job.data,
                    result,
                };
                if job.owner.send(done).is_err() {
                    warn!(job_id, "job owner is gone; dropping completion");
                }
                if self.jobs.len() < self.max_jobs {
                    if let Some(next) = self.queue.pop_front() {
                        self.launch(next);
                    }
                }
            }
            Request::ApplyTimer(f, reply) => {
                self.timing = f(self.timing.take());
                let _ = reply.send(self.timing.clone());
            }
            Request::GetLibs(reply) => {
                let _ = reply.send(self.libraries.clone());
            }
            Request::AddLib(name, reply) => {
                let _ = reply.send(self.libraries.insert(name));
            }
            Request::DelLib(name, reply) => {
                self.libraries.remove(&name);
                let _ = reply.send(());
            }
            Request::ClearLibs(reply) => {
                self.libraries.clear();
                let _ = reply.send(());
            }
        }
    }

    fn launch(&mut self, job: JobSpec) {
        let job_id = self.next_job_id;
        self.next_job_id += 1;

        let rule = job.rule.clone();
        let evaluator = self.evaluator.clone();
        let tx = self.self_tx.clone();
        debug!(job_id, rule = %rule.label(), "launching runner");
        self.jobs.insert(job_id, job);

        tokio::spawn(async move {
            let result = runner::run_job(rule, evaluator).await;
            let _ = tx.send(Request::Done { job_id, result }).await;
        });
    }
}

/// Cloneable client surface of the coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Request>,
}

impl CoordinatorHandle {
    /// Spawn the coordinator actor and return its handle.
    pub fn spawn(evaluator: Arc<dyn ScriptEvaluator>) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let coordinator = Coordinator {
            config: Config::default(),
            max_jobs: 1,
            jobs: HashMap::new(),
            queue: VecDeque::new(),
            timing: None,
            libraries: HashSet::new(),
            next_job_id: 0,
            evaluator,
            self_tx: tx.clone(),
        };
        tokio::spawn(coordinator.run(rx));
        Self { tx }
    }

    async fn request<T, F>(&self, build: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<T>) -> Request,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| closed())?;
        reply_rx.await.map_err(|_| closed())
    }

    /// Replace the configuration; the jobs bound follows `options.jobs`.
    pub async fn set_cfg(&self, config: Config) -> Result<()> {
        self.request(|reply| Request::SetCfg(config, reply)).await
    }

    pub async fn get_cfg(&self) -> Result<Config> {
        self.request(Request::GetCfg).await
    }

    /// Hand a job to the pool. Launches a runner when a slot is free and
    /// queues otherwise; replies as soon as the job is accepted.
    pub async fn enqueue(&self, rule: Rule, data: JobData, owner: OwnerSender) -> Result<()> {
        self.request(|reply| Request::Enqueue {
            rule,
            data,
            owner,
            reply,
        })
        .await
    }

    /// Replace the timing session with `f(timing)`; returns the new value.
    pub async fn apply_timer<F>(&self, f: F) -> Result<Option<TimerSession>>
    where
        F: FnOnce(Option<TimerSession>) -> Option<TimerSession> + Send + 'static,
    {
        self.request(|reply| Request::ApplyTimer(Box::new(f), reply))
            .await
    }

    pub async fn libraries(&self) -> Result<HashSet<String>> {
        self.request(Request::GetLibs).await
    }

    /// Returns true when the library was not in the set yet.
    pub async fn add_library(&self, name: impl Into<String>) -> Result<bool> {
        let name = name.into();
        self.request(|reply| Request::AddLib(name, reply)).await
    }

    pub async fn remove_library(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.request(|reply| Request::DelLib(name, reply)).await
    }

    pub async fn clear_libraries(&self) -> Result<()> {
        self.request(Request::ClearLibs).await
    }
}

fn closed() -> ExMakeError {
    ExMakeError::Throw("coordinator is not running".to_string())
}
