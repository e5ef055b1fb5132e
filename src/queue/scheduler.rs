//! Job queue and its poll loop
//!
//! The queue is sorted by `(state, -prio)`, so the next runnable job is
//! always first after a sort. A background task wakes up every poll
//! interval and, if no job is running, launches the first QUEUED job.

use super::{Job, JobId, JobState, JobSummary};
use crate::config::{Configuration, GENERAL_SECTION};
use crate::error::ConfigError;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Timing of the poll loop and of calls into workers
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub poll_interval: Duration,
    /// How often `run` is tried while a new worker starts its server
    pub connect_attempts: u32,
    pub connect_delay: Duration,
    /// Timeout for status and abort calls into workers
    pub rpc_timeout: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            connect_attempts: 20,
            connect_delay: Duration::from_millis(500),
            rpc_timeout: Duration::from_secs(2),
        }
    }
}

impl QueueSettings {
    /// Read the `general` section
    pub fn from_config(config: &Configuration) -> Result<Self, ConfigError> {
        let poll = config.get(GENERAL_SECTION, "poll_interval")?;
        let poll_interval = poll
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
            .ok_or(ConfigError::InvalidValue {
                section: GENERAL_SECTION.to_string(),
                key: "poll_interval".to_string(),
                value: poll,
                expected: "positive number of seconds",
            })?;

        let millis = |key: &str| -> Result<Duration, ConfigError> {
            Ok(Duration::from_millis(
                config.getint(GENERAL_SECTION, key)?.max(0) as u64,
            ))
        };

        Ok(Self {
            poll_interval,
            connect_attempts: config
                .getint(GENERAL_SECTION, "connect_attempts")?
                .clamp(1, u32::MAX as i64) as u32,
            connect_delay: millis("connect_delay_ms")?,
            rpc_timeout: millis("info_timeout_ms")?,
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            connect_attempts: 2,
            connect_delay: Duration::from_millis(20),
            rpc_timeout: Duration::from_millis(300),
        }
    }
}

struct PollLoop {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PollLoop {
    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Priority queue of jobs with at most one RUNNING job
pub struct JobQueue {
    jobs: Mutex<Vec<Job>>,
    next_jid: AtomicI64,
    settings: QueueSettings,
    poll: Mutex<Option<PollLoop>>,
}

impl JobQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            next_jid: AtomicI64::new(1),
            settings,
            poll: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    fn next_jid(&self) -> JobId {
        self.next_jid.fetch_add(1, Ordering::SeqCst)
    }

    /// Queue the case document at `config_path`
    pub fn enqueue(&self, prio: i64, config_path: &Path) -> Result<JobId, ConfigError> {
        let job = Job::load(self.next_jid(), prio, config_path)?;
        Ok(self.push(job))
    }

    /// Queue a job with an already resolved configuration
    pub fn put(&self, prio: i64, config_path: &Path, config: Configuration) -> JobId {
        let job = Job::new(self.next_jid(), prio, config_path.to_path_buf(), config);
        self.push(job)
    }

    fn push(&self, job: Job) -> JobId {
        let jid = job.jid();
        log::info!(
            "Job {} queued: {} (prio {})",
            jid,
            job.config_path().display(),
            job.prio()
        );
        self.jobs.lock().push(job);
        jid
    }

    /// Remove a job; 0 if there is no such job or it is running
    pub fn delete(&self, jid: JobId) -> JobId {
        let mut jobs = self.jobs.lock();
        let Some(index) = jobs.iter().position(|j| j.jid() == jid) else {
            log::warn!("Trying to delete non-existent job {}", jid);
            return 0;
        };
        jobs[index].refresh();
        if jobs[index].state() == JobState::Running {
            log::warn!("Job {} is running, abort it before deleting", jid);
            return 0;
        }
        jobs.remove(index);
        log::info!("Job {} deleted", jid);
        jid
    }

    /// Change a job's priority; -1 if there is no such job
    pub fn reprio(&self, jid: JobId, prio: i64) -> JobId {
        let mut jobs = self.jobs.lock();
        match jobs.iter_mut().find(|j| j.jid() == jid) {
            Some(job) => {
                job.set_prio(prio);
                sort(&mut jobs);
                log::info!("Priority of job {} changed to {}", jid, prio);
                jid
            }
            None => {
                log::warn!("Trying to reprioritize non-existent job {}", jid);
                -1
            }
        }
    }

    /// Abort a running job.
    ///
    /// The worker is asked over RPC; with `force`, or when the worker cannot
    /// be reached, its process is killed instead. Returns whether anything
    /// was done.
    pub async fn abort(&self, jid: JobId, force: bool) -> bool {
        let client = {
            let mut jobs = self.jobs.lock();
            let Some(job) = jobs.iter_mut().find(|j| j.jid() == jid) else {
                log::warn!("Trying to abort non-existent job {}", jid);
                return false;
            };
            job.refresh();
            if job.state() != JobState::Running {
                log::info!("Job {} is {}, nothing to abort", jid, job.state());
                return false;
            }
            log::info!("Aborting job {}{}", jid, if force { " (forced)" } else { "" });
            if force {
                return job.kill();
            }
            job.client().cloned()
        };

        let result = match client {
            Some(client) => client.abort(self.settings.rpc_timeout).await,
            None => return false,
        };
        match result {
            Ok(()) => true,
            Err(e) if e.is_unreachable() => {
                log::warn!("Job {}: worker unreachable ({}), killing it", jid, e);
                self.kill(jid)
            }
            Err(e) => {
                log::warn!("Job {}: abort request failed: {}", jid, e);
                false
            }
        }
    }

    fn kill(&self, jid: JobId) -> bool {
        self.jobs
            .lock()
            .iter_mut()
            .find(|j| j.jid() == jid)
            .is_some_and(|job| job.kill())
    }

    /// Sorted summaries. Running jobs are asked for their active task.
    pub async fn list(&self) -> Vec<JobSummary> {
        let (mut summaries, clients) = {
            let mut jobs = self.jobs.lock();
            jobs.iter_mut().for_each(Job::refresh);
            sort(&mut jobs);
            let summaries: Vec<JobSummary> = jobs.iter().map(Job::summary).collect();
            let clients: Vec<_> = jobs
                .iter()
                .map(|j| {
                    (j.state() == JobState::Running)
                        .then(|| j.client().cloned())
                        .flatten()
                })
                .collect();
            (summaries, clients)
        };

        let timeout = self.settings.rpc_timeout;
        for (summary, client) in summaries.iter_mut().zip(clients) {
            let Some(client) = client else { continue };
            match client.active_worker(timeout).await {
                Ok(name) => summary.active_worker = name,
                Err(e) => log::debug!("Job {}: active_worker unavailable: {}", summary.jid, e),
            }
            match client.worker_info(timeout).await {
                Ok(info) => summary.worker_info = info,
                Err(e) => log::debug!("Job {}: worker_info unavailable: {}", summary.jid, e),
            }
        }
        summaries
    }

    /// Job ids and states in queue order
    pub fn states(&self) -> Vec<(JobId, JobState)> {
        let mut jobs = self.jobs.lock();
        jobs.iter_mut().for_each(Job::refresh);
        sort(&mut jobs);
        jobs.iter().map(|j| (j.jid(), j.state())).collect()
    }

    pub fn running_jobs(&self) -> Vec<JobId> {
        let mut jobs = self.jobs.lock();
        jobs.iter_mut()
            .filter_map(|j| {
                j.refresh();
                (j.state() == JobState::Running).then(|| j.jid())
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Launch the highest priority QUEUED job unless one is running.
    ///
    /// `None` when nothing was started, including a job that failed to launch.
    pub fn start_next(&self) -> Option<JobId> {
        let mut jobs = self.jobs.lock();
        jobs.iter_mut().for_each(Job::refresh);
        if jobs.iter().any(|j| j.state() == JobState::Running) {
            return None;
        }
        sort(&mut jobs);
        let job = jobs.first_mut().filter(|j| j.state() == JobState::Queued)?;
        job.launch(&self.settings).then(|| job.jid())
    }

    /// Start the poll loop; false if it is already running
    pub fn start(self: &Arc<Self>) -> bool {
        let mut poll = self.poll.lock();
        if poll.as_ref().is_some_and(PollLoop::is_alive) {
            log::warn!("Queue already started");
            return false;
        }
        let (stop, stopped) = watch::channel(false);
        let handle = tokio::spawn(poll_loop(
            Arc::downgrade(self),
            stopped,
            self.settings.poll_interval,
        ));
        *poll = Some(PollLoop { stop, handle });
        log::info!("Queue started");
        true
    }

    /// Stop launching jobs; a running job is not affected
    pub fn stop(&self) -> bool {
        log::info!("Stopping queue");
        if let Some(poll) = self.poll.lock().take() {
            let _ = poll.stop.send(true);
        }
        true
    }

    /// RUNNING while the poll loop is alive, STOPPED otherwise
    pub fn state(&self) -> JobState {
        if self.poll.lock().as_ref().is_some_and(PollLoop::is_alive) {
            JobState::Running
        } else {
            JobState::Stopped
        }
    }
}

fn sort(jobs: &mut [Job]) {
    jobs.sort_by_key(|j| (j.state(), Reverse(j.prio())));
}

async fn poll_loop(queue: Weak<JobQueue>, mut stop: watch::Receiver<bool>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(queue) = queue.upgrade() else { break };
                if let Some(jid) = queue.start_next() {
                    log::debug!("Poll loop launched job {}", jid);
                }
            }
        }
    }
    log::info!("Queue stopped");
}
