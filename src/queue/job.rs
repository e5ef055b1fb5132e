//! Jobs - one case run backed by a worker process
//!
//! A job's state is never stored. It is derived from the worker process:
//! no process means QUEUED, a live process RUNNING, and the exit code of a
//! finished process decides between FINISHED, ABORTED and FAILED.

use super::QueueSettings;
use crate::config::{Configuration, GENERAL_SECTION};
use crate::core::{placeholders, Context};
use crate::document::CaseDocument;
use crate::error::{ConfigError, ABORTED_EXIT_CODE};
use crate::rpc::WorkerClient;
use chrono::{DateTime, Utc};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};

/// Job identifier, never reused within one master
pub type JobId = i64;

/// Placeholders understood in `general.worker_command`
const WORKER_COMMAND_KEYS: [&str; 4] = ["exe", "config", "port", "jid"];

/// Job state, ordered the way the queue sorts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Running,
    Finished,
    Stopped,
    Aborted,
    Failed,
}

impl JobState {
    /// Terminal state for a worker exit code (`None` = killed by a signal)
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => JobState::Finished,
            Some(ABORTED_EXIT_CODE) => JobState::Aborted,
            _ => JobState::Failed,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Queued => "QUEUED",
            JobState::Running => "RUNNING",
            JobState::Finished => "FINISHED",
            JobState::Stopped => "STOPPED",
            JobState::Aborted => "ABORTED",
            JobState::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

/// What `get_queue` reports per job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub jid: JobId,
    pub prio: i64,
    pub config: String,
    pub state: JobState,
    #[serde(default)]
    pub active_worker: String,
    #[serde(default)]
    pub worker_info: BTreeMap<String, String>,
    pub enqueued: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Job {
    jid: JobId,
    prio: i64,
    config_path: PathBuf,
    config: Configuration,
    enqueued: DateTime<Utc>,
    child: Option<Child>,
    exit: Option<ExitStatus>,
    killed: bool,
    launch_error: Option<String>,
    client: Option<WorkerClient>,
}

impl Job {
    pub fn new(jid: JobId, prio: i64, config_path: PathBuf, config: Configuration) -> Self {
        Self {
            jid,
            prio,
            config_path,
            config,
            enqueued: Utc::now(),
            child: None,
            exit: None,
            killed: false,
            launch_error: None,
            client: None,
        }
    }

    /// Job for the case document at `config_path`
    pub fn load(jid: JobId, prio: i64, config_path: &Path) -> Result<Self, ConfigError> {
        let doc = CaseDocument::from_file(config_path)?;
        let config = Configuration::load(Some(&doc), None)?;
        Ok(Self::new(jid, prio, doc.path, config))
    }

    pub fn jid(&self) -> JobId {
        self.jid
    }

    pub fn prio(&self) -> i64 {
        self.prio
    }

    pub fn set_prio(&mut self, prio: i64) {
        self.prio = prio;
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn client(&self) -> Option<&WorkerClient> {
        self.client.as_ref()
    }

    /// Collect the exit status if the worker has finished
    pub fn refresh(&mut self) {
        if self.exit.is_some() {
            return;
        }
        let Some(child) = self.child.as_mut() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                log::info!("Job {} worker exited with {}", self.jid, status);
                self.exit = Some(status);
            }
            Ok(None) => {}
            Err(e) => log::warn!("Job {}: cannot poll worker: {}", self.jid, e),
        }
    }

    /// State as of the last `refresh`
    pub fn state(&self) -> JobState {
        if self.launch_error.is_some() {
            return JobState::Failed;
        }
        match (&self.child, self.exit) {
            (None, _) => JobState::Queued,
            (Some(_), None) => JobState::Running,
            (Some(_), Some(status)) if self.killed && !status.success() => JobState::Aborted,
            (Some(_), Some(status)) => JobState::from_exit_code(status.code()),
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            jid: self.jid,
            prio: self.prio,
            config: self.config_path.display().to_string(),
            state: self.state(),
            active_worker: String::new(),
            worker_info: BTreeMap::new(),
            enqueued: self.enqueued,
        }
    }

    /// Port the worker serves its control surface on
    pub fn worker_port(&self) -> u16 {
        match self.config.getint(GENERAL_SECTION, "worker_port") {
            Ok(port) => match u16::try_from(port) {
                Ok(port) => port,
                Err(_) => {
                    log::warn!("Job {}: worker_port {} out of range, using 18001", self.jid, port);
                    18001
                }
            },
            Err(e) => {
                log::warn!("Job {}: {}, using 18001", self.jid, e);
                18001
            }
        }
    }

    /// Program and arguments of the worker process
    pub fn worker_command(&self, port: u16) -> std::io::Result<Vec<String>> {
        let exe = std::env::current_exe()?;
        let config = self.config_path.display().to_string();
        let template = self
            .config
            .get(GENERAL_SECTION, "worker_command")
            .unwrap_or_default();

        if template.trim().is_empty() {
            return Ok(vec![
                exe.display().to_string(),
                "run".to_string(),
                config,
                "--serve".to_string(),
                "--port".to_string(),
                port.to_string(),
            ]);
        }

        for key in placeholders(&template) {
            if !WORKER_COMMAND_KEYS.contains(&key.as_str()) {
                log::warn!("Job {}: unknown placeholder {{{}}} in worker_command", self.jid, key);
            }
        }
        let values = Context::from_pairs([
            ("exe", exe.display().to_string()),
            ("config", config),
            ("port", port.to_string()),
            ("jid", self.jid.to_string()),
        ]);
        Ok(template
            .split_whitespace()
            .map(|arg| values.interpolate(arg).into_owned())
            .collect())
    }

    /// Spawn the worker and ask it to run, without waiting for the answer.
    ///
    /// A launch failure turns the job FAILED.
    pub fn launch(&mut self, settings: &QueueSettings) -> bool {
        match self.spawn(settings) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Job {} could not be started: {}", self.jid, e);
                self.launch_error = Some(e.to_string());
                false
            }
        }
    }

    fn spawn(&mut self, settings: &QueueSettings) -> std::io::Result<()> {
        let port = self.worker_port();
        let argv = self.worker_command(port)?;
        let (program, args) = argv.split_first().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty worker command")
        })?;

        let mut command = Command::new(program);
        // own process group, so a kill also takes the worker's task processes
        command.args(args).stdin(Stdio::null()).process_group(0);
        if let Some(dir) = self.config_path.parent() {
            command.current_dir(dir);
        }
        let child = command.spawn()?;
        log::info!(
            "Job {} started: {} (pid {:?}, port {})",
            self.jid,
            self.config_path.display(),
            child.id(),
            port
        );

        let client = WorkerClient::new(port);
        self.child = Some(child);
        self.client = Some(client.clone());

        let jid = self.jid;
        let attempts = settings.connect_attempts;
        let delay = settings.connect_delay;
        tokio::spawn(async move {
            match client.run_with_retry(attempts, delay).await {
                Ok(()) => log::debug!("Job {}: run returned", jid),
                Err(e) => log::warn!(
                    "Job {}: run call ended with an error, expected if the job was aborted: {}",
                    jid,
                    e
                ),
            }
        });
        Ok(())
    }

    /// Kill the worker process and its process group
    pub fn kill(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        if self.exit.is_some() {
            return false;
        }
        let group = child
            .id()
            .and_then(|pid| i32::try_from(pid).ok())
            .map(|pid| killpg(Pid::from_raw(pid), Signal::SIGKILL));
        let result = match group {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => {
                log::debug!("Job {}: process group kill failed: {}", self.jid, e);
                child.start_kill()
            }
            None => child.start_kill(),
        };
        match result {
            Ok(()) => {
                log::warn!("Job {} worker killed", self.jid);
                self.killed = true;
                true
            }
            Err(e) => {
                log::warn!("Job {}: kill failed: {}", self.jid, e);
                false
            }
        }
    }
}
