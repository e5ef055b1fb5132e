//! External process execution for tasks
//!
//! Output is read line by line and sent to the log, to an optional per-task
//! log file and to a "last line" buffer used by `info`. The child handle is
//! kept in a slot so an abort from another thread can kill it while the
//! pipeline thread waits. Each child leads its own process group, and a
//! kill signals the whole group so processes forked by the shell go too.

use super::RunControl;
use crate::error::TaskError;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WAIT_INTERVAL: Duration = Duration::from_millis(50);

/// Holds the child process of a running task
#[derive(Debug, Default)]
pub struct ProcessSlot {
    child: Mutex<Option<Child>>,
    last_line: Arc<Mutex<String>>,
}

impl ProcessSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `command`, stream its output and wait for it to exit.
    ///
    /// Returns `Err(Aborted)` if an abort was requested before the spawn or
    /// while the process ran.
    pub fn run(
        &self,
        label: &str,
        mut command: Command,
        control: &RunControl,
        log_file: Option<&Path>,
    ) -> Result<ExitStatus, TaskError> {
        let sink = OutputSink::open(label, log_file, &command, self.last_line.clone())?;
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let (stdout, stderr) = {
            let mut slot = self.child.lock();
            // checked under the lock so a concurrent kill() cannot miss the child
            control.check()?;
            let mut child = command.spawn()?;
            log::debug!("[{}] started pid {}", label, child.id());
            let pipes = (child.stdout.take(), child.stderr.take());
            *slot = Some(child);
            pipes
        };

        let stderr_reader = stderr.map(|err| {
            let sink = sink.clone();
            thread::spawn(move || sink.drain(err))
        });
        if let Some(out) = stdout {
            sink.drain(out);
        }
        if let Some(handle) = stderr_reader {
            let _ = handle.join();
        }

        let status = self.wait()?;
        log::debug!("[{}] exited with {}", label, status);
        control.check()?;
        Ok(status)
    }

    fn wait(&self) -> Result<ExitStatus, TaskError> {
        loop {
            {
                let mut slot = self.child.lock();
                let Some(child) = slot.as_mut() else {
                    return Err(TaskError::Aborted);
                };
                if let Some(status) = child.try_wait()? {
                    slot.take();
                    return Ok(status);
                }
            }
            thread::sleep(WAIT_INTERVAL);
        }
    }

    /// Kill the running child and its process group, if any. The waiting
    /// thread reaps it.
    pub fn kill(&self) -> bool {
        let mut slot = self.child.lock();
        let Some(child) = slot.as_mut() else {
            return false;
        };
        kill_group(child)
    }

    pub fn is_running(&self) -> bool {
        self.child.lock().is_some()
    }

    /// Last non-empty output line of the current or previous run
    pub fn last_output(&self) -> String {
        self.last_line.lock().clone()
    }
}

/// SIGKILL the process group led by `child`, falling back to the child alone
fn kill_group(child: &mut Child) -> bool {
    let pid = child.id();
    match i32::try_from(pid).map(Pid::from_raw) {
        Ok(pgid) => match killpg(pgid, Signal::SIGKILL) {
            Ok(()) => return true,
            Err(e) => log::debug!("Kill of process group {} failed: {}", pid, e),
        },
        Err(_) => log::debug!("pid {} out of range for a process group", pid),
    }
    match child.kill() {
        Ok(()) => true,
        Err(e) => {
            log::debug!("Kill of pid {} failed: {}", pid, e);
            false
        }
    }
}

/// Where output lines go
#[derive(Clone)]
struct OutputSink {
    label: String,
    file: Option<Arc<Mutex<File>>>,
    last_line: Arc<Mutex<String>>,
}

impl OutputSink {
    fn open(
        label: &str,
        log_file: Option<&Path>,
        command: &Command,
        last_line: Arc<Mutex<String>>,
    ) -> Result<Self, TaskError> {
        let file = match log_file {
            Some(path) => {
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                writeln!(
                    file,
                    "=== {} {:?}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    command
                )?;
                Some(Arc::new(Mutex::new(file)))
            }
            None => None,
        };
        last_line.lock().clear();
        Ok(Self {
            label: label.to_string(),
            file,
            last_line,
        })
    }

    fn drain(&self, stream: impl Read) {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => self.line(&String::from_utf8_lossy(&buf)),
                Err(e) => {
                    log::warn!("[{}] output read error: {}", self.label, e);
                    break;
                }
            }
        }
    }

    fn line(&self, raw: &str) {
        let line = raw.trim_end_matches(['\r', '\n']);
        log::info!("[{}] {}", self.label, line);
        if let Some(file) = &self.file {
            if let Err(e) = writeln!(file.lock(), "{}", line) {
                log::warn!("[{}] log file write failed: {}", self.label, e);
            }
        }
        if !line.trim().is_empty() {
            *self.last_line.lock() = line.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn test_run_captures_output_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log").join("hello");
        let slot = ProcessSlot::new();
        let control = RunControl::new();

        let status = slot
            .run("hello", shell("echo one; echo two >&2; exit 3"), &control, Some(&log))
            .unwrap();

        assert_eq!(status.code(), Some(3));
        assert!(!slot.is_running());
        let written = std::fs::read_to_string(&log).unwrap();
        assert!(written.contains("one"));
        assert!(written.contains("two"));
        assert!(["one", "two"].contains(&slot.last_output().as_str()));
    }

    #[test]
    fn test_no_spawn_after_abort() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let control = RunControl::new();
        control.abort();

        let err = ProcessSlot::new()
            .run("late", shell(&format!("touch {}", marker.display())), &control, None)
            .unwrap_err();

        assert!(err.is_abort());
        assert!(!marker.exists());
    }

    #[test]
    fn test_kill_from_another_thread() {
        let slot = Arc::new(ProcessSlot::new());
        let control = Arc::new(RunControl::new());

        let killer = {
            let (slot, control) = (slot.clone(), control.clone());
            thread::spawn(move || {
                while !slot.is_running() {
                    thread::sleep(Duration::from_millis(10));
                }
                control.abort();
                slot.kill()
            })
        };

        let err = slot.run("sleeper", shell("exec sleep 30"), &control, None).unwrap_err();
        assert!(err.is_abort());
        assert!(killer.join().unwrap());
    }

    #[test]
    fn test_kill_reaches_processes_forked_by_the_shell() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("done");
        let slot = Arc::new(ProcessSlot::new());
        let control = Arc::new(RunControl::new());

        let killer = {
            let (slot, control) = (slot.clone(), control.clone());
            thread::spawn(move || {
                while !slot.is_running() {
                    thread::sleep(Duration::from_millis(10));
                }
                thread::sleep(Duration::from_millis(200));
                control.abort();
                slot.kill()
            })
        };

        let started = std::time::Instant::now();
        let script = format!("echo start; sleep 6; touch {}", marker.display());
        let err = slot.run("compound", shell(&script), &control, None).unwrap_err();

        assert!(err.is_abort());
        assert!(killer.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(3));
        thread::sleep(Duration::from_millis(100));
        assert!(!marker.exists());
        assert!(!slot.is_running());
    }
}
