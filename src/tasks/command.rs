//! External command task

use crate::core::{Context, Engine, ProcessSlot, Task, TaskInfo, TaskSpec};
use crate::document::norm_path;
use crate::error::TaskError;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Runs one shell command.
///
/// ```yaml
/// - tag: command
///   attrs: { name: mesh, command: "blockMesh", fail_on_error: false }
/// ```
/// The command may also be given as the node text.
#[derive(Debug)]
pub struct CommandTask {
    name: String,
    command: String,
    active: bool,
    fail_on_error: bool,
    log: bool,
    case: Option<PathBuf>,
    process: ProcessSlot,
}

impl CommandTask {
    pub fn from_spec(spec: TaskSpec) -> Result<Self, TaskError> {
        let command = match spec.require("command") {
            Ok(command) => command.to_string(),
            Err(missing) => spec
                .node
                .text
                .as_deref()
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
                .ok_or(missing)?,
        };
        let case = spec
            .option("case")
            .filter(|c| !c.is_empty())
            .or_else(|| spec.context.get("case"))
            .map(|c| norm_path(Path::new(c)));

        Ok(Self {
            name: spec.name(),
            active: spec.active()?,
            fail_on_error: spec.flag("fail_on_error", true)?,
            log: spec.flag("log", true)?,
            command,
            case,
            process: ProcessSlot::new(),
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn log_file(&self) -> Option<PathBuf> {
        if !self.log {
            return None;
        }
        self.case
            .as_ref()
            .filter(|case| case.is_dir())
            .map(|case| case.join("log").join(&self.name))
    }
}

impl Task for CommandTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn case_dir(&self) -> Option<&Path> {
        self.case.as_deref()
    }

    fn ignore_errors(&self) -> bool {
        !self.fail_on_error
    }

    fn run(&self, engine: &Engine, _context: &Context) -> Result<(), TaskError> {
        log::info!("[{}] $ {}", self.name, self.command);
        let mut command = Command::new("sh");
        command.arg("-c").arg(&self.command);

        let status = self.process.run(
            &self.name,
            command,
            &engine.control,
            self.log_file().as_deref(),
        )?;

        if status.success() {
            Ok(())
        } else {
            Err(TaskError::Execution {
                task: self.name.clone(),
                command: self.command.clone(),
                code: status.code(),
            })
        }
    }

    fn abort(&self) {
        if self.process.kill() {
            log::warn!("[{}] subprocess killed", self.name);
        }
    }

    fn info(&self) -> TaskInfo {
        let mut info = TaskInfo::new();
        info.insert("name".to_string(), self.name.clone());
        info.insert("command".to_string(), self.command.clone());
        info.insert("last_output".to_string(), self.process.last_output());
        info
    }
}
