//! Pipeline execution
//!
//! A pipeline walks the children of one node in document order. Each child
//! whose tag is registered is rendered against the pipeline context, built
//! into a task and run. Tasks are built lazily, one at a time, so a
//! composite sees the context as it is when its turn comes.

use super::{Context, Node, RunControl, Task, TaskRegistry, TaskSpec};
use crate::config::Configuration;
use crate::error::{TaskError, ABORTED_EXIT_CODE, FAILED_EXIT_CODE};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything shared by all pipelines of one run
#[derive(Debug)]
pub struct Engine {
    pub registry: TaskRegistry,
    pub config: Configuration,
    pub control: Arc<RunControl>,
}

impl Engine {
    pub fn new(registry: TaskRegistry, config: Configuration) -> Self {
        Self {
            registry,
            config,
            control: Arc::new(RunControl::new()),
        }
    }

    /// Run the children of `root`
    pub fn run(&self, root: &Node, context: Context) -> Result<(), TaskError> {
        Pipeline::new(self, root, context).execute()
    }

    /// Build the task for `node`, or `None` if its tag is not registered
    pub fn instantiate(
        &self,
        node: &Node,
        context: &Context,
    ) -> Option<Result<Arc<dyn Task>, TaskError>> {
        let Some(registration) = self.registry.lookup(&node.tag) else {
            log::debug!("Skipping node <{}>: no task registered", node.tag);
            return None;
        };
        let rendered = node.render(context, registration.scope());

        let build = || -> Result<Arc<dyn Task>, TaskError> {
            let mut options: BTreeMap<String, String> = self
                .config
                .option_dict(&node.tag)?
                .into_iter()
                .map(|(key, value)| (key, context.interpolate(&value).into_owned()))
                .collect();
            options.extend(rendered.attrs.clone());
            let spec = TaskSpec {
                tag: node.tag.clone(),
                node: rendered,
                options,
                context: context.clone(),
            };
            // disabled tasks are not validated, only reported as skipped
            if !spec.active()? {
                return Ok(Arc::new(Disabled { name: spec.name() }));
            }
            registration.build(spec).map(Arc::from)
        };
        Some(build())
    }
}

/// Stand-in for a task whose `do` option is false
#[derive(Debug)]
struct Disabled {
    name: String,
}

impl Task for Disabled {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        false
    }

    fn run(&self, _engine: &Engine, _context: &Context) -> Result<(), TaskError> {
        Ok(())
    }
}

/// Ordered execution of one node's children
pub struct Pipeline<'a> {
    engine: &'a Engine,
    node: &'a Node,
    context: Context,
}

impl<'a> Pipeline<'a> {
    pub fn new(engine: &'a Engine, node: &'a Node, context: Context) -> Self {
        Self {
            engine,
            node,
            context,
        }
    }

    /// Tasks of this pipeline, built on demand
    pub fn tasks(&self) -> impl Iterator<Item = Result<Arc<dyn Task>, TaskError>> + '_ {
        self.node
            .children
            .iter()
            .filter_map(move |child| self.engine.instantiate(child, &self.context))
    }

    /// Run every active task in order.
    ///
    /// Stops at the first failing task unless it ignores errors, and before
    /// starting any task once an abort was requested.
    pub fn execute(&self) -> Result<(), TaskError> {
        let control = &self.engine.control;

        for task in self.tasks() {
            control.check()?;
            let task = task?;

            if !task.is_active() {
                log::info!("Not executing task {}", task.name());
                continue;
            }
            log::info!("Executing task {}", task.name());

            let result = {
                let _active = control.enter(task.clone());
                let _cwd = match task.case_dir().filter(|dir| dir.is_dir()) {
                    Some(dir) => Some(WorkingDir::enter(dir)?),
                    None => None,
                };
                task.run(self.engine, &self.context)
            };

            match result {
                Ok(()) => log::debug!("Task {} done", task.name()),
                Err(e) if e.is_abort() => {
                    log::warn!("Task {} aborted", task.name());
                    return Err(e);
                }
                Err(e) if task.ignore_errors() => {
                    log::warn!("Task {} failed, continuing: {}", task.name(), e);
                }
                Err(e) => {
                    log::error!("Task {} failed: {}", task.name(), e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

/// How a whole run ended, mapped onto the worker's exit code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Finished,
    Aborted,
    Failed(String),
}

impl RunOutcome {
    pub fn from_result(result: &Result<(), TaskError>) -> Self {
        match result {
            Ok(()) => RunOutcome::Finished,
            Err(e) if e.is_abort() => RunOutcome::Aborted,
            Err(e) => RunOutcome::Failed(e.to_string()),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Finished => 0,
            RunOutcome::Aborted => ABORTED_EXIT_CODE,
            RunOutcome::Failed(_) => FAILED_EXIT_CODE,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Finished => write!(f, "finished"),
            RunOutcome::Aborted => write!(f, "aborted"),
            RunOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Restores the process working directory on drop
pub struct WorkingDir {
    previous: PathBuf,
}

impl WorkingDir {
    /// Remember the current directory
    pub fn remember() -> std::io::Result<Self> {
        Ok(Self {
            previous: std::env::current_dir()?,
        })
    }

    /// Remember the current directory and change to `dir`
    pub fn enter(dir: &Path) -> std::io::Result<Self> {
        let guard = Self::remember()?;
        std::env::set_current_dir(dir)?;
        log::debug!("Working directory {}", dir.display());
        Ok(guard)
    }
}

impl Drop for WorkingDir {
    fn drop(&mut self) {
        if let Err(e) = std::env::set_current_dir(&self.previous) {
            log::warn!(
                "Could not restore working directory {}: {}",
                self.previous.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records runs into a shared journal
    struct Step {
        name: String,
        active: bool,
        fail: bool,
        ignore: bool,
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl Task for Step {
        fn name(&self) -> &str {
            &self.name
        }
        fn is_active(&self) -> bool {
            self.active
        }
        fn ignore_errors(&self) -> bool {
            self.ignore
        }
        fn run(&self, engine: &Engine, context: &Context) -> Result<(), TaskError> {
            assert_eq!(engine.control.active_worker(), self.name);
            self.journal
                .lock()
                .push(format!("{}:{}", self.name, context.get("who").unwrap_or("-")));
            if self.name == "stopper" {
                engine.control.abort();
            }
            if self.fail {
                return Err(TaskError::Execution {
                    task: self.name.clone(),
                    command: "false".to_string(),
                    code: Some(1),
                });
            }
            Ok(())
        }
    }

    fn engine(journal: Arc<Mutex<Vec<String>>>) -> Engine {
        let mut registry = TaskRegistry::new();
        registry.register("step", move |spec: TaskSpec| {
            Ok(Box::new(Step {
                name: spec.name(),
                active: spec.active()?,
                fail: spec.flag("fail", false)?,
                ignore: spec.flag("ignore", false)?,
                journal: journal.clone(),
            }) as Box<dyn Task>)
        });
        Engine::new(registry, Configuration::builtin())
    }

    fn step(name: &str) -> Node {
        Node::new("step").with_attr("name", name)
    }

    #[test]
    fn test_runs_in_order_and_skips() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let engine = engine(journal.clone());
        let root = Node::new("pipeline")
            .with_child(step("{who}-a"))
            .with_child(Node::new("unregistered").with_attr("name", "x"))
            .with_child(step("off").with_attr("do", "false"))
            .with_child(step("b"));

        engine
            .run(&root, Context::from_pairs([("who", "me")]))
            .unwrap();

        assert_eq!(*journal.lock(), vec!["me-a:me", "b:me"]);
        assert_eq!(engine.control.active_worker(), "");
    }

    #[test]
    fn test_failure_stops_unless_ignored() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let engine = engine(journal.clone());
        let root = Node::new("pipeline")
            .with_child(step("soft").with_attr("fail", "true").with_attr("ignore", "yes"))
            .with_child(step("hard").with_attr("fail", "true"))
            .with_child(step("never"));

        let err = engine.run(&root, Context::new()).unwrap_err();

        assert!(matches!(err, TaskError::Execution { ref task, .. } if task == "hard"));
        assert_eq!(*journal.lock(), vec!["soft:-", "hard:-"]);
    }

    #[test]
    fn test_abort_prevents_next_task() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let engine = engine(journal.clone());
        let root = Node::new("pipeline")
            .with_child(step("stopper"))
            .with_child(step("never"));

        let err = engine.run(&root, Context::new()).unwrap_err();

        assert!(err.is_abort());
        assert_eq!(*journal.lock(), vec!["stopper:-"]);

        let outcome = RunOutcome::from_result(&Err(err));
        assert_eq!(outcome, RunOutcome::Aborted);
        assert_eq!(outcome.exit_code(), ABORTED_EXIT_CODE);
        assert_eq!(RunOutcome::from_result(&Ok(())).exit_code(), 0);
    }

    #[test]
    fn test_invalid_option_is_a_construction_error() {
        let engine = engine(Arc::new(Mutex::new(Vec::new())));
        let root = Node::new("pipeline").with_child(step("bad").with_attr("do", "maybe"));

        let err = engine.run(&root, Context::new()).unwrap_err();
        assert!(matches!(err, TaskError::Config(_)));
    }

    #[test]
    fn test_disabled_task_is_not_validated() {
        let engine = Engine::new(TaskRegistry::with_builtin(), Configuration::builtin());
        let root = Node::new("pipeline")
            .with_child(Node::new("command").with_attr("name", "off").with_attr("do", "false"))
            .with_child(
                Node::new("command")
                    .with_attr("name", "on")
                    .with_attr("command", "true"),
            );

        let names: Vec<(String, bool)> = Pipeline::new(&engine, &root, Context::new())
            .tasks()
            .map(|task| {
                let task = task.unwrap();
                (task.name().to_string(), task.is_active())
            })
            .collect();
        assert_eq!(names, vec![("off".to_string(), false), ("on".to_string(), true)]);

        engine.run(&root, Context::new()).unwrap();
    }
}
