//! Variation task - parameter sweep over a range expression

use super::range;
use crate::core::{Context, Engine, Node, Pipeline, Task, TaskInfo, TaskSpec, WorkingDir};
use crate::error::TaskError;
use parking_lot::Mutex;

/// Runs its children once per value of `range`, with `variable` set.
///
/// ```yaml
/// - tag: variation
///   attrs: { variable: angle, range: "0..=10:5" }
///   children:
///     - tag: command
///       attrs: { command: "solve --angle {angle}" }
/// ```
#[derive(Debug)]
pub struct VariationTask {
    name: String,
    variable: String,
    values: Vec<String>,
    active: bool,
    node: Node,
    current: Mutex<Option<usize>>,
}

impl VariationTask {
    pub fn from_spec(spec: TaskSpec) -> Result<Self, TaskError> {
        let variable = spec.require("variable")?.to_string();
        let values = range::expand(spec.require("range")?)?;
        Ok(Self {
            name: spec.name(),
            active: spec.active()?,
            variable,
            values,
            node: spec.node,
            current: Mutex::new(None),
        })
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    fn sweep(&self, engine: &Engine, context: &Context) -> Result<(), TaskError> {
        let total = self.values.len();
        for (index, value) in self.values.iter().enumerate() {
            engine.control.check()?;
            *self.current.lock() = Some(index);
            log::info!(
                "[{}] {} = {} ({}/{})",
                self.name,
                self.variable,
                value,
                index + 1,
                total
            );

            let mut context = context.branch();
            context.set(self.variable.as_str(), value.as_str());

            let _cwd = WorkingDir::remember()?;
            Pipeline::new(engine, &self.node, context).execute()?;
        }
        Ok(())
    }
}

impl Task for VariationTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn run(&self, engine: &Engine, context: &Context) -> Result<(), TaskError> {
        let result = self.sweep(engine, context);
        *self.current.lock() = None;
        result
    }

    fn info(&self) -> TaskInfo {
        let mut info = TaskInfo::new();
        info.insert("name".to_string(), self.name.clone());
        info.insert("variable".to_string(), self.variable.clone());
        if let Some(index) = *self.current.lock() {
            info.insert("value".to_string(), self.values[index].clone());
            info.insert(
                "progress".to_string(),
                format!("{}/{}", index + 1, self.values.len()),
            );
        }
        info
    }
}
