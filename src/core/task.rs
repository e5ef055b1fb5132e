//! Task trait and the construction input every task factory receives

use super::{Context, Engine, Node};
use crate::config::parse_bool;
use crate::error::{ConfigError, TaskError};
use std::collections::BTreeMap;
use std::path::Path;

/// Free-form information about a running task, shown by queue listings
pub type TaskInfo = BTreeMap<String, String>;

/// One pipeline step.
///
/// `run` executes on the pipeline thread while `abort` and `info` may be
/// called concurrently from the control server.
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    /// Resolved from the `do` option, default true
    fn is_active(&self) -> bool;

    /// Working directory for `run`, used only if it exists
    fn case_dir(&self) -> Option<&Path> {
        None
    }

    /// A failing task with this set does not stop the pipeline
    fn ignore_errors(&self) -> bool {
        false
    }

    fn run(&self, engine: &Engine, context: &Context) -> Result<(), TaskError>;

    /// Stop whatever the task is doing right now
    fn abort(&self) {}

    fn info(&self) -> TaskInfo {
        let mut info = TaskInfo::new();
        if !self.name().is_empty() {
            info.insert("name".to_string(), self.name().to_string());
        }
        info
    }
}

/// Everything a task factory needs to build a task
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub tag: String,
    /// The task's node, rendered against `context`
    pub node: Node,
    /// Options of the config section named like the tag, overlaid with the node attributes
    pub options: BTreeMap<String, String>,
    pub context: Context,
}

impl TaskSpec {
    /// `name` option, or the tag
    pub fn name(&self) -> String {
        self.option("name")
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.tag)
            .to_string()
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Option that must be present and non-empty
    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.option(key)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingKey {
                section: self.name(),
                key: key.to_string(),
            })
    }

    /// Boolean option with a default
    pub fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.option(key) {
            None => Ok(default),
            Some(value) => parse_bool(value).ok_or_else(|| ConfigError::InvalidValue {
                section: self.name(),
                key: key.to_string(),
                value: value.to_string(),
                expected: "boolean",
            }),
        }
    }

    /// Resolved `do` option
    pub fn active(&self) -> Result<bool, ConfigError> {
        self.flag("do", true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(pairs: &[(&str, &str)]) -> TaskSpec {
        TaskSpec {
            tag: "command".to_string(),
            node: Node::new("command"),
            options: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            context: Context::new(),
        }
    }

    #[test]
    fn test_name_falls_back_to_tag() {
        assert_eq!(spec(&[]).name(), "command");
        assert_eq!(spec(&[("name", "mesh")]).name(), "mesh");
    }

    #[test]
    fn test_require_and_flags() {
        let s = spec(&[("name", "mesh"), ("command", " "), ("do", "no"), ("log", "perhaps")]);
        assert!(matches!(s.require("command"), Err(ConfigError::MissingKey { .. })));
        assert!(!s.active().unwrap());
        assert!(s.flag("fail_on_error", true).unwrap());
        assert!(matches!(
            s.flag("log", true),
            Err(ConfigError::InvalidValue { expected: "boolean", .. })
        ));
    }
}
