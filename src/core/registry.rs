//! Task registry - maps a node tag to the factory that builds its task
//!
//! Populated once at start-up. Tags without an entry are skipped by the
//! pipeline, so documents may carry metadata nodes the runner ignores.

use super::{RenderScope, Task, TaskSpec};
use crate::error::TaskError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds a task from its spec
pub type TaskFactory = Arc<dyn Fn(TaskSpec) -> Result<Box<dyn Task>, TaskError> + Send + Sync>;

/// A registered task kind
#[derive(Clone)]
pub struct Registration {
    factory: TaskFactory,
    scope: RenderScope,
}

impl Registration {
    /// How much of the node is rendered before the factory sees it
    pub fn scope(&self) -> RenderScope {
        self.scope
    }

    /// Composite kinds run nested pipelines
    pub fn is_composite(&self) -> bool {
        self.scope == RenderScope::Own
    }

    pub fn build(&self, spec: TaskSpec) -> Result<Box<dyn Task>, TaskError> {
        (self.factory)(spec)
    }
}

/// Tag -> factory mapping
#[derive(Clone, Default)]
pub struct TaskRegistry {
    entries: HashMap<String, Registration>,
}

impl TaskRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in task kinds
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::tasks::register_builtin(&mut registry);
        registry
    }

    /// Register a leaf task kind; an existing entry for `tag` is replaced
    pub fn register<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(TaskSpec) -> Result<Box<dyn Task>, TaskError> + Send + Sync + 'static,
    {
        self.insert(tag.into(), Arc::new(factory), RenderScope::Subtree);
    }

    /// Register a composite task kind, whose children are rendered by the
    /// nested pipeline it runs
    pub fn register_composite<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(TaskSpec) -> Result<Box<dyn Task>, TaskError> + Send + Sync + 'static,
    {
        self.insert(tag.into(), Arc::new(factory), RenderScope::Own);
    }

    fn insert(&mut self, tag: String, factory: TaskFactory, scope: RenderScope) {
        if self.entries.contains_key(&tag) {
            log::debug!("Replacing task kind {}", tag);
        }
        self.entries.insert(tag, Registration { factory, scope });
    }

    pub fn lookup(&self, tag: &str) -> Option<&Registration> {
        self.entries.get(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    /// Registered tags, sorted
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.entries.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Keep only the leaf kinds in `only` (when given) and drop those in
    /// `not`. Composite kinds are always kept so nested tasks stay reachable.
    pub fn apply_filters(&mut self, only: &[String], not: &[String]) {
        self.entries.retain(|tag, registration| {
            if registration.is_composite() {
                return true;
            }
            let selected = only.is_empty() || only.iter().any(|o| o == tag);
            let excluded = not.iter().any(|n| n == tag);
            if !selected || excluded {
                log::info!("Task kind {} disabled from the command line", tag);
            }
            selected && !excluded
        });
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}
