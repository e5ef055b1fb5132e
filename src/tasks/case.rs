//! Case task - a named unit of work backed by a directory

use crate::core::{Context, Engine, Node, Pipeline, Task, TaskInfo, TaskSpec};
use crate::document::norm_path;
use crate::error::TaskError;
use std::path::{Path, PathBuf};

/// Runs its children with `name` and `case` set in the context.
///
/// The case directory is `dir` (default: the name), relative to the
/// enclosing case or, at top level, to the document directory.
#[derive(Debug)]
pub struct CaseTask {
    name: String,
    dir: PathBuf,
    active: bool,
    node: Node,
}

impl CaseTask {
    pub fn from_spec(spec: TaskSpec) -> Result<Self, TaskError> {
        let name = spec.require("name")?.to_string();
        let dir = spec
            .option("dir")
            .filter(|d| !d.is_empty())
            .unwrap_or(name.as_str());
        let base = spec
            .context
            .get("case")
            .or_else(|| spec.context.get("case_root"))
            .map(PathBuf::from)
            .unwrap_or_default();
        let dir = norm_path(&base.join(dir));

        Ok(Self {
            active: spec.active()?,
            name,
            dir,
            node: spec.node,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Task for CaseTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn case_dir(&self) -> Option<&Path> {
        Some(&self.dir)
    }

    fn run(&self, engine: &Engine, context: &Context) -> Result<(), TaskError> {
        if !self.dir.is_dir() {
            log::warn!("Case directory {} does not exist", self.dir.display());
        }
        let mut context = context.branch();
        context.set("name", self.name.as_str());
        context.set("case", self.dir.to_string_lossy());

        Pipeline::new(engine, &self.node, context).execute()
    }

    fn info(&self) -> TaskInfo {
        let mut info = TaskInfo::new();
        info.insert("name".to_string(), self.name.clone());
        info.insert("case".to_string(), self.dir.display().to_string());
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(node: Node, context: Context) -> TaskSpec {
        TaskSpec {
            tag: "case".to_string(),
            options: node.attrs.clone(),
            node,
            context,
        }
    }

    #[test]
    fn test_dir_resolution() {
        let root = Context::from_pairs([("case_root", "/studies")]);
        let top = CaseTask::from_spec(spec(Node::new("case").with_attr("name", "wing"), root))
            .unwrap();
        assert_eq!(top.dir(), Path::new("/studies/wing"));
        assert_eq!(top.case_dir(), Some(Path::new("/studies/wing")));

        let nested = Context::from_pairs([("case_root", "/studies"), ("case", "/studies/wing")]);
        let inner = CaseTask::from_spec(spec(
            Node::new("case").with_attr("name", "coarse").with_attr("dir", "mesh-1"),
            nested,
        ))
        .unwrap();
        assert_eq!(inner.dir(), Path::new("/studies/wing/mesh-1"));
        assert_eq!(inner.info().get("name").map(String::as_str), Some("coarse"));
    }

    #[test]
    fn test_name_required() {
        let err = CaseTask::from_spec(spec(Node::new("case"), Context::new())).unwrap_err();
        assert!(matches!(err, TaskError::Config(_)));
    }
}
