//! Built-in task kinds

mod case;
mod command;
pub mod range;
mod variation;

pub use case::CaseTask;
pub use command::CommandTask;
pub use variation::VariationTask;

use crate::core::{Task, TaskRegistry};

/// Register `command`, `case` and `variation`
pub fn register_builtin(registry: &mut TaskRegistry) {
    registry.register("command", |spec| {
        Ok(Box::new(CommandTask::from_spec(spec)?) as Box<dyn Task>)
    });
    registry.register_composite("case", |spec| {
        Ok(Box::new(CaseTask::from_spec(spec)?) as Box<dyn Task>)
    });
    registry.register_composite("variation", |spec| {
        Ok(Box::new(VariationTask::from_spec(spec)?) as Box<dyn Task>)
    });
}

#[cfg(test)]
mod tests {
    use crate::config::Configuration;
    use crate::core::{Context, Engine, Node, TaskRegistry};
    use std::fs;

    /// `case` + `variation` + `command` working together on disk
    #[test]
    fn test_sweep_inside_case() {
        let root_dir = tempfile::tempdir().unwrap();
        let root_path = root_dir.path().to_string_lossy().to_string();
        fs::create_dir(root_dir.path().join("wing")).unwrap();

        let tree = Node::new("pipeline").with_child(
            Node::new("case").with_attr("name", "wing").with_child(
                Node::new("variation")
                    .with_attr("variable", "angle")
                    .with_attr("range", "0..=10:5")
                    .with_child(
                        Node::new("command")
                            .with_attr("name", "solve-{angle}")
                            .with_attr("command", "echo {name} {angle} >> sweep.txt"),
                    ),
            ),
        );
        let engine = Engine::new(TaskRegistry::with_builtin(), Configuration::builtin());
        let cwd = std::env::current_dir().unwrap();

        engine
            .run(&tree, Context::from_pairs([("case_root", root_path.as_str())]))
            .unwrap();

        let sweep = fs::read_to_string(root_dir.path().join("wing").join("sweep.txt")).unwrap();
        assert_eq!(sweep, "wing 0\nwing 5\nwing 10\n");
        assert!(root_dir.path().join("wing/log/solve-5").is_file());
        assert_eq!(std::env::current_dir().unwrap(), cwd);
    }
}
