use caseflow::core::{Context, Engine, Node, Task, TaskRegistry, TaskSpec};
use caseflow::document::CaseDocument;
use caseflow::{Configuration, TaskError};
use parking_lot::Mutex;
use std::fs;
use std::sync::Arc;

/// Records the order tasks ran in
struct Recorder {
    name: String,
    seen: Arc<Mutex<Vec<String>>>,
}

impl Task for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        true
    }

    fn run(&self, _engine: &Engine, context: &Context) -> Result<(), TaskError> {
        let value = context.get("size").unwrap_or("-");
        self.seen.lock().push(format!("{}@{}", self.name, value));
        Ok(())
    }
}

fn registry(seen: &Arc<Mutex<Vec<String>>>) -> TaskRegistry {
    let mut registry = TaskRegistry::with_builtin();
    let seen = seen.clone();
    registry.register("record", move |spec: TaskSpec| {
        Ok(Box::new(Recorder {
            name: spec.name(),
            seen: seen.clone(),
        }) as Box<dyn Task>)
    });
    registry
}

#[test]
fn test_document_order_and_unregistered_tags() {
    let yaml = r#"
pipeline:
  - tag: record
    attrs: { name: first }
  - tag: vendor-extension
    attrs: { name: ignored }
  - tag: variation
    attrs: { variable: size, range: "[s, m]" }
    children:
      - tag: record
        attrs: { name: "inner-{size}" }
      - tag: comment
        text: not a task
  - tag: record
    attrs: { name: last }
"#;
    let doc = CaseDocument::from_yaml(yaml, "/tmp/order.yml".into()).unwrap();
    let config = Configuration::load_with_global(Some(&doc), None, None).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let engine = Engine::new(registry(&seen), config.clone());

    let root = doc.task_tree(&config);
    let names: Vec<String> = caseflow::Pipeline::new(&engine, &root, Context::new())
        .tasks()
        .map(|task| task.unwrap().name().to_string())
        .collect();
    assert_eq!(names, vec!["first", "variation", "last"]);

    engine.run(&root, Context::new()).unwrap();
    assert_eq!(
        *seen.lock(),
        vec!["first@-", "inner-s@s", "inner-m@m", "last@-"]
    );
}

#[test]
fn test_context_overrides_beat_sweep_values() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let engine = Engine::new(registry(&seen), Configuration::builtin());
    let root = Node::new("pipeline").with_child(
        Node::new("variation")
            .with_attr("variable", "size")
            .with_attr("range", "1..3")
            .with_child(Node::new("record").with_attr("name", "r{size}")),
    );
    let context = Context::new().with_overrides(Context::parse_assignments("size=xl"));

    engine.run(&root, context).unwrap();

    assert_eq!(*seen.lock(), vec!["rxl@xl", "rxl@xl"]);
}

#[test]
fn test_flat_document_runs_by_position() {
    let dir = tempfile::tempdir().unwrap();
    let case_file = dir.path().join("flat.yml");
    fs::write(
        &case_file,
        r#"
config:
  DEFAULT:
    case: "{case_dir}"
    case_dir: CASE_DIR
  second:
    task: command
    position: 20
    command: "echo second >> order.txt"
  first:
    task: command
    position: 10
    command: "echo first >> order.txt"
  skipped:
    task: command
    position: 30
    do: false
    command: "echo skipped >> order.txt"
"#
        .replace("CASE_DIR", &dir.path().to_string_lossy()),
    )
    .unwrap();

    let doc = CaseDocument::from_file(&case_file).unwrap();
    let config = Configuration::load_with_global(Some(&doc), None, None).unwrap();
    let engine = Engine::new(TaskRegistry::with_builtin(), config.clone());

    engine.run(&doc.task_tree(&config), Context::new()).unwrap();

    let order = fs::read_to_string(dir.path().join("order.txt")).unwrap();
    assert_eq!(order, "first\nsecond\n");
    assert!(dir.path().join("log").join("first").is_file());
}
