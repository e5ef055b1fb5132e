//! Case document - parses a case file into configuration sections and a task tree
//!
//! ```yaml
//! config:
//!   general:
//!     worker_port: 18101
//! pipeline:
//!   - tag: case
//!     attrs: { name: cavity }
//!     children:
//!       - tag: command
//!         attrs: { name: mesh, command: "blockMesh -case {case}" }
//! ```
//!
//! A document without `pipeline` is run in flat mode: every config section
//! with a `task` option becomes a task, ordered by its `position` option.

use crate::config::{deserialize_sections, Configuration, Sections, GENERAL_SECTION};
use crate::core::Node;
use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Tag of the synthetic node that holds the top-level tasks
pub const ROOT_TAG: &str = "pipeline";

#[derive(Debug, Default, Deserialize)]
struct RawDocument {
    #[serde(default, deserialize_with = "deserialize_sections")]
    config: Sections,
    #[serde(default)]
    pipeline: Vec<Node>,
}

/// A loaded case document
#[derive(Debug, Clone)]
pub struct CaseDocument {
    /// Absolute path of the document
    pub path: PathBuf,
    pub config: Sections,
    pub pipeline: Vec<Node>,
}

impl CaseDocument {
    /// Load a case document from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let path = norm_path(path);
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text, path)
    }

    /// Parse a case document; `path` is used for error messages and as the case root
    pub fn from_yaml(text: &str, path: PathBuf) -> Result<Self, ConfigError> {
        let raw: Option<RawDocument> =
            serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        let raw = raw.unwrap_or_default();
        Ok(Self {
            path,
            config: raw.config,
            pipeline: raw.pipeline,
        })
    }

    /// Directory containing the document
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("/"))
    }

    /// Root of the task tree to execute
    pub fn task_tree(&self, config: &Configuration) -> Node {
        let children = if self.pipeline.is_empty() {
            flat_pipeline(config)
        } else {
            self.pipeline.clone()
        };
        Node {
            tag: ROOT_TAG.to_string(),
            children,
            ..Node::default()
        }
    }
}

/// Tasks declared as config sections, ordered by position
fn flat_pipeline(config: &Configuration) -> Vec<Node> {
    let max_position = config.getint(GENERAL_SECTION, "max_position").ok();
    let mut entries = Vec::new();

    for (index, section) in config.sections().enumerate() {
        let Some(tag) = config.options(section).and_then(|o| o.get("task")) else {
            continue;
        };
        let position = match config.getint(section, "position") {
            Ok(position) => position,
            Err(e) => {
                log::warn!("Task section [{}] has no usable position, discarding: {}", section, e);
                continue;
            }
        };
        if max_position.is_some_and(|max| position >= max) {
            log::debug!("Task section [{}] beyond max_position, skipped", section);
            continue;
        }
        let mut attrs = match config.option_dict(section) {
            Ok(attrs) => attrs,
            Err(e) => {
                log::warn!("Task section [{}] is invalid, discarding: {}", section, e);
                continue;
            }
        };
        attrs.remove("task");
        attrs
            .entry("name".to_string())
            .or_insert_with(|| section.to_string());

        log::debug!("Added task {} (position {}, tag {})", section, position, tag);
        entries.push((
            position,
            index,
            Node {
                tag: tag.clone(),
                attrs,
                ..Node::default()
            },
        ));
    }

    entries.sort_by_key(|(position, index, _)| (*position, *index));
    entries.into_iter().map(|(_, _, node)| node).collect()
}

/// Absolute, `~`-expanded path
pub fn norm_path(path: &Path) -> PathBuf {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    };
    if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    }
}
