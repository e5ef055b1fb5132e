//! Error types shared by the pipeline, the configuration layer and the control channel

use thiserror::Error;

/// Exit code a worker process uses to report an aborted pipeline.
///
/// Any other non-zero code means the pipeline failed.
pub const ABORTED_EXIT_CODE: i32 = 4;

/// Exit code for a failed pipeline
pub const FAILED_EXIT_CODE: i32 = 1;

/// Missing or malformed configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing option `{key}` in section [{section}]")]
    MissingKey { section: String, key: String },

    #[error("option `{key}` in section [{section}] is not a valid {expected}: {value:?}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure while constructing or running a task
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task's external command returned a non-zero status
    #[error("task `{task}`: `{command}` returned with exit code {}", display_code(.code))]
    Execution {
        task: String,
        command: String,
        code: Option<i32>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid range expression {expr:?}: {reason}")]
    Range { expr: String, reason: String },

    #[error("execution aborted")]
    Aborted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TaskError {
    /// Is this the result of an abort request?
    pub fn is_abort(&self) -> bool {
        matches!(self, TaskError::Aborted)
    }
}

fn display_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none (killed by signal)".to_string())
}

/// The RPC peer could not be reached or answered with an error.
///
/// Callers on the queue side log these and carry on: the child process exit
/// code stays the authoritative job state.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control server at {url} is not reachable: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ControlError {
    /// True when the peer was not listening (yet, or any more)
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ControlError::Unreachable { .. })
    }

    pub(crate) fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_connect() {
            ControlError::Unreachable {
                url: url.to_string(),
                source,
            }
        } else {
            ControlError::Transport {
                url: url.to_string(),
                source,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_message() {
        let err = TaskError::Execution {
            task: "mesh".to_string(),
            command: "blockMesh".to_string(),
            code: Some(3),
        };
        assert_eq!(
            err.to_string(),
            "task `mesh`: `blockMesh` returned with exit code 3"
        );

        let err = TaskError::Execution {
            task: "solve".to_string(),
            command: "icoFoam".to_string(),
            code: None,
        };
        assert!(err.to_string().contains("killed by signal"));
    }

    #[test]
    fn test_abort_detection() {
        assert!(TaskError::Aborted.is_abort());
        let err: TaskError = ConfigError::MissingKey {
            section: "solve".to_string(),
            key: "solver".to_string(),
        }
        .into();
        assert!(!err.is_abort());
        assert_eq!(err.to_string(), "missing option `solver` in section [solve]");
    }
}
