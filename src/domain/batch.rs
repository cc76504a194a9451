//! Batch documents - the fan-out description a caller hands to the CLI.
//!
//! A batch lists subjects, questions and models; expanding it yields one Task
//! per (subject, question, model) combination.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::task::{DEFAULT_MAX_RETRIES, DEFAULT_TASK_TIMEOUT, Task};
use crate::error::{ProbeError, Result};
use crate::id::{generate_run_id, generate_task_id};

/// Per-task defaults applied when a batch does not override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskDefaults {
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TASK_TIMEOUT.as_secs(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// A batch of probe requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Batch {
    pub run_id: Option<String>,
    pub subjects: Vec<String>,
    pub questions: Vec<String>,
    pub models: Vec<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub priority: Option<i32>,
    pub metadata: Map<String, Value>,
}

/// Tasks produced from a batch, tagged with the run they belong to.
#[derive(Debug, Clone)]
pub struct ExpandedBatch {
    pub run_id: String,
    pub tasks: Vec<Task>,
    pub metadata: Map<String, Value>,
}

impl Batch {
    /// Load a batch from a YAML file, or JSON when the extension is `.json`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let is_json = path
            .as_ref()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let batch: Self = if is_json {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        log::info!("Loaded batch from: {}", path.as_ref().display());
        Ok(batch)
    }

    /// Number of tasks this batch expands to.
    pub fn len(&self) -> usize {
        self.subjects.len() * self.questions.len() * self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expand into the subject x question x model cartesian product.
    ///
    /// Task ids are `{run_id}-{index:04}` in expansion order.
    pub fn expand(&self, defaults: &TaskDefaults) -> Result<ExpandedBatch> {
        if self.subjects.is_empty() {
            return Err(ProbeError::InvalidBatch("no subjects".into()));
        }
        if self.questions.is_empty() {
            return Err(ProbeError::InvalidBatch("no questions".into()));
        }
        if self.models.is_empty() {
            return Err(ProbeError::InvalidBatch("no models".into()));
        }

        let run_id = self.run_id.clone().unwrap_or_else(generate_run_id);
        let timeout = Duration::from_secs(self.timeout_secs.unwrap_or(defaults.timeout_secs));
        let max_retries = self.max_retries.unwrap_or(defaults.max_retries);

        let mut tasks = Vec::with_capacity(self.len());
        for subject in &self.subjects {
            for question in &self.questions {
                for model in &self.models {
                    let mut task = Task::new(subject, model, question)
                        .with_id(generate_task_id(&run_id, tasks.len()))
                        .with_timeout(timeout)
                        .with_max_retries(max_retries);
                    if let Some(priority) = self.priority {
                        task = task.with_priority(priority);
                    }
                    tasks.push(task);
                }
            }
        }

        Ok(ExpandedBatch {
            run_id,
            tasks,
            metadata: self.metadata.clone(),
        })
    }
}
