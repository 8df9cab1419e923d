use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A unit of remote work: the name of a function registered on the worker
/// side plus the arguments to call it with.
///
/// Jobs are immutable once built. The `name` is the correlation key used to
/// match the [`JobResult`] coming back from the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    job_id: String,
    name: String,
    func: String,
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
    created_at: DateTime<Utc>,
}

impl Job {
    /// Start building a job that calls `func` on a remote worker.
    pub fn builder(func: impl Into<String>) -> JobBuilder {
        JobBuilder {
            func: func.into(),
            name: None,
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Correlation key for the result of this job.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn func(&self) -> &str {
        &self.func
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn kwargs(&self) -> &BTreeMap<String, Value> {
        &self.kwargs
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Job {{ name: {}, func: {}, args: {}, kwargs: {} }}",
            self.name,
            self.func,
            self.args.len(),
            self.kwargs.len()
        )
    }
}

/// Fluent builder for [`Job`].
#[derive(Debug, Clone)]
pub struct JobBuilder {
    func: String,
    name: Option<String>,
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
}

impl JobBuilder {
    /// Use `name` as both the job id and the correlation key.
    /// Without one a UUIDv4 is generated at build time.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into()).filter(|n: &String| !n.is_empty());
        self
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Replace all positional arguments.
    pub fn args<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.args = values.into_iter().map(Into::into).collect();
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Replace all keyword arguments.
    pub fn kwargs(mut self, kwargs: BTreeMap<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn build(self) -> Job {
        let job_id = self.name.unwrap_or_else(|| Uuid::new_v4().to_string());
        Job {
            name: job_id.clone(),
            job_id,
            func: self.func,
            args: self.args,
            kwargs: self.kwargs,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of a remote execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Success,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Success => write!(f, "SUCCESS"),
            JobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// The result of executing a [`Job`], produced by the remote worker.
///
/// Failures on the worker side travel as data in `exc`, never as a local error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub name: String,
    pub outcome: JobStatus,
    pub value: Option<Value>,
    pub exc: Option<String>,
    pub exec_time: Duration,
}

impl JobResult {
    pub fn success(name: impl Into<String>, value: impl Into<Value>, exec_time: Duration) -> Self {
        Self {
            name: name.into(),
            outcome: JobStatus::Success,
            value: Some(value.into()),
            exc: None,
            exec_time,
        }
    }

    pub fn failed(name: impl Into<String>, exc: impl Into<String>, exec_time: Duration) -> Self {
        Self {
            name: name.into(),
            outcome: JobStatus::Failed,
            value: None,
            exc: Some(exc.into()),
            exec_time,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == JobStatus::Success
    }

    /// Value on success, error payload on failure.
    pub fn into_outcome(self) -> Result<Value, String> {
        match self.outcome {
            JobStatus::Success => Ok(self.value.unwrap_or(Value::Null)),
            JobStatus::Failed => Err(self.exc.unwrap_or_default()),
        }
    }
}
