//! Asynchronous job polling
//!
//! Some create calls only enqueue work and hand back a job. The poller
//! fetches the job status at a fixed interval until it reaches a terminal
//! state. With the default policy there is no attempt limit, no backoff and
//! no deadline: a job stuck in `waiting` blocks the caller indefinitely.
//! [`PollPolicy::max_wait`] opts into a deadline.

use super::client::{escape, KbcClient};
use super::codec::{id_from_value, kbc_id};
use super::endpoint::EndpointFamily;
use super::error::{ApiError, ApiResult};
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};

/// Default interval between status requests
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How a job is awaited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` waits forever
    pub max_wait: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_wait: None,
        }
    }
}

/// Where a job's status lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRef {
    pub id: String,
    pub family: EndpointFamily,
    pub path: String,
}

impl JobRef {
    /// Job in the orchestrator (Syrup) queue
    pub fn queue(id: &str) -> Self {
        Self {
            id: id.to_string(),
            family: EndpointFamily::Orchestrator,
            path: format!("queue/job/{}", escape(id)),
        }
    }

    /// Storage API job (async table imports and similar)
    pub fn storage(id: &str) -> Self {
        Self {
            id: id.to_string(),
            family: EndpointFamily::Storage,
            path: format!("jobs/{}", escape(id)),
        }
    }
}

/// Lifecycle status of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Waiting,
    Processing,
    Success,
    Error,
    Cancelled,
    Terminated,
    Other(String),
}

impl JobState {
    pub fn from_str(s: &str) -> Self {
        match s {
            "waiting" => Self::Waiting,
            "processing" => Self::Processing,
            "success" => Self::Success,
            "error" => Self::Error,
            "cancelled" => Self::Cancelled,
            "terminated" => Self::Terminated,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Error | Self::Cancelled | Self::Terminated
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Job status document, as returned by both storage and queue endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct JobStatus {
    #[serde(with = "kbc_id")]
    pub id: String,
    pub status: String,
    #[serde(default, alias = "result")]
    pub results: Value,
    #[serde(default)]
    pub error: Value,
}

impl JobStatus {
    pub fn state(&self) -> JobState {
        JobState::from_str(&self.status)
    }

    /// Id of the entity the job produced (`results.id`)
    pub fn result_id(&self) -> Option<String> {
        self.results.get("id").and_then(id_from_value)
    }

    /// Failure message, wherever the endpoint put it
    pub fn error_message(&self) -> Option<String> {
        let from_error = match &self.error {
            Value::String(s) => Some(s.clone()),
            Value::Object(_) => self
                .error
                .get("message")
                .and_then(|v| v.as_str())
                .map(String::from),
            _ => None,
        };
        from_error.or_else(|| {
            self.results
                .get("message")
                .and_then(|v| v.as_str())
                .map(String::from)
        })
    }
}

/// Terminal, successful job
#[derive(Debug, Clone)]
pub struct CompletedJob {
    pub job: JobStatus,
    /// Non-terminal observations, each followed by one sleep
    pub iterations: u32,
}

/// Wait for a job using the client's poll policy
pub async fn await_completion(client: &KbcClient, job: &JobRef) -> ApiResult<CompletedJob> {
    await_completion_with(client, job, &client.poll_policy).await
}

/// Wait for a job to reach a terminal state.
///
/// A failing terminal status is returned as [`ApiError::JobFailed`] even
/// though every HTTP call involved succeeded.
pub async fn await_completion_with(
    client: &KbcClient,
    job: &JobRef,
    policy: &PollPolicy,
) -> ApiResult<CompletedJob> {
    let started = Instant::now();
    let mut iterations: u32 = 0;

    loop {
        let status: JobStatus = client.get(job.family, &job.path).await?;
        let state = status.state();

        if state.is_terminal() {
            tracing::info!(
                "job {} finished with '{}' after {} polls",
                job.id,
                status.status,
                iterations
            );
            if state.is_success() {
                return Ok(CompletedJob {
                    job: status,
                    iterations,
                });
            }
            return Err(ApiError::JobFailed {
                job_id: job.id.clone(),
                message: status.error_message(),
                status: status.status,
            });
        }

        if let Some(max_wait) = policy.max_wait {
            if started.elapsed() >= max_wait {
                return Err(ApiError::JobTimeout {
                    job_id: job.id.clone(),
                    status: status.status,
                    waited_secs: started.elapsed().as_secs(),
                });
            }
        }

        tracing::debug!("job {} is '{}', polling again", job.id, status.status);
        iterations += 1;
        tokio::time::sleep(policy.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_terminality() {
        assert!(!JobState::from_str("waiting").is_terminal());
        assert!(!JobState::from_str("processing").is_terminal());
        assert!(JobState::from_str("success").is_terminal());
        assert!(JobState::from_str("error").is_terminal());
        assert!(JobState::from_str("cancelled").is_terminal());
        assert!(!JobState::from_str("created").is_terminal());
        assert!(matches!(JobState::from_str("created"), JobState::Other(_)));
    }

    #[test]
    fn test_job_status_decoding_variants() {
        let storage: JobStatus = serde_json::from_str(
            r#"{"id":4711,"status":"success","results":{"id":"in.c-main.users"}}"#,
        )
        .unwrap();
        assert_eq!(storage.id, "4711");
        assert_eq!(storage.result_id().as_deref(), Some("in.c-main.users"));

        let queue: JobStatus = serde_json::from_str(
            r#"{"id":"88","status":"error","result":{"message":"Credentials quota exceeded"}}"#,
        )
        .unwrap();
        assert_eq!(queue.state(), JobState::Error);
        assert_eq!(
            queue.error_message().as_deref(),
            Some("Credentials quota exceeded")
        );
    }

    #[test]
    fn test_job_refs() {
        let job = JobRef::storage("12");
        assert_eq!(job.family, EndpointFamily::Storage);
        assert_eq!(job.path, "jobs/12");

        let job = JobRef::queue("34");
        assert_eq!(job.family, EndpointFamily::Orchestrator);
        assert_eq!(job.path, "queue/job/34");
    }

    #[test]
    fn test_default_policy_waits_forever() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, Duration::from_millis(250));
        assert!(policy.max_wait.is_none());
    }
}
