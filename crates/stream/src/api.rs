//! REST client for the jobs HTTP endpoints.
//!
//! Wraps job submission (workflow or single tool), cancellation and the
//! active-jobs listing using [`reqwest`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use mediadeck_core::workflow::{Operation, ParameterMap, SubmissionPayload, WorkflowParameters};
use mediadeck_core::Job;

/// HTTP client for the jobs API.
#[derive(Debug, Clone)]
pub struct JobsApi {
    client: reqwest::Client,
    api_url: String,
}

/// Errors from the jobs REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-2xx status. `message` is the
    /// server's `error` string, or the raw body when it has none.
    #[error("{message}")]
    Rejected { status: u16, message: String },
}

/// Error body returned with non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// The listing endpoint answers with either a bare array or `{jobs: [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JobListing {
    Bare(Vec<Job>),
    Wrapped { jobs: Vec<Job> },
}

impl JobsApi {
    /// Create a client for the API at `api_url`, e.g. `http://host:8080`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a multi-step workflow.
    ///
    /// Sends `POST /api/tools/workflow` and returns the job descriptor.
    pub async fn submit_workflow(
        &self,
        payload: &SubmissionPayload<WorkflowParameters>,
    ) -> Result<Job, ApiError> {
        self.post_json(&format!("{}/api/tools/workflow", self.api_url), payload)
            .await
    }

    /// Submit a single tool operation.
    ///
    /// Sends `POST /api/tools/{operation}` and returns the job descriptor.
    pub async fn submit_tool(
        &self,
        operation: Operation,
        payload: &SubmissionPayload<ParameterMap>,
    ) -> Result<Job, ApiError> {
        self.post_json(
            &format!("{}/api/tools/{}", self.api_url, operation.as_str()),
            payload,
        )
        .await
    }

    /// Cancel a job. Sends `DELETE /api/tools/jobs/{id}`.
    pub async fn cancel_job(&self, job_id: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(format!("{}/api/tools/jobs/{}", self.api_url, job_id))
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Fetch the jobs the backend still considers active.
    /// Sends `GET /api/tools/jobs`.
    pub async fn active_jobs(&self) -> Result<Vec<Job>, ApiError> {
        let response = self
            .client
            .get(format!("{}/api/tools/jobs", self.api_url))
            .send()
            .await?;

        let listing: JobListing = Self::parse_response(response).await?;
        Ok(match listing {
            JobListing::Bare(jobs) | JobListing::Wrapped { jobs } => jobs,
        })
    }

    // ---- private helpers ----

    async fn post_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<Job, ApiError> {
        let response = self.client.post(url).json(body).send().await?;
        let job: Job = Self::parse_response(response).await?;
        tracing::info!(job_id = %job.id, operation = %job.operation_type, "Job submitted");
        Ok(job)
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or [`ApiError::Rejected`] carrying
    /// the server's message on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            let message = match serde_json::from_str::<ErrorBody>(&body) {
                Ok(ErrorBody { error }) => error,
                Err(_) if body.trim().is_empty() => status.to_string(),
                Err(_) => body,
            };
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}
