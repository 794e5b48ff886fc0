//! Worker invocation context and the worker response envelope.

use std::sync::Arc;
use std::time::Duration;

use graybox_executor::{AdminApi, ObjectStore, PollPolicy, Promoter, RetryPolicy};
use graybox_shared::{GrayboxError, PromoteParams, Result};
use graybox_store::FileStore;
use graybox_transform::{DocumentRenderer, MarkdownParser, SpreadsheetCodec};

/// User-Agent string for content fetches from workers.
const USER_AGENT: &str = concat!("GrayboxPromote/", env!("CARGO_PKG_VERSION"));

/// Everything a stage worker needs: the state store, the external service
/// handles, and the replayed trigger parameters.
#[derive(Clone)]
pub struct WorkerContext {
    pub state: FileStore,
    pub objects: Arc<dyn ObjectStore>,
    pub admin: Arc<dyn AdminApi>,
    pub parser: Arc<dyn MarkdownParser>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub codec: Arc<dyn SpreadsheetCodec>,
    pub http: reqwest::Client,
    pub params: PromoteParams,
    pub batch_size: usize,
    pub retry: RetryPolicy,
    pub poll: PollPolicy,
}

impl WorkerContext {
    /// Build an HTTP client with the pipeline's User-Agent and timeout.
    pub fn http_client() -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GrayboxError::Network(format!("failed to build HTTP client: {e}")))
    }

    /// The project path this context operates on.
    pub fn project(&self) -> String {
        self.params.project_path()
    }

    /// Executor over the destination store with this context's retry policy.
    pub fn promoter(&self) -> Promoter {
        Promoter::new(self.objects.clone(), self.retry)
    }
}

/// A worker's top-level return. Always success-shaped past the entry
/// validation: item failures are recorded in the state store, not surfaced
/// through the invocation's exit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerResponse {
    pub status_code: u16,
    pub body: String,
}

impl WorkerResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status_code: 200,
            body: body.into(),
        }
    }

    /// Entry-point rejection for a bad trigger request.
    pub fn client_error(body: impl Into<String>) -> Self {
        Self {
            status_code: 400,
            body: body.into(),
        }
    }

    /// Internal failure before any stage work started.
    pub fn server_error(body: impl Into<String>) -> Self {
        Self {
            status_code: 500,
            body: body.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_constructors() {
        assert_eq!(WorkerResponse::ok("done").status_code, 200);
        assert_eq!(WorkerResponse::client_error("bad").status_code, 400);
        assert_eq!(WorkerResponse::server_error("boom").status_code, 500);
    }
}
