//! Retry policy for external calls and bounded polling for bulk jobs.
//!
//! Transient network errors retry after a fixed delay; rate-limit
//! responses honor the server-supplied retry-after. Everything else —
//! locked destinations in particular — surfaces immediately. Exhausting
//! the ceiling escalates to an item-level failure, never a batch abort.

use std::time::Duration;

use tracing::{info, warn};

use graybox_shared::{GrayboxError, Result};

use crate::service::{AdminApi, BulkOperation, JobHandle, JobState, PathJobStatus};

/// Retry ceiling and delays for external calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts per operation.
    pub max_attempts: u32,
    /// Delay between transient-error retries.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_secs(3),
        }
    }
}

/// Run an operation under the retry policy.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = match &e {
                    GrayboxError::RateLimited { retry_after_secs } => {
                        Duration::from_secs(*retry_after_secs)
                    }
                    _ => policy.retry_delay,
                };
                warn!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(op = op_name, attempt, error = %e, "retry ceiling exhausted");
                }
                return Err(e);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Bulk job polling
// ---------------------------------------------------------------------------

/// Polling bounds for bulk jobs.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Maximum status checks before the job is treated as failed.
    pub max_checks: u32,
    /// Fixed delay between checks.
    pub check_interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_checks: 30,
            check_interval: Duration::from_secs(5),
        }
    }
}

/// Start a bulk job and poll it to completion.
///
/// Every input path gets a result entry; paths the job never reported are
/// marked unsuccessful so downstream stages can account for them.
pub async fn run_bulk_job(
    admin: &dyn AdminApi,
    retry: RetryPolicy,
    poll: PollPolicy,
    paths: &[String],
    operation: BulkOperation,
    experience_scope: Option<&str>,
) -> Vec<PathJobStatus> {
    let mut statuses: Vec<PathJobStatus> = paths
        .iter()
        .map(|path| PathJobStatus {
            path: path.clone(),
            success: false,
            file_name: String::new(),
            resource_path: String::new(),
            response_code: 0,
        })
        .collect();
    if statuses.is_empty() {
        return statuses;
    }

    let handle = match with_retry(retry, "start_bulk_job", || {
        admin.start_bulk_job(paths, operation, experience_scope)
    })
    .await
    {
        Ok(handle) => handle,
        Err(e) => {
            warn!(%operation, error = %e, "bulk job failed to start");
            return statuses;
        }
    };
    info!(%operation, job = %handle.0, paths = paths.len(), "bulk job started");

    let mut checks = 0;
    loop {
        checks += 1;
        match admin.job_status(&handle).await {
            Ok(report) => {
                for resource in &report.resources {
                    if let Some(status) =
                        statuses.iter_mut().find(|s| s.path == resource.path)
                    {
                        *status = resource.clone();
                    }
                }
                match report.state {
                    JobState::Stopped | JobState::Cancelled => break,
                    JobState::Running => {}
                }
            }
            Err(e) => {
                warn!(job = %handle.0, error = %e, "job status check failed");
            }
        }
        if checks >= poll.max_checks {
            warn!(job = %handle.0, checks, "poll budget exhausted, treating job as failed");
            break;
        }
        tokio::time::sleep(poll.check_interval).await;
    }

    statuses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::JobReport;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn transient_errors_retry_to_success() {
        let attempts = AtomicU32::new(0);
        let result = with_retry(fast_retry(), "op", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(GrayboxError::Network("reset".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .expect("eventually succeeds");
        assert_eq!(result, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn ceiling_exhaustion_surfaces_the_error() {
        let attempts = AtomicU32::new(0);
        let err = with_retry(fast_retry(), "op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(GrayboxError::Network("reset".into())) }
        })
        .await
        .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn locked_is_never_retried() {
        let attempts = AtomicU32::new(0);
        let err = with_retry(fast_retry(), "op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(GrayboxError::locked("/a.docx")) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, GrayboxError::Locked { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_limit_honors_retry_after() {
        let attempts = AtomicU32::new(0);
        let start = std::time::Instant::now();
        let result = with_retry(fast_retry(), "op", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(GrayboxError::RateLimited {
                        retry_after_secs: 0,
                    })
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    struct ScriptedAdmin {
        reports: Mutex<Vec<JobReport>>,
    }

    #[async_trait]
    impl AdminApi for ScriptedAdmin {
        async fn start_bulk_job(
            &self,
            _paths: &[String],
            _operation: BulkOperation,
            _scope: Option<&str>,
        ) -> graybox_shared::Result<JobHandle> {
            Ok(JobHandle("job-1".into()))
        }

        async fn job_status(&self, _handle: &JobHandle) -> graybox_shared::Result<JobReport> {
            let mut reports = self.reports.lock().expect("lock");
            if reports.len() > 1 {
                Ok(reports.remove(0))
            } else {
                Ok(reports[0].clone())
            }
        }
    }

    #[tokio::test]
    async fn job_polls_until_stopped_and_merges_results() {
        let admin = ScriptedAdmin {
            reports: Mutex::new(vec![
                JobReport {
                    state: JobState::Running,
                    resources: vec![],
                },
                JobReport {
                    state: JobState::Stopped,
                    resources: vec![PathJobStatus {
                        path: "/a".into(),
                        success: true,
                        file_name: "a.docx".into(),
                        resource_path: "/a.md".into(),
                        response_code: 200,
                    }],
                },
            ]),
        };
        let poll = PollPolicy {
            max_checks: 5,
            check_interval: Duration::from_millis(1),
        };
        let statuses = run_bulk_job(
            &admin,
            fast_retry(),
            poll,
            &["/a".into(), "/b".into()],
            BulkOperation::Preview,
            Some("summer-launch"),
        )
        .await;

        assert_eq!(statuses.len(), 2);
        let a = statuses.iter().find(|s| s.path == "/a").expect("a");
        assert!(a.success);
        // The job never reported /b: unsuccessful by default.
        let b = statuses.iter().find(|s| s.path == "/b").expect("b");
        assert!(!b.success);
    }

    #[tokio::test]
    async fn poll_budget_bounds_a_job_that_never_stops() {
        let admin = ScriptedAdmin {
            reports: Mutex::new(vec![JobReport {
                state: JobState::Running,
                resources: vec![],
            }]),
        };
        let poll = PollPolicy {
            max_checks: 3,
            check_interval: Duration::from_millis(1),
        };
        let statuses = run_bulk_job(
            &admin,
            fast_retry(),
            poll,
            &["/a".into()],
            BulkOperation::Preview,
            None,
        )
        .await;
        assert!(!statuses[0].success);
    }
}
