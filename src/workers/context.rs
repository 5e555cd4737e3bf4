//! Per-task execution context: collaborators plus cancellation and deadline.

use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::WorkerError;
use crate::llm::LlmClient;
use crate::tools::SharedToolRegistry;

/// Everything a worker may touch while executing one task.
#[derive(Clone)]
pub struct ExecutionContext {
    pub tools: SharedToolRegistry,
    pub llm: Arc<dyn LlmClient>,
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
    /// Output budget for completion requests.
    pub max_tokens: Option<u64>,
}

impl ExecutionContext {
    pub fn new(tools: SharedToolRegistry, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            tools,
            llm,
            cancel: CancellationToken::new(),
            deadline: None,
            max_tokens: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u64>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Race an external call against cancellation and the deadline.
    ///
    /// `during` names the call for the error message.
    pub async fn guard<F, T>(&self, during: &str, fut: F) -> Result<T, WorkerError>
    where
        F: Future<Output = T>,
    {
        if self.cancel.is_cancelled() {
            return Err(WorkerError::Cancelled {
                during: during.to_string(),
            });
        }
        if self.deadline.map_or(false, |d| Instant::now() >= d) {
            return Err(WorkerError::DeadlineExceeded {
                during: during.to_string(),
            });
        }

        let deadline = self.deadline;
        let expiry = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(WorkerError::Cancelled {
                during: during.to_string(),
            }),
            _ = expiry => Err(WorkerError::DeadlineExceeded {
                during: during.to_string(),
            }),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context_with, ScriptedLlm};
    use std::time::Duration;

    #[tokio::test]
    async fn test_guard_passes_through() {
        let ctx = context_with(ScriptedLlm::new(vec![]));
        let value = ctx.guard("noop", async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_guard_honours_cancellation() {
        let ctx = context_with(ScriptedLlm::new(vec![]));
        ctx.cancel.cancel();
        let err = ctx.guard("query_assets", async { 7 }).await.unwrap_err();
        assert!(matches!(err, WorkerError::Cancelled { ref during } if during == "query_assets"));
    }

    #[tokio::test]
    async fn test_guard_honours_deadline() {
        let ctx = context_with(ScriptedLlm::new(vec![]))
            .with_deadline(Instant::now() + Duration::from_millis(20));
        let err = ctx
            .guard("completion", tokio::time::sleep(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::DeadlineExceeded { .. }));
    }
}
