//! Delivery of execution results to task webhooks

use crate::scheduler::task::TaskExecutionResult;
use crate::HarvestError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Timeout for one webhook delivery
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Receives the result of every execution of a task with a webhook
#[async_trait]
pub trait TaskNotifier: Send + Sync {
    async fn notify(&self, webhook: &str, result: &TaskExecutionResult) -> Result<(), HarvestError>;
}

/// Posts execution results as JSON
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TaskNotifier for WebhookNotifier {
    async fn notify(&self, webhook: &str, result: &TaskExecutionResult) -> Result<(), HarvestError> {
        self.client
            .post(webhook)
            .timeout(WEBHOOK_TIMEOUT)
            .json(result)
            .send()
            .await?
            .error_for_status()?;

        tracing::debug!("Delivered result of task {} to {}", result.task_id, webhook);
        Ok(())
    }
}

/// Drops every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl TaskNotifier for NoopNotifier {
    async fn notify(&self, _webhook: &str, _result: &TaskExecutionResult) -> Result<(), HarvestError> {
        Ok(())
    }
}
