//! RPC clients for the worker and master surfaces

use super::protocol::{RpcRequest, RpcResponse};
use crate::core::TaskInfo;
use crate::error::ControlError;
use crate::queue::{JobId, JobState, JobSummary};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Untyped JSON-RPC client
#[derive(Debug, Clone)]
pub struct RpcClient {
    url: String,
    http: reqwest::Client,
    request_id: Arc<AtomicU64>,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
            request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Client for a server on this machine
    pub fn local(port: u16) -> Self {
        Self::new(format!("http://127.0.0.1:{}/", port))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method`, waiting as long as the server takes
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, ControlError> {
        self.call_with_timeout(method, params, None).await
    }

    pub async fn call_with_timeout<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<T, ControlError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest::new(id, method, params);
        log::debug!("RPC {} -> {} (id {})", method, self.url, id);

        let mut builder = self.http.post(&self.url).json(&request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ControlError::from_reqwest(&self.url, e))?;
        if !response.status().is_success() {
            return Err(ControlError::Decode(format!(
                "HTTP {} from {}",
                response.status(),
                self.url
            )));
        }
        let response: RpcResponse = response
            .json()
            .await
            .map_err(|e| ControlError::from_reqwest(&self.url, e))?;

        if let Some(error) = response.error {
            return Err(ControlError::Remote {
                code: error.code,
                message: error.message,
            });
        }
        let result = response.result.unwrap_or(Value::Null);
        serde_json::from_value(result)
            .map_err(|e| ControlError::Decode(format!("{} result: {}", method, e)))
    }
}

/// Client for a worker's control surface
#[derive(Debug, Clone)]
pub struct WorkerClient {
    rpc: RpcClient,
}

impl WorkerClient {
    pub fn new(port: u16) -> Self {
        Self {
            rpc: RpcClient::local(port),
        }
    }

    pub fn url(&self) -> &str {
        self.rpc.url()
    }

    /// Execute the pipeline; returns when the worker is done
    pub async fn run(&self) -> Result<(), ControlError> {
        self.rpc.call("run", vec![]).await
    }

    /// `run`, retried while the worker's server is not up yet
    pub async fn run_with_retry(&self, attempts: u32, delay: Duration) -> Result<(), ControlError> {
        let mut attempt = 1;
        loop {
            match self.run().await {
                Err(e) if e.is_unreachable() && attempt < attempts => {
                    log::debug!("Worker at {} not up yet (attempt {}/{})", self.url(), attempt, attempts);
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    pub async fn abort(&self, timeout: Duration) -> Result<(), ControlError> {
        self.rpc.call_with_timeout("abort", vec![], Some(timeout)).await
    }

    pub async fn worker_info(&self, timeout: Duration) -> Result<TaskInfo, ControlError> {
        self.rpc
            .call_with_timeout("worker_info", vec![], Some(timeout))
            .await
    }

    pub async fn active_worker(&self, timeout: Duration) -> Result<String, ControlError> {
        self.rpc
            .call_with_timeout("active_worker", vec![], Some(timeout))
            .await
    }
}

/// Client for the master's queue surface
#[derive(Debug, Clone)]
pub struct MasterClient {
    rpc: RpcClient,
}

impl MasterClient {
    pub fn new(port: u16) -> Self {
        Self {
            rpc: RpcClient::local(port),
        }
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            rpc: RpcClient::new(url),
        }
    }

    pub async fn enqueue(&self, prio: i64, config: &str) -> Result<JobId, ControlError> {
        self.rpc.call("enqueue", vec![json!(prio), json!(config)]).await
    }

    pub async fn start_queue(&self) -> Result<bool, ControlError> {
        self.rpc.call("start_queue", vec![]).await
    }

    pub async fn stop_queue(&self) -> Result<bool, ControlError> {
        self.rpc.call("stop_queue", vec![]).await
    }

    pub async fn queue_state(&self) -> Result<JobState, ControlError> {
        self.rpc.call("queue_state", vec![]).await
    }

    pub async fn get_queue(&self) -> Result<Vec<JobSummary>, ControlError> {
        self.rpc.call("get_queue", vec![]).await
    }

    pub async fn delete(&self, jid: JobId) -> Result<JobId, ControlError> {
        self.rpc.call("delete", vec![json!(jid)]).await
    }

    pub async fn abort(&self, jid: JobId, force: bool) -> Result<i64, ControlError> {
        self.rpc.call("abort", vec![json!(jid), json!(force)]).await
    }

    pub async fn reprio(&self, jid: JobId, prio: i64) -> Result<JobId, ControlError> {
        self.rpc.call("reprio", vec![json!(jid), json!(prio)]).await
    }
}
