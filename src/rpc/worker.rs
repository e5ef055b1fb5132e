//! Worker control surface
//!
//! Serves `run`, `abort`, `worker_info` and `active_worker` for the one
//! pipeline of this process. The pipeline runs on a blocking thread so the
//! server keeps answering while it executes. Once the pipeline ends, in any
//! way, the server shuts down and the process can exit with the outcome's
//! code.

use super::protocol::{RpcError, RpcRequest, RpcResponse};
use crate::core::{Context, Engine, Node, RunOutcome};
use axum::{extract::State, routing::post, Json, Router};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;

pub struct WorkerServer {
    engine: Arc<Engine>,
    root: Arc<Node>,
    context: Context,
    started: AtomicBool,
    outcome: Mutex<Option<RunOutcome>>,
    shutdown: Notify,
}

impl WorkerServer {
    pub fn new(engine: Arc<Engine>, root: Node, context: Context) -> Arc<Self> {
        Arc::new(Self {
            engine,
            root: Arc::new(root),
            context,
            started: AtomicBool::new(false),
            outcome: Mutex::new(None),
            shutdown: Notify::new(),
        })
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/", post(handle_rpc))
            .with_state(Arc::clone(self))
    }

    /// Serve until the pipeline has ended (or [`interrupt`](Self::interrupt)
    /// stops a server whose pipeline never started). With `auto_run` the
    /// pipeline starts right away instead of waiting for a `run` call.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        auto_run: bool,
    ) -> std::io::Result<Option<RunOutcome>> {
        if let Ok(addr) = listener.local_addr() {
            log::info!("Worker control server listening on {}", addr);
        }
        if auto_run {
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.run_pipeline().await {
                    log::error!("Auto-run failed: {}", e.message);
                }
            });
        }

        let waiter = Arc::clone(&self);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { waiter.shutdown.notified().await })
            .await?;
        log::info!("Worker control server stopped");
        Ok(self.outcome())
    }

    /// Execute the pipeline and wait for it; only the first call runs it
    pub async fn run_pipeline(self: &Arc<Self>) -> Result<RunOutcome, RpcError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RpcError::invalid_request("pipeline already started"));
        }
        log::info!("Pipeline started");

        let server = Arc::clone(self);
        let runner = tokio::spawn(async move {
            let _shutdown = ShutdownOnDrop(Arc::clone(&server));
            let engine = Arc::clone(&server.engine);
            let root = Arc::clone(&server.root);
            let context = server.context.clone();

            let outcome = match tokio::task::spawn_blocking(move || engine.run(&root, context)).await {
                Ok(result) => RunOutcome::from_result(&result),
                Err(e) => RunOutcome::Failed(format!("pipeline thread panicked: {}", e)),
            };
            log::info!("Pipeline {}", outcome);
            *server.outcome.lock() = Some(outcome.clone());
            outcome
        });

        runner
            .await
            .map_err(|e| RpcError::internal(format!("pipeline task failed: {}", e)))
    }

    /// Abort the running pipeline, if any
    pub fn abort(&self) {
        self.engine.control.abort();
    }

    /// Abort; a server whose pipeline never started shuts down right away
    pub fn interrupt(&self) {
        self.abort();
        if !self.started.load(Ordering::SeqCst) {
            self.shutdown.notify_one();
        }
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.outcome.lock().clone()
    }
}

/// Shuts the server down when the pipeline task ends, even by panic
struct ShutdownOnDrop(Arc<WorkerServer>);

impl Drop for ShutdownOnDrop {
    fn drop(&mut self) {
        self.0.shutdown.notify_one();
    }
}

async fn handle_rpc(
    State(server): State<Arc<WorkerServer>>,
    Json(request): Json<RpcRequest>,
) -> Json<RpcResponse> {
    log::debug!("Worker RPC {}", request.method);
    let result = match request.method.as_str() {
        "run" => server.run_pipeline().await.map(|_| Value::Null),
        "abort" => {
            server.abort();
            Ok(Value::Null)
        }
        "worker_info" => serde_json::to_value(server.engine.control.worker_info())
            .map_err(|e| RpcError::internal(e.to_string())),
        "active_worker" => Ok(Value::String(server.engine.control.active_worker())),
        other => Err(RpcError::method_not_found(other)),
    };
    Json(RpcResponse::from_result(request.id, result))
}
