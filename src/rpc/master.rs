//! Master control surface - JSON-RPC forwarding onto the job queue

use super::protocol::{Params, RpcError, RpcRequest, RpcResponse};
use crate::queue::JobQueue;
use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Value};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Methods served by the master
pub const METHODS: [&str; 9] = [
    "enqueue",
    "start_queue",
    "stop_queue",
    "queue_state",
    "get_queue",
    "delete",
    "abort",
    "reprio",
    "system.listMethods",
];

pub fn router(queue: Arc<JobQueue>) -> Router {
    Router::new()
        .route("/", post(handle_rpc))
        .with_state(queue)
}

/// Serve the master surface until `shutdown` completes
pub async fn serve<F>(queue: Arc<JobQueue>, listener: TcpListener, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        log::info!("Master control server listening on {}", addr);
    }
    axum::serve(listener, router(queue))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn handle_rpc(
    State(queue): State<Arc<JobQueue>>,
    Json(request): Json<RpcRequest>,
) -> Json<RpcResponse> {
    log::debug!("Master RPC {} {:?}", request.method, request.params);
    let result = dispatch(&queue, &request).await;
    if let Err(e) = &result {
        log::warn!("RPC {} failed: {}", request.method, e.message);
    }
    Json(RpcResponse::from_result(request.id, result))
}

async fn dispatch(queue: &Arc<JobQueue>, request: &RpcRequest) -> Result<Value, RpcError> {
    let params: Params<'_> = request.params();
    match request.method.as_str() {
        "enqueue" => {
            let prio = params.int(0)?;
            let config = params.string(1)?;
            queue
                .enqueue(prio, Path::new(&config))
                .map(|jid| json!(jid))
                .map_err(|e| RpcError::invalid_params(e.to_string()))
        }
        "start_queue" => Ok(json!(queue.start())),
        "stop_queue" => Ok(json!(queue.stop())),
        "queue_state" => Ok(json!(queue.state())),
        "get_queue" => Ok(json!(queue.list().await)),
        "delete" => Ok(json!(queue.delete(params.int(0)?))),
        "abort" => {
            let jid = params.int(0)?;
            let force = params.opt_bool(1)?.unwrap_or(false);
            queue.abort(jid, force).await;
            Ok(json!(0))
        }
        "reprio" => Ok(json!(queue.reprio(params.int(0)?, params.int(1)?))),
        "system.listMethods" => Ok(json!(METHODS)),
        other => Err(RpcError::method_not_found(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{JobState, QueueSettings};
    use crate::rpc::{MasterClient, RpcClient};
    use crate::error::ControlError;

    async fn start_master() -> (MasterClient, RpcClient, Arc<JobQueue>) {
        let queue = Arc::new(JobQueue::new(QueueSettings::for_tests()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(serve(queue.clone(), listener, std::future::pending::<()>()));
        (MasterClient::new(port), RpcClient::local(port), queue)
    }

    #[tokio::test]
    async fn test_queue_surface() {
        let dir = tempfile::tempdir().unwrap();
        let case = dir.path().join("case.yml");
        std::fs::write(&case, "config:\n  general:\n    worker_command: \"true\"\n").unwrap();
        let case = case.to_string_lossy().to_string();
        let (master, _, _queue) = start_master().await;

        let low = master.enqueue(10, &case).await.unwrap();
        let high = master.enqueue(20, &case).await.unwrap();
        assert_eq!(master.queue_state().await.unwrap(), JobState::Stopped);

        let jobs = master.get_queue().await.unwrap();
        let order: Vec<_> = jobs.iter().map(|j| (j.jid, j.state)).collect();
        assert_eq!(order, vec![(high, JobState::Queued), (low, JobState::Queued)]);
        assert_eq!(jobs[0].config, case);

        assert_eq!(master.reprio(low, 30).await.unwrap(), low);
        assert_eq!(master.get_queue().await.unwrap()[0].jid, low);
        assert_eq!(master.reprio(999, 1).await.unwrap(), -1);

        assert_eq!(master.delete(999).await.unwrap(), 0);
        assert_eq!(master.delete(high).await.unwrap(), high);
        assert_eq!(master.abort(low, false).await.unwrap(), 0);
        assert_eq!(master.get_queue().await.unwrap().len(), 1);

        assert!(master.start_queue().await.unwrap());
        assert!(!master.start_queue().await.unwrap());
        assert_eq!(master.queue_state().await.unwrap(), JobState::Running);
        assert!(master.stop_queue().await.unwrap());
    }

    #[tokio::test]
    async fn test_errors() {
        let (master, rpc, _queue) = start_master().await;

        let err = master.enqueue(1, "/no/such/case.yml").await.unwrap_err();
        assert!(matches!(err, ControlError::Remote { code: RpcError::INVALID_PARAMS, .. }));

        let err = rpc.call::<Value>("no_such_method", vec![]).await.unwrap_err();
        assert!(matches!(err, ControlError::Remote { code: RpcError::METHOD_NOT_FOUND, .. }));

        let err = rpc.call::<Value>("delete", vec![json!("seven")]).await.unwrap_err();
        assert!(matches!(err, ControlError::Remote { code: RpcError::INVALID_PARAMS, .. }));

        let methods: Vec<String> = rpc.call("system.listMethods", vec![]).await.unwrap();
        assert_eq!(methods.len(), METHODS.len());
    }
}
