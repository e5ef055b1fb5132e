//! Control channel - JSON-RPC 2.0 over HTTP
//!
//! Two surfaces: the worker's (one pipeline) and the master's (the queue).

pub mod client;
pub mod master;
pub mod protocol;
pub mod worker;

pub use client::{MasterClient, RpcClient, WorkerClient};
pub use protocol::{Params, RpcError, RpcRequest, RpcResponse};
pub use worker::WorkerServer;
