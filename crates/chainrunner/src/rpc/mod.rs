//! A minimal JSON-RPC 2.0 client speaking HTTP/1.1 to a node on localhost.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use derive_more::Display;
use futures::SinkExt;
use http::Request;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;

use crate::async_helpers::with_timeout;
use crate::error::ChainError;
use crate::rpc::codec::JsonHttp;

pub mod codec;

/// Upper bound on a single RPC round trip.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Value::is_null", default)]
    pub params: Value,
    pub id: String,
}

impl RpcRequest {
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Display)]
#[display(fmt = "RpcError(code={}, message={})", code, message)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A parsed reply: either the `result` or the `error` member of the response object.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcResponse {
    Ok { result: Value, id: Value },
    Error { error: RpcError, id: Value },
}

impl RpcResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self, RpcResponse::Ok { .. })
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            RpcResponse::Ok { result, .. } => Some(result),
            RpcResponse::Error { .. } => None,
        }
    }

    pub fn into_result(self) -> Result<Value> {
        match self {
            RpcResponse::Ok { result, .. } => Ok(result),
            RpcResponse::Error { error, .. } => bail!("{}", error),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
    #[serde(default)]
    id: Value,
}

impl RawResponse {
    fn into_rpc_response(self) -> RpcResponse {
        match (self.result, self.error) {
            (_, Some(error)) => RpcResponse::Error { error, id: self.id },
            (Some(result), None) => RpcResponse::Ok {
                result,
                id: self.id,
            },
            // `"result": null` deserializes to `None`.
            (None, None) => RpcResponse::Ok {
                result: Value::Null,
                id: self.id,
            },
        }
    }
}

/// Performs a single call against `http://localhost:<port>/`. Never retries.
pub async fn call(port: u16, method: &str, params: Value) -> Result<RpcResponse> {
    with_timeout(RPC_TIMEOUT, || send(port, RpcRequest::new(method, params)))
        .await
        .with_context(|| format!("Calling `{}` on port {}", method, port))
}

async fn send(port: u16, request: RpcRequest) -> Result<RpcResponse> {
    let host = format!("localhost:{}", port);
    let stream = TcpStream::connect(&host)
        .await
        .map_err(|e| ChainError::Rpc(format!("connecting to {}: {}", host, e)))?;

    let mut transport = Framed::new(stream, JsonHttp::<RpcRequest, RawResponse>::new());

    debug!("RPC -> {}: {} {}", host, request.method, request.params);
    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("Host", host.as_str())
        .header("Content-Type", "application/json")
        .body(request)?;
    transport.send(request).await?;

    match transport.next().await {
        Some(Ok(response)) => {
            if !response.status().is_success() && response.body().error.is_none() {
                bail!(ChainError::Rpc(format!("HTTP status {}", response.status())));
            }
            Ok(response.into_body().into_rpc_response())
        }
        Some(Err(e)) => Err(e),
        None => bail!(ChainError::Rpc("connection closed before a response arrived".to_string())),
    }
}
