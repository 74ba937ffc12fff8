/// Transport module: JSON-RPC 2.0 client for the wallet and the ledger node.
///
/// Wraps `reqwest::blocking::Client` with a request timeout so that every
/// wallet or ledger call is bounded. Request ids are a per-client counter.
///
/// Envelope shapes:
///   request:  {"jsonrpc":"2.0","id":<n>,"method":"<m>","params":[...]}
///   success:  {"jsonrpc":"2.0","id":<n>,"result":<any>}
///   failure:  {"jsonrpc":"2.0","id":<n>,"error":{"code":<i64>,"message":"..."}}
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::VaultError;

/// EIP-1193 "User Rejected Request".
pub const USER_REJECTED_CODE: i64 = 4001;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("endpoint returned HTTP {0}")]
    Status(u16),

    #[error("RPC error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("invalid RPC response: {0}")]
    InvalidResponse(String),
}

impl RpcError {
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, RpcError::Remote { code, .. } if *code == USER_REJECTED_CODE)
    }
}

/// Default mapping: a declined prompt is `UserRejected`, everything else means
/// the wallet or node could not serve the request.
impl From<RpcError> for VaultError {
    fn from(err: RpcError) -> Self {
        if err.is_user_rejection() {
            VaultError::UserRejected
        } else {
            VaultError::LedgerUnavailable(err.to_string())
        }
    }
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    #[serde(default)]
    message: String,
}

/// Build the JSON body of one request.
pub fn build_request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Decode a response body into the typed `result`.
///
/// A missing `result` is read as `null`, so `Option<T>` results (pending
/// receipts) decode to `None`.
pub fn parse_response<T: DeserializeOwned>(body: &str) -> Result<T, RpcError> {
    let response: RpcResponse =
        serde_json::from_str(body).map_err(|e| RpcError::InvalidResponse(e.to_string()))?;
    if let Some(err) = response.error {
        return Err(RpcError::Remote {
            code: err.code,
            message: err.message,
        });
    }
    serde_json::from_value(response.result.unwrap_or(Value::Null))
        .map_err(|e| RpcError::InvalidResponse(e.to_string()))
}

pub struct RpcClient {
    client: reqwest::blocking::Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| RpcError::Transport {
                url: url.to_string(),
                source,
            })?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST one call and decode its result.
    pub fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(method, id, url = %self.url, "rpc call");

        let response = self
            .client
            .post(&self.url)
            .json(&build_request(id, method, params))
            .send()
            .map_err(|source| RpcError::Transport {
                url: self.url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(RpcError::Status(response.status().as_u16()));
        }

        let body = response.text().map_err(|source| RpcError::Transport {
            url: self.url.clone(),
            source,
        })?;
        parse_response(&body)
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient").field("url", &self.url).finish()
    }
}
