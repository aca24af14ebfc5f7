//! JSON-RPC 2.0 transport to a ledger gateway.
//!
//! One HTTP POST per call. Every request carries the registry address in
//! its `params`. Methods:
//!
//! | Method                      | Params                               | Result                      |
//! |-----------------------------|--------------------------------------|-----------------------------|
//! | `tid_getTourist`            | `registry`, `touristID`              | record or `null`            |
//! | `tid_listTouristIds`        | `registry`                           | `[touristID]`               |
//! | `tid_blockNumber`           | `registry`                           | head block                  |
//! | `tid_getRegistrationEvents` | `registry`, `fromBlock`, `toBlock`   | `[{block, touristID}]`      |
//! | `tid_getSequence`           | `registry`, `signer`                 | next sequence               |
//! | `tid_sendTransaction`       | `registry`, `transaction`            | transaction hash            |
//! | `tid_getTransactionReceipt` | `registry`, `hash`                   | receipt or `null`           |
//!
//! Gateway errors use JSON-RPC error objects; `data.rejectCode` carries the
//! ledger's rejection code for refused transactions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::transaction::{SignedTransaction, TxHash};
use super::{LedgerTransport, RegistrationEvent, RejectCode, TxReceipt};
use crate::crypto::SignerAddress;
use crate::error::{ReconcileError, Result};
use crate::identity::{IdentityRecord, TouristId};

/// JSON-RPC error code the gateway uses for "no such key".
const NOT_FOUND_CODE: i64 = -32004;
/// JSON-RPC error code for "method not found".
const METHOD_NOT_FOUND_CODE: i64 = -32601;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl RpcErrorObject {
    fn into_error(self, method: &str) -> ReconcileError {
        match self.code {
            NOT_FOUND_CODE => ReconcileError::NotFound(self.message),
            METHOD_NOT_FOUND_CODE => ReconcileError::Unsupported(method.to_string()),
            _ => {
                let code = self
                    .data
                    .as_ref()
                    .and_then(|d| d.get("rejectCode"))
                    .cloned()
                    .and_then(|c| serde_json::from_value::<RejectCode>(c).ok())
                    .unwrap_or(RejectCode::Other);
                ReconcileError::LedgerRejected {
                    code,
                    reason: format!("{} (rpc code {})", self.message, self.code),
                }
            }
        }
    }
}

/// HTTP JSON-RPC ledger transport.
pub struct RpcTransport {
    http: reqwest::Client,
    endpoint: url::Url,
    registry: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl RpcTransport {
    /// Build a transport for `endpoint`. `timeout` bounds each HTTP exchange.
    ///
    /// # Errors
    ///
    /// `Configuration` if the HTTP client cannot be constructed or the
    /// endpoint is not `http`/`https`.
    pub fn new(endpoint: url::Url, registry: impl Into<String>, timeout: Duration) -> Result<Self> {
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ReconcileError::Configuration(format!(
                "rpc endpoint must be http(s), got {}",
                endpoint.scheme()
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReconcileError::Configuration(format!("http client: {e}")))?;
        Ok(Self {
            http,
            endpoint,
            registry: registry.into(),
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, mut params: Value) -> Result<T> {
        if let Some(obj) = params.as_object_mut() {
            obj.insert("registry".into(), Value::String(self.registry.clone()));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.http_error(method, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReconcileError::Network(format!(
                "{method}: gateway answered HTTP {status}"
            )));
        }

        let envelope: RpcResponse = response
            .json()
            .await
            .map_err(|e| self.http_error(method, e))?;

        if let Some(err) = envelope.error {
            return Err(err.into_error(method));
        }

        serde_json::from_value(envelope.result.unwrap_or(Value::Null)).map_err(|e| {
            ReconcileError::SerializationError(format!("{method}: unexpected result shape: {e}"))
        })
    }

    fn http_error(&self, method: &str, e: reqwest::Error) -> ReconcileError {
        if e.is_timeout() {
            ReconcileError::LedgerTimeout {
                operation: method.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else if e.is_decode() {
            ReconcileError::SerializationError(format!("{method}: {e}"))
        } else {
            ReconcileError::Network(format!("{method}: {e}"))
        }
    }
}

#[async_trait]
impl LedgerTransport for RpcTransport {
    async fn get_record(&self, id: &TouristId) -> Result<Option<IdentityRecord>> {
        match self
            .call("tid_getTourist", json!({ "touristID": id }))
            .await
        {
            Err(ReconcileError::NotFound(_)) => Ok(None),
            other => other,
        }
    }

    async fn list_identity_ids(&self) -> Result<Vec<TouristId>> {
        self.call("tid_listTouristIds", json!({})).await
    }

    async fn head_block(&self) -> Result<u64> {
        self.call("tid_blockNumber", json!({})).await
    }

    async fn registration_events(&self, from: u64, to: u64) -> Result<Vec<RegistrationEvent>> {
        self.call(
            "tid_getRegistrationEvents",
            json!({ "fromBlock": from, "toBlock": to }),
        )
        .await
    }

    async fn next_sequence(&self, signer: &SignerAddress) -> Result<u64> {
        self.call("tid_getSequence", json!({ "signer": signer }))
            .await
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<TxHash> {
        self.call("tid_sendTransaction", json!({ "transaction": tx }))
            .await
    }

    async fn transaction_receipt(&self, hash: &TxHash) -> Result<Option<TxReceipt>> {
        self.call("tid_getTransactionReceipt", json!({ "hash": hash }))
            .await
    }
}
