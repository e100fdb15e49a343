//! JSON-RPC 2.0 client for ledger nodes
//!
//! Supports single calls and batched calls (array request, array response).
//! Any transport failure, non-200 status or embedded `error` member is
//! fatal for the call. Decimal numbers keep their exact textual form because
//! `serde_json` is built with `arbitrary_precision`.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Default timeout for a single RPC round trip in seconds
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error calling {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} answered with status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("{method} failed: {error}")]
    Call { method: String, error: Value },

    #[error("malformed response to {method}: {detail}")]
    Malformed { method: String, detail: String },

    #[error("batch of {expected} calls answered with {actual} entries")]
    BatchSize { expected: usize, actual: usize },

    #[error("invalid endpoint '{0}', expected host:port:user:password")]
    Endpoint(String),
}

pub type Result<T> = std::result::Result<T, RpcError>;

/// Connection details for one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub tls: bool,
    pub verify_tls: bool,
}

impl RpcEndpoint {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            tls: false,
            verify_tls: true,
        }
    }

    /// Switch to HTTPS without certificate verification (self-signed node certs)
    pub fn with_unverified_tls(mut self) -> Self {
        self.tls = true;
        self.verify_tls = false;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}/", self.host, self.port)
    }
}

impl FromStr for RpcEndpoint {
    type Err = RpcError;

    /// Parse `host:port:user:password`. The password may itself contain ':'.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(4, ':');
        let (Some(host), Some(port), Some(user), Some(password)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(RpcError::Endpoint(s.to_string()));
        };
        let port = port
            .parse::<u16>()
            .map_err(|_| RpcError::Endpoint(s.to_string()))?;
        if host.is_empty() {
            return Err(RpcError::Endpoint(s.to_string()));
        }
        Ok(Self::new(host, port, user, password))
    }
}

/// JSON-RPC client bound to one node
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    client: Client,
    endpoint: RpcEndpoint,
}

impl JsonRpcClient {
    pub fn new(endpoint: RpcEndpoint) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS))
            .danger_accept_invalid_certs(endpoint.tls && !endpoint.verify_tls)
            .build()
            .map_err(|source| RpcError::Transport {
                endpoint: endpoint.address(),
                source,
            })?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &RpcEndpoint {
        &self.endpoint
    }

    /// Single call returning the raw `result` member
    pub async fn call_value(&self, method: &str, params: Value) -> Result<Value> {
        let body = json!({"jsonrpc": "2.0", "id": "0", "method": method, "params": params});
        let response = self.post(method, &body).await?;
        unwrap_entry(method, response)
    }

    /// Single call deserialized into `T`
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.call_value(method, params).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Malformed {
            method: method.to_string(),
            detail: e.to_string(),
        })
    }

    /// Batched call. Results come back in request order.
    pub async fn batch(&self, method: &str, params: Vec<Value>) -> Result<Vec<Value>> {
        if params.is_empty() {
            return Ok(Vec::new());
        }

        let expected = params.len();
        let body: Vec<Value> = params
            .into_iter()
            .enumerate()
            .map(|(id, p)| json!({"jsonrpc": "2.0", "id": id, "method": method, "params": p}))
            .collect();

        let response = self.post(method, &Value::Array(body)).await?;
        let Value::Array(entries) = response else {
            return Err(RpcError::Malformed {
                method: method.to_string(),
                detail: "batch response is not an array".to_string(),
            });
        };
        if entries.len() != expected {
            return Err(RpcError::BatchSize {
                expected,
                actual: entries.len(),
            });
        }

        let mut ordered: Vec<Option<Value>> = vec![None; expected];
        for (position, entry) in entries.into_iter().enumerate() {
            // Servers may reorder batch entries; fall back to position when ids are absent
            let slot = entry
                .get("id")
                .and_then(|id| id.to_string().trim_matches('"').parse::<usize>().ok())
                .filter(|id| *id < expected)
                .unwrap_or(position);
            let result = unwrap_entry(method, entry)?;
            ordered[slot] = Some(result);
        }

        ordered
            .into_iter()
            .map(|entry| {
                entry.ok_or_else(|| RpcError::Malformed {
                    method: method.to_string(),
                    detail: "duplicate ids in batch response".to_string(),
                })
            })
            .collect()
    }

    async fn post(&self, method: &str, body: &Value) -> Result<Value> {
        trace!(endpoint = %self.endpoint.address(), method, "rpc call");

        let transport = |source| RpcError::Transport {
            endpoint: self.endpoint.address(),
            source,
        };

        let response = self
            .client
            .post(self.endpoint.url())
            .basic_auth(&self.endpoint.user, Some(&self.endpoint.password))
            .json(body)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status.as_u16() != 200 {
            return Err(RpcError::Status {
                endpoint: self.endpoint.address(),
                status: status.as_u16(),
            });
        }

        let text = response.text().await.map_err(transport)?;
        serde_json::from_str(&text).map_err(|e| RpcError::Malformed {
            method: method.to_string(),
            detail: e.to_string(),
        })
    }
}

fn unwrap_entry(method: &str, mut entry: Value) -> Result<Value> {
    if let Some(error) = entry.get("error") {
        if !error.is_null() {
            return Err(RpcError::Call {
                method: method.to_string(),
                error: error.clone(),
            });
        }
    }
    match entry.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(RpcError::Malformed {
            method: method.to_string(),
            detail: "missing result".to_string(),
        }),
    }
}

/// Exact textual form of a JSON number or string amount
pub fn decimal_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> JsonRpcClient {
        let address = server.address();
        let endpoint = RpcEndpoint::new(address.ip().to_string(), address.port(), "user", "pass");
        JsonRpcClient::new(endpoint).unwrap()
    }

    #[test]
    fn test_endpoint_parsing() {
        let endpoint: RpcEndpoint = "10.0.0.5:8332:rpc:se:cret".parse().unwrap();
        assert_eq!(endpoint.host, "10.0.0.5");
        assert_eq!(endpoint.port, 8332);
        assert_eq!(endpoint.user, "rpc");
        assert_eq!(endpoint.password, "se:cret");
        assert_eq!(endpoint.url(), "http://10.0.0.5:8332/");

        assert!("localhost:8332".parse::<RpcEndpoint>().is_err());
        assert!("localhost:port:u:p".parse::<RpcEndpoint>().is_err());
    }

    #[test]
    fn test_unverified_tls_uses_https() {
        let endpoint = RpcEndpoint::new("node", 9109, "u", "p").with_unverified_tls();
        assert_eq!(endpoint.url(), "https://node:9109/");
        assert!(!endpoint.verify_tls);
    }

    #[tokio::test]
    async fn test_single_call_keeps_decimal_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header_exists("authorization"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"result": 0.10000000, "error": null, "id": "0"}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let value = client_for(&server)
            .call_value("getbalance", json!([]))
            .await
            .unwrap();
        assert_eq!(decimal_text(&value).unwrap(), "0.10000000");
    }

    #[tokio::test]
    async fn test_embedded_error_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": null,
                "error": {"code": -8, "message": "Block height out of range"},
                "id": "0"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .call_value("getblockhash", json!([999_999_999]))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Call { .. }));
    }

    #[tokio::test]
    async fn test_non_200_status_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .call_value("getblockcount", json!([]))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_batch_orders_by_id_and_rejects_entry_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"result": "second", "error": null, "id": 1},
                {"result": "first", "error": null, "id": 0}
            ])))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let results = client
            .batch("getrawtransaction", vec![json!(["a", 1]), json!(["b", 1])])
            .await
            .unwrap();
        assert_eq!(results, vec![json!("first"), json!("second")]);

        assert!(client.batch("getrawtransaction", vec![]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_entry_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"result": "ok", "error": null, "id": 0},
                {"result": null, "error": {"code": -5, "message": "No such transaction"}, "id": 1}
            ])))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .batch("getrawtransaction", vec![json!(["a", 1]), json!(["b", 1])])
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Call { .. }));
    }
}
