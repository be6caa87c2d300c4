//! Transport seam between the coordinator and the backend.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::TransportError;

/// Performs one request attempt. Retries and timeouts belong to the
/// coordinator; implementations should not add their own.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn fetch(&self, endpoint: &str, params: &Map<String, Value>) -> Result<Value, TransportError>;
}

/// Query-string pairs for `params`. Nulls are skipped and strings are sent
/// without JSON quoting.
pub fn query_pairs(params: &Map<String, Value>) -> Vec<(String, String)> {
    params
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), v)
        })
        .collect()
}

/// JSON over HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, endpoint: &str, params: &Map<String, Value>) -> Result<Value, TransportError> {
        let response = self
            .client
            .get(self.url(endpoint))
            .query(&query_pairs(params))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let transport =
            HttpTransport::with_client(reqwest::Client::new(), "http://localhost:3000/");
        assert_eq!(transport.base_url(), "http://localhost:3000");
        assert_eq!(transport.url("/api/summary"), "http://localhost:3000/api/summary");
        assert_eq!(transport.url("api/summary"), "http://localhost:3000/api/summary");
    }

    #[test]
    fn test_query_pairs_skip_nulls() {
        let params = serde_json::json!({ "orgao": "SEMSA", "ano": 2024, "tema": null });
        let Value::Object(params) = params else {
            panic!("object literal");
        };
        let mut pairs = query_pairs(&params);
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("ano".to_string(), "2024".to_string()),
                ("orgao".to_string(), "SEMSA".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let transport = HttpTransport::new("http://127.0.0.1:1").expect("client should build");
        let err = transport
            .fetch("/api/summary", &Map::new())
            .await
            .expect_err("nothing listens on port 1");
        assert!(matches!(err, TransportError::Network(_)));
        assert!(err.is_retryable());
    }
}
