//! HTTP transport seam
//!
//! The engine only needs "send this request, give me status, headers and
//! body". `HttpTransport` does that with reqwest; tests plug in their own.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chappie_common::Method;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::error::EngineResult;
use crate::materialize::MaterializedRequest;

/// Raw response as returned by the transport
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub status: u16,

    /// Header names lower-cased
    pub headers: BTreeMap<String, String>,

    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    /// Whether the body should go through visual comparison
    pub fn is_image(&self) -> bool {
        self.content_type()
            .map(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"))
            .unwrap_or(false)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure to obtain a successful response
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Connection error: {0}")]
    Connection(String),

    /// The server answered with a non-2xx status
    #[error("Request failed with status {}", .response.status)]
    Status { response: TransportResponse },
}

impl RequestError {
    /// The error response, when the server produced one
    pub fn response(&self) -> Option<&TransportResponse> {
        match self {
            RequestError::Status { response } => Some(response),
            _ => None,
        }
    }
}

/// Executes materialized requests
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &MaterializedRequest) -> Result<TransportResponse, RequestError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Option<Duration>) -> EngineResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &MaterializedRequest) -> Result<TransportResponse, RequestError> {
        let mut builder = self.client.request(http_method(request.method), &request.url);
        for (name, value) in &request.headers {
            let header_name = reqwest::header::HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                RequestError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                }
            })?;
            let header_value = reqwest::header::HeaderValue::from_str(value).map_err(|e| {
                RequestError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                }
            })?;
            builder = builder.header(header_name, header_value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        debug!("{} {}", request.method, request.url);
        let response = builder
            .send()
            .await
            .map_err(|e| RequestError::Connection(e.to_string()))?;

        let status = response.status().as_u16();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_ascii_lowercase())
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| RequestError::Connection(e.to_string()))?
            .to_vec();

        let response = TransportResponse {
            status,
            headers,
            body,
        };
        if response.is_success() {
            Ok(response)
        } else {
            Err(RequestError::Status { response })
        }
    }
}

/// Normalized projection of a response handed to assertion scripts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseView {
    pub status: u16,
    pub data: Value,
    pub headers: BTreeMap<String, String>,
}

impl ResponseView {
    /// JSON bodies are parsed, text bodies kept as text, binary bodies
    /// become `null`.
    pub fn from_response(response: &TransportResponse) -> Self {
        let mime = response
            .content_type()
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .unwrap_or_default();
        let text = || String::from_utf8_lossy(&response.body).into_owned();

        let data = if mime == "application/json" || mime.ends_with("+json") {
            serde_json::from_slice(&response.body).unwrap_or_else(|_| Value::String(text()))
        } else if mime.starts_with("text/")
            || (mime.is_empty() && std::str::from_utf8(&response.body).is_ok())
        {
            Value::String(text())
        } else {
            Value::Null
        };

        Self {
            status: response.status,
            data,
            headers: response.headers.clone(),
        }
    }
}

fn http_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
        Method::Options => reqwest::Method::OPTIONS,
    }
}
