//! Request materialization
//!
//! Turns a request template plus the variables visible at the moment a leaf
//! is visited into a concrete request description.

use chappie_common::{Method, RequestSpec};
use indexmap::IndexMap;
use reqwest::Url;
use serde_json::Value;

use crate::transport::RequestError;
use crate::variables::Variables;

/// A fully resolved request, ready for the transport
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedRequest {
    pub method: Method,

    /// Scheme, host, path and the rebuilt query string
    pub url: String,

    /// Enabled headers, values interpolated
    pub headers: IndexMap<String, String>,

    /// Query parameters actually sent, in order
    pub query: Vec<(String, String)>,

    /// JSON body text, only for methods that send one
    pub body: Option<String>,
}

/// Build a request from its template.
///
/// Any query string embedded in the URL template is dropped and rebuilt from
/// the declared parameter list: disabled parameters are skipped and only the
/// first occurrence of a name is kept.
pub fn materialize(
    spec: &RequestSpec,
    vars: &dyn Variables,
) -> Result<MaterializedRequest, RequestError> {
    let raw_url = vars.interpolate_string(&spec.url);
    let parsed = Url::parse(&raw_url).map_err(|e| RequestError::InvalidUrl {
        url: raw_url.clone(),
        reason: e.to_string(),
    })?;
    let base = format!("{}{}", parsed.origin().ascii_serialization(), parsed.path());

    let mut headers = IndexMap::new();
    for header in spec.headers.iter().filter(|h| h.enabled) {
        headers.insert(header.name.clone(), vars.interpolate_string(&header.value));
    }
    if spec.method.sends_body() {
        headers.retain(|name, _| !name.eq_ignore_ascii_case("content-type"));
        headers.insert("Content-Type".to_string(), "application/json".to_string());
    }

    let mut query: Vec<(String, String)> = Vec::new();
    for param in spec.params.iter().filter(|p| p.enabled) {
        if query.iter().any(|(name, _)| name == &param.name) {
            continue;
        }
        query.push((param.name.clone(), vars.interpolate_string(&param.value)));
    }

    let url = if query.is_empty() {
        base
    } else {
        let encoded = reqwest::Url::parse_with_params(&base, &query)
            .map_err(|e| RequestError::InvalidUrl {
                url: base.clone(),
                reason: e.to_string(),
            })?;
        encoded.to_string()
    };

    let body = if spec.method.sends_body() {
        spec.body.json.as_ref().map(|template| match template {
            Value::String(text) => vars.interpolate_string(text),
            structured => vars.interpolate_object(structured).to_string(),
        })
    } else {
        None
    };

    Ok(MaterializedRequest {
        method: spec.method,
        url,
        headers,
        query,
        body,
    })
}
