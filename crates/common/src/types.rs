//! Collection model
//!
//! Serde model of an exported collection file: a tree of folders and HTTP
//! requests plus an optional set of environments. The tree is read-only input
//! for the whole duration of a run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Root of a collection file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    #[serde(default)]
    pub name: String,

    /// Top-level items in declaration order
    #[serde(default)]
    pub items: Vec<Item>,

    #[serde(default)]
    pub environments: Vec<Environment>,

    /// Environment selected in the authoring tool, if any
    #[serde(default, alias = "activeEnvironmentId")]
    pub active_environment_uid: Option<String>,
}

impl Collection {
    /// Parse a collection from its JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Error::from)
    }

    /// Read and parse a collection file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::CollectionRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Select the environment used for a run.
    ///
    /// The environment named by `active_environment_uid` wins; otherwise the
    /// first declared environment is used.
    pub fn active_environment(&self) -> Option<EnvironmentSelection<'_>> {
        if let Some(uid) = &self.active_environment_uid {
            if let Some(env) = self
                .environments
                .iter()
                .find(|env| env.uid.as_deref() == Some(uid.as_str()))
            {
                return Some(EnvironmentSelection::Active(env));
            }
        }
        self.environments.first().map(EnvironmentSelection::First)
    }

    /// Number of request leaves in the whole tree
    pub fn request_count(&self) -> usize {
        fn count(items: &[Item]) -> usize {
            items
                .iter()
                .map(|item| match item {
                    Item::Folder(folder) => count(&folder.items),
                    Item::HttpRequest(_) => 1,
                    Item::Unsupported => 0,
                })
                .sum()
        }
        count(&self.items)
    }
}

/// How the run environment was chosen
#[derive(Debug, Clone, Copy)]
pub enum EnvironmentSelection<'a> {
    /// Matched `active_environment_uid`
    Active(&'a Environment),
    /// Fallback to the first declared environment
    First(&'a Environment),
}

impl<'a> EnvironmentSelection<'a> {
    pub fn environment(&self) -> &'a Environment {
        match self {
            Self::Active(env) | Self::First(env) => env,
        }
    }
}

/// A node of the collection tree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Item {
    Folder(Folder),
    HttpRequest(RequestItem),
    /// Item kinds this runner does not execute (graphql, websocket, ...)
    #[serde(other)]
    Unsupported,
}

impl Item {
    /// Ordering key among siblings
    pub fn seq(&self) -> i64 {
        match self {
            Item::Folder(folder) => folder.seq,
            Item::HttpRequest(request) => request.seq,
            Item::Unsupported => 0,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Item::Folder(folder) => &folder.name,
            Item::HttpRequest(request) => &request.name,
            Item::Unsupported => "",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Folder {
    pub name: String,
    #[serde(default)]
    pub seq: i64,
    #[serde(default)]
    pub items: Vec<Item>,
}

/// A leaf of the tree: one HTTP request with optional assertion code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestItem {
    pub name: String,
    #[serde(default)]
    pub seq: i64,
    pub request: RequestSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSpec {
    /// URL template, may contain `{{variable}}` tokens
    pub url: String,
    pub method: Method,
    #[serde(default)]
    pub headers: Vec<KeyValue>,
    /// Query parameters in declaration order
    #[serde(default)]
    pub params: Vec<KeyValue>,
    #[serde(default)]
    pub body: RequestBody,
    /// Assertion script source
    #[serde(default)]
    pub tests: Option<String>,
}

impl RequestSpec {
    /// Assertion code, if any non-blank code is present
    pub fn test_source(&self) -> Option<&str> {
        self.tests.as_deref().filter(|code| !code.trim().is_empty())
    }
}

/// Header or query parameter entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyValue {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestBody {
    #[serde(default)]
    pub mode: Option<String>,

    /// JSON body template: either JSON text or an already structured value
    #[serde(default)]
    pub json: Option<serde_json::Value>,
}

/// HTTP method of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }

    /// Methods that carry the JSON body
    pub fn sends_body(&self) -> bool {
        matches!(self, Method::Post)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            other => Err(format!("unsupported HTTP method: {}", other)),
        }
    }
}

impl TryFrom<String> for Method {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Method> for String {
    fn from(method: Method) -> Self {
        method.as_str().to_string()
    }
}

/// Named set of variables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default, alias = "id")]
    pub uid: Option<String>,
    pub name: String,
    #[serde(default)]
    pub variables: Vec<EnvVariable>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVariable {
    pub name: String,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "name": "todos",
        "items": [
            {
                "type": "folder",
                "name": "Todos",
                "seq": 1,
                "items": [
                    {
                        "type": "http-request",
                        "name": "Get todo",
                        "seq": 2,
                        "request": {
                            "url": "{{baseUrl}}/todos/1",
                            "method": "get",
                            "headers": [{ "name": "Accept", "value": "application/json" }],
                            "params": [],
                            "body": { "mode": "none" },
                            "tests": "expect(res.status).to.equal(200);"
                        }
                    }
                ]
            },
            { "type": "graphql-request", "name": "ignored", "seq": 3 }
        ],
        "environments": [
            { "uid": "env-a", "name": "dev", "variables": [{ "name": "baseUrl", "value": "http://localhost:3001" }] },
            { "uid": "env-b", "name": "prod", "variables": [] }
        ],
        "activeEnvironmentUid": "env-b"
    }"#;

    #[test]
    fn test_parse_collection() {
        let collection = Collection::from_json(SAMPLE).unwrap();
        assert_eq!(collection.items.len(), 2);
        assert!(matches!(collection.items[1], Item::Unsupported));
        assert_eq!(collection.request_count(), 1);

        let Item::Folder(folder) = &collection.items[0] else {
            panic!("expected folder");
        };
        let Item::HttpRequest(request) = &folder.items[0] else {
            panic!("expected request");
        };
        assert_eq!(request.request.method, Method::Get);
        assert!(request.request.headers[0].enabled);
        assert!(request.request.test_source().is_some());
    }

    #[test]
    fn test_active_environment_selection() {
        let mut collection = Collection::from_json(SAMPLE).unwrap();
        match collection.active_environment() {
            Some(EnvironmentSelection::Active(env)) => assert_eq!(env.name, "prod"),
            other => panic!("unexpected selection: {:?}", other),
        }

        collection.active_environment_uid = Some("missing".to_string());
        match collection.active_environment() {
            Some(EnvironmentSelection::First(env)) => assert_eq!(env.name, "dev"),
            other => panic!("unexpected selection: {:?}", other),
        }

        collection.environments.clear();
        assert!(collection.active_environment().is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Collection::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, Error::CollectionRead { .. }));
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("patch".parse::<Method>().unwrap(), Method::Patch);
        assert!("TRACE".parse::<Method>().is_err());
        assert!(Method::Post.sends_body());
        assert!(!Method::Put.sends_body());
    }
}
