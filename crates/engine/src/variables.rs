//! Variable store and `{{variable}}` interpolation
//!
//! Two layers: the environment layer, loaded once from the collection's
//! active environment, and the runtime layer written by assertion scripts
//! through `bru.setVar`. Lookups consult the runtime layer first.

use std::sync::OnceLock;

use chappie_common::EnvironmentSelection;
use indexmap::IndexMap;
use parking_lot::RwLock;
use regex::{Captures, Regex};
use serde_json::Value;
use tracing::{debug, error, info};

/// Name to value mapping of one layer, in insertion order
pub type VarMap = IndexMap<String, Value>;

/// Which layer answered a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Runtime,
    Environment,
}

impl Layer {
    fn as_str(&self) -> &'static str {
        match self {
            Layer::Runtime => "runtime",
            Layer::Environment => "environment",
        }
    }
}

/// Precedence-aware variable access shared by the store and per-traversal
/// overlays.
pub trait Variables: Send + Sync {
    /// Resolve a name, runtime layer first
    fn lookup(&self, key: &str) -> Option<(Value, Layer)>;

    /// Write to the runtime layer
    fn set_var(&self, key: &str, value: Value);

    fn get_var(&self, key: &str) -> Option<Value> {
        self.lookup(key).map(|(value, _)| value)
    }

    fn has_var(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Replace every `{{name}}` token whose name resolves. Unresolved tokens
    /// are kept literally, braces included.
    fn interpolate_string(&self, input: &str) -> String {
        let Some(pattern) = token_pattern().filter(|_| input.contains("{{")) else {
            return input.to_string();
        };
        pattern
            .replace_all(input, |caps: &Captures<'_>| {
                let name = caps[1].trim();
                match self.lookup(name) {
                    Some((value, layer)) => {
                        let text = value_to_text(&value);
                        debug!(
                            "Replaced {{{{{}}}}} with: {} ({})",
                            name,
                            display_value(name, &text),
                            layer.as_str()
                        );
                        text
                    }
                    None => {
                        debug!("Variable {{{{{}}}}} not found, keeping original", name);
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }

    /// Interpolate every string leaf of a JSON value, keeping its shape
    fn interpolate_object(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.interpolate_string(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.interpolate_object(item)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), self.interpolate_object(value)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

fn token_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| compile_pattern(r"\{\{([^}]+)\}\}"))
        .as_ref()
}

/// Compile a built-in pattern. A pattern that fails to compile is logged and
/// the text it would have rewritten is left alone.
pub(crate) fn compile_pattern(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            error!("Built-in pattern {} failed to compile: {}", pattern, e);
            None
        }
    }
}

/// Text substituted for a variable value. Strings go in verbatim, every
/// other value as its JSON text.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

const SECRET_KEYWORDS: &[&str] = &["secret", "password", "token", "key", "auth", "api"];

/// Whether a variable name looks like it holds a credential
pub fn is_secret(name: &str) -> bool {
    let name = name.to_lowercase();
    SECRET_KEYWORDS.iter().any(|keyword| name.contains(keyword))
}

/// Mask a secret for logging: short values vanish entirely, longer ones keep
/// three characters on each end.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 6), tail)
}

fn display_value(name: &str, text: &str) -> String {
    if is_secret(name) {
        mask(text)
    } else {
        text.to_string()
    }
}

/// Run-wide variable store
#[derive(Debug, Default)]
pub struct VariableStore {
    environment: RwLock<VarMap>,
    runtime: RwLock<VarMap>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate the environment layer from the selected environment.
    /// Disabled variables are skipped.
    pub fn load(&self, selection: Option<EnvironmentSelection<'_>>) {
        let Some(selection) = selection else {
            return;
        };
        let env = selection.environment();
        match selection {
            EnvironmentSelection::Active(_) => info!("Using active environment: {}", env.name),
            EnvironmentSelection::First(_) => info!(
                "No active environment found, using first environment: {}",
                env.name
            ),
        }

        let mut layer = self.environment.write();
        for variable in env.variables.iter().filter(|v| v.enabled) {
            let text = value_to_text(&variable.value);
            info!(
                "Loaded env variable: {} = {}",
                variable.name,
                display_value(&variable.name, &text)
            );
            layer.insert(variable.name.clone(), variable.value.clone());
        }
    }

    /// Empty the runtime layer. The environment layer is untouched.
    pub fn clear(&self) {
        self.runtime.write().clear();
        debug!("Cleared runtime variables (environment variables preserved)");
    }

    /// Fold a traversal's runtime layer into the store, overwriting
    /// same-named entries
    pub fn merge_runtime(&self, layer: VarMap) {
        if layer.is_empty() {
            return;
        }
        let mut runtime = self.runtime.write();
        for (key, value) in layer {
            runtime.insert(key, value);
        }
    }

    pub fn runtime_snapshot(&self) -> VarMap {
        self.runtime.read().clone()
    }

    /// Every variable with its layer, secrets masked
    pub fn describe(&self) -> Vec<(String, String)> {
        let mut all = Vec::new();
        for (key, value) in self.environment.read().iter() {
            all.push((
                format!("{} (env)", key),
                display_value(key, &value_to_text(value)),
            ));
        }
        for (key, value) in self.runtime.read().iter() {
            all.push((
                format!("{} (runtime)", key),
                display_value(key, &value_to_text(value)),
            ));
        }
        all
    }
}

impl Variables for VariableStore {
    fn lookup(&self, key: &str) -> Option<(Value, Layer)> {
        if let Some(value) = self.runtime.read().get(key) {
            return Some((value.clone(), Layer::Runtime));
        }
        self.environment
            .read()
            .get(key)
            .map(|value| (value.clone(), Layer::Environment))
    }

    fn set_var(&self, key: &str, value: Value) {
        info!(
            "Set runtime variable: {} = {}",
            key,
            display_value(key, &value_to_text(&value))
        );
        self.runtime.write().insert(key.to_string(), value);
    }
}

/// Private runtime layer of one traversal, stacked over the shared store
#[derive(Debug)]
pub struct RuntimeOverlay<'a> {
    base: &'a VariableStore,
    runtime: RwLock<VarMap>,
}

impl<'a> RuntimeOverlay<'a> {
    pub fn new(base: &'a VariableStore) -> Self {
        Self {
            base,
            runtime: RwLock::new(VarMap::new()),
        }
    }

    /// Hand back the variables this traversal set
    pub fn into_runtime(self) -> VarMap {
        self.runtime.into_inner()
    }
}

impl Variables for RuntimeOverlay<'_> {
    fn lookup(&self, key: &str) -> Option<(Value, Layer)> {
        if let Some(value) = self.runtime.read().get(key) {
            return Some((value.clone(), Layer::Runtime));
        }
        self.base.lookup(key)
    }

    fn set_var(&self, key: &str, value: Value) {
        debug!(
            "Set traversal variable: {} = {}",
            key,
            display_value(key, &value_to_text(&value))
        );
        self.runtime.write().insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chappie_common::{EnvVariable, Environment};
    use serde_json::json;

    fn environment() -> Environment {
        Environment {
            uid: Some("dev".to_string()),
            name: "dev".to_string(),
            variables: vec![
                EnvVariable {
                    name: "host".to_string(),
                    value: json!("api.example.com"),
                    enabled: true,
                },
                EnvVariable {
                    name: "port".to_string(),
                    value: json!(8080),
                    enabled: true,
                },
                EnvVariable {
                    name: "disabled".to_string(),
                    value: json!("nope"),
                    enabled: false,
                },
            ],
        }
    }

    fn loaded_store() -> VariableStore {
        let env = environment();
        let store = VariableStore::new();
        store.load(Some(EnvironmentSelection::Active(&env)));
        store
    }

    #[test]
    fn test_builtin_patterns_compile_or_fall_back() {
        assert!(token_pattern().is_some());
        assert!(compile_pattern(r"\{\{(").is_none());
    }

    #[test]
    fn test_interpolate_replaces_tokens() {
        let store = loaded_store();
        assert_eq!(
            store.interpolate_string("https://{{host}}:{{ port }}/api"),
            "https://api.example.com:8080/api"
        );
    }

    #[test]
    fn test_unresolved_tokens_pass_through() {
        let store = loaded_store();
        let text = "{{unknown}} and {{disabled}} stay";
        assert_eq!(store.interpolate_string(text), text);
        assert_eq!(store.interpolate_string("no tokens"), "no tokens");
    }

    #[test]
    fn test_runtime_overrides_environment_until_clear() {
        let store = loaded_store();
        store.set_var("host", json!("override.local"));
        assert_eq!(store.get_var("host"), Some(json!("override.local")));
        assert_eq!(store.lookup("host").map(|(_, layer)| layer), Some(Layer::Runtime));

        store.clear();
        assert_eq!(store.get_var("host"), Some(json!("api.example.com")));
        assert!(store.has_var("port"));
    }

    #[test]
    fn test_interpolate_object_keeps_shape_and_order() {
        let store = loaded_store();
        let body = json!({
            "zeta": "{{host}}",
            "alpha": [1, "{{port}}", null, {"nested": "{{missing}}"}],
            "flag": true
        });
        let result = store.interpolate_object(&body);
        assert_eq!(
            result,
            json!({
                "zeta": "api.example.com",
                "alpha": [1, "8080", null, {"nested": "{{missing}}"}],
                "flag": true
            })
        );
        let keys: Vec<&String> = result.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "flag"]);
    }

    #[test]
    fn test_overlay_is_private_until_merged() {
        let store = loaded_store();
        let overlay = RuntimeOverlay::new(&store);
        overlay.set_var("token", json!("abc"));
        assert_eq!(overlay.get_var("token"), Some(json!("abc")));
        assert_eq!(overlay.get_var("host"), Some(json!("api.example.com")));
        assert!(!store.has_var("token"));

        store.merge_runtime(overlay.into_runtime());
        assert_eq!(store.get_var("token"), Some(json!("abc")));
    }

    #[test]
    fn test_load_without_environment_is_noop() {
        let store = VariableStore::new();
        store.load(None);
        assert!(store.describe().is_empty());
    }

    #[test]
    fn test_mask_and_describe() {
        assert!(is_secret("API_TOKEN"));
        assert!(!is_secret("host"));
        assert_eq!(mask("short"), "***");
        assert_eq!(mask("supersecretvalue"), "sup**********lue");

        let store = loaded_store();
        store.set_var("password", json!("hunter2hunter2"));
        let described = store.describe();
        assert!(described.contains(&("host (env)".to_string(), "api.example.com".to_string())));
        assert!(described.contains(&("password (runtime)".to_string(), "hun********er2".to_string())));
    }
}
