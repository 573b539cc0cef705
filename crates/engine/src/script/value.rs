//! Runtime values of the script interpreter

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Number, Value as Json};

use super::ast::FunctionDef;
use super::error::{ScriptError, ScriptResult};
use super::expect::Expectation;

pub type ObjectRef = Rc<RefCell<IndexMap<String, Value>>>;
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// Deepest container nesting followed by conversions and comparisons
pub const MAX_VALUE_DEPTH: usize = 64;

/// Longest string a script may build, in bytes
pub const MAX_STRING_LEN: usize = 4 << 20;

/// Longest array a script may build
pub const MAX_ARRAY_LEN: usize = 1 << 20;

/// Bytes of strings and container slots one script may allocate over its run
pub const MAX_HEAP_BYTES: usize = 256 << 20;

/// Largest JSON document a single conversion may produce, in bytes
const MAX_JSON_BYTES: usize = 64 << 20;

/// Rendered length after which `inspect` stops expanding containers
const INSPECT_BUDGET: usize = 256;

const CELL: usize = std::mem::size_of::<Value>();

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(Rc<Closure>),
    Native(Native),
    Regex(Rc<ScriptRegex>),
    Expectation(Rc<Expectation>),
}

/// Host functions reachable from scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Native {
    Test,
    Expect,
    Tv4Validate,
    Tv4ValidateResult,
    BruSetVar,
    BruGetVar,
    BruHasVar,
}

impl Native {
    pub fn name(&self) -> &'static str {
        match self {
            Native::Test => "test",
            Native::Expect => "expect",
            Native::Tv4Validate => "validate",
            Native::Tv4ValidateResult => "validateResult",
            Native::BruSetVar => "setVar",
            Native::BruGetVar => "getVar",
            Native::BruHasVar => "hasVar",
        }
    }
}

pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub scope: Rc<Scope>,
}

pub struct ScriptRegex {
    pub source: Rc<str>,
    pub flags: String,
    pub regex: regex::Regex,
}

impl ScriptRegex {
    /// Compile a literal; `i`, `m` and `s` map onto inline flags, `g` and `u`
    /// are accepted and ignored.
    pub fn compile(source: &str, flags: &str) -> Result<Self, String> {
        let mut inline = String::new();
        for flag in flags.chars() {
            match flag {
                'i' | 'm' | 's' => inline.push(flag),
                'g' | 'u' | 'y' => {}
                other => return Err(format!("invalid regular expression flag '{}'", other)),
            }
        }
        let pattern = if inline.is_empty() {
            source.to_string()
        } else {
            format!("(?{}){}", inline, source)
        };
        let regex = regex::Regex::new(&pattern)
            .map_err(|e| format!("invalid regular expression /{}/: {}", source, e))?;
        Ok(Self {
            source: Rc::from(source),
            flags: flags.to_string(),
            regex,
        })
    }
}

/// Lexical scope
#[derive(Default)]
pub struct Scope {
    vars: RefCell<HashMap<String, Binding>>,
    parent: Option<Rc<Scope>>,
}

struct Binding {
    value: Value,
    mutable: bool,
}

impl Scope {
    pub fn root() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn child(parent: &Rc<Scope>) -> Rc<Self> {
        Rc::new(Self {
            vars: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    pub fn declare(&self, name: &str, value: Value, mutable: bool) {
        self.vars
            .borrow_mut()
            .insert(name.to_string(), Binding { value, mutable });
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.vars.borrow().get(name) {
            return Some(binding.value.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.lookup(name))
    }

    /// Reassign an existing binding. `Err(true)` means the binding is const,
    /// `Err(false)` that it does not exist.
    pub fn assign(&self, name: &str, value: Value) -> Result<(), bool> {
        if let Some(binding) = self.vars.borrow_mut().get_mut(name) {
            if !binding.mutable {
                return Err(true);
            }
            binding.value = value;
            return Ok(());
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => Err(false),
        }
    }

    fn release(&self) -> Vec<Value> {
        self.vars
            .borrow_mut()
            .drain()
            .map(|(_, binding)| binding.value)
            .collect()
    }
}

/// Owner of everything one script allocates.
///
/// Every container stays registered until the script ends, so nothing is
/// freed mid-run. Teardown empties the registered containers and captured
/// scopes before letting go of them: reference cycles built by the script
/// are released and no drop recurses through a deep chain.
#[derive(Default)]
pub struct Heap {
    arrays: RefCell<Vec<ArrayRef>>,
    objects: RefCell<Vec<ObjectRef>>,
    scopes: RefCell<Vec<Rc<Scope>>>,
    used: Cell<usize>,
}

impl Heap {
    /// Account for `bytes` of script-owned memory
    pub fn charge(&self, bytes: usize) -> ScriptResult<()> {
        let used = self.used.get().saturating_add(bytes);
        if used > MAX_HEAP_BYTES {
            return Err(ScriptError::Limit(
                "script exceeded its memory budget".to_string(),
            ));
        }
        self.used.set(used);
        Ok(())
    }

    /// Account for `cells` more array or object slots
    pub fn reserve(&self, cells: usize) -> ScriptResult<()> {
        self.charge(cells.saturating_mul(CELL))
    }

    pub fn string(&self, text: String) -> ScriptResult<Value> {
        if text.len() > MAX_STRING_LEN {
            return Err(string_too_long());
        }
        self.charge(text.len())?;
        Ok(Value::Str(Rc::from(text)))
    }

    pub fn array(&self, items: Vec<Value>) -> ScriptResult<Value> {
        if items.len() > MAX_ARRAY_LEN {
            return Err(array_too_long());
        }
        self.reserve(items.len())?;
        Ok(self.track_array(items))
    }

    pub fn object(&self, props: IndexMap<String, Value>) -> ScriptResult<Value> {
        let keys: usize = props.keys().map(String::len).sum();
        self.reserve(props.len())?;
        self.charge(keys)?;
        Ok(Value::Object(self.host_object(props)))
    }

    /// Register an object built by the host; not counted against the budget
    pub fn host_object(&self, props: IndexMap<String, Value>) -> ObjectRef {
        let object = Rc::new(RefCell::new(props));
        self.objects.borrow_mut().push(Rc::clone(&object));
        object
    }

    /// Convert host data. Callers charge for it when a script asked for it.
    pub fn from_json(&self, json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::str(s),
            Json::Array(items) => self.track_array(items.iter().map(|v| self.from_json(v)).collect()),
            Json::Object(map) => Value::Object(
                self.host_object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), self.from_json(v)))
                        .collect(),
                ),
            ),
        }
    }

    /// Remember a scope a closure closed over
    pub fn capture(&self, scope: &Rc<Scope>) {
        let mut scopes = self.scopes.borrow_mut();
        if !scopes.last().is_some_and(|last| Rc::ptr_eq(last, scope)) {
            scopes.push(Rc::clone(scope));
        }
    }

    fn track_array(&self, items: Vec<Value>) -> Value {
        let array = Rc::new(RefCell::new(items));
        self.arrays.borrow_mut().push(Rc::clone(&array));
        Value::Array(array)
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let mut released: Vec<Value> = Vec::new();
        for array in self.arrays.get_mut().drain(..) {
            released.append(&mut array.borrow_mut());
        }
        for object in self.objects.get_mut().drain(..) {
            released.extend(std::mem::take(&mut *object.borrow_mut()).into_values());
        }
        for scope in self.scopes.get_mut().drain(..) {
            let mut current = Some(scope);
            while let Some(scope) = current {
                released.extend(scope.release());
                current = scope.parent.clone();
            }
        }
        // Every container is empty now, so dropping `released` stays shallow
    }
}

/// Approximate memory a JSON document takes once held by a script or a
/// variable store
pub fn json_footprint(json: &Json) -> usize {
    match json {
        Json::String(s) => CELL + s.len(),
        Json::Array(items) => CELL + items.iter().map(json_footprint).sum::<usize>(),
        Json::Object(map) => {
            CELL + map
                .iter()
                .map(|(k, v)| k.len() + json_footprint(v))
                .sum::<usize>()
        }
        _ => CELL,
    }
}

pub fn string_too_long() -> ScriptError {
    ScriptError::Limit("Invalid string length".to_string())
}

pub fn array_too_long() -> ScriptError {
    ScriptError::Limit("Invalid array length".to_string())
}

/// Containers currently being walked, innermost last
struct Path(Vec<*const ()>);

impl Path {
    fn new() -> Self {
        Path(Vec::new())
    }

    fn contains(&self, id: *const ()) -> bool {
        self.0.contains(&id)
    }

    fn too_deep(&self) -> bool {
        self.0.len() >= MAX_VALUE_DEPTH
    }
}

fn array_id(items: &ArrayRef) -> *const () {
    Rc::as_ptr(items).cast()
}

fn object_id(map: &ObjectRef) -> *const () {
    Rc::as_ptr(map).cast()
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    /// JSON projection. Functions and `undefined` become `null`, and are
    /// dropped from objects. Circular structures are a `TypeError`.
    pub fn to_json(&self) -> ScriptResult<Json> {
        let mut budget = MAX_JSON_BYTES;
        self.write_json(&mut Path::new(), &mut budget)
    }

    fn write_json(&self, path: &mut Path, budget: &mut usize) -> ScriptResult<Json> {
        let cost = CELL + if let Value::Str(s) = self { s.len() } else { 0 };
        *budget = budget
            .checked_sub(cost)
            .ok_or_else(|| ScriptError::Limit("value is too large to convert to JSON".to_string()))?;

        let id = match self {
            Value::Array(items) => array_id(items),
            Value::Object(map) => object_id(map),
            Value::Null | Value::Undefined => return Ok(Json::Null),
            Value::Bool(b) => return Ok(Json::Bool(*b)),
            Value::Number(n) => return Ok(number_to_json(*n)),
            Value::Str(s) => return Ok(Json::String(s.to_string())),
            Value::Regex(_) => return Ok(Json::Object(Default::default())),
            Value::Function(_) | Value::Native(_) | Value::Expectation(_) => return Ok(Json::Null),
        };
        if path.contains(id) {
            return Err(ScriptError::type_error("Converting circular structure to JSON"));
        }
        if path.too_deep() {
            return Err(ScriptError::Limit("value is nested too deeply".to_string()));
        }

        path.0.push(id);
        let json = match self {
            Value::Array(items) => items
                .borrow()
                .iter()
                .map(|v| v.write_json(path, budget))
                .collect::<ScriptResult<Vec<_>>>()
                .map(Json::Array),
            Value::Object(map) => map
                .borrow()
                .iter()
                .filter(|(_, v)| !matches!(v, Value::Undefined | Value::Function(_) | Value::Native(_)))
                .map(|(k, v)| Ok((k.clone(), v.write_json(path, budget)?)))
                .collect::<ScriptResult<serde_json::Map<_, _>>>()
                .map(Json::Object),
            _ => Ok(Json::Null),
        };
        path.0.pop();
        json
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Function(_) | Value::Native(_) => "function",
            _ => "object",
        }
    }

    /// Finer type name used by `expect(...).to.be.a(...)`
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Array(_) => "array",
            Value::Regex(_) => "regexp",
            other => other.type_of(),
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Native(_))
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
                    u64::from_str_radix(hex, 16).map(|n| n as f64).unwrap_or(f64::NAN)
                } else {
                    match trimmed {
                        "Infinity" | "+Infinity" => f64::INFINITY,
                        "-Infinity" => f64::NEG_INFINITY,
                        _ if trimmed.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
                        _ => trimmed.parse().unwrap_or(f64::NAN),
                    }
                }
            }
            // Arrays convert through their string form
            Value::Array(_) => Value::str(self.to_display()).to_number(),
            _ => f64::NAN,
        }
    }

    /// String conversion as done by `+` and template literals.
    ///
    /// An array nested in itself renders as the empty string. Rendering stops
    /// growing once it passes [`MAX_STRING_LEN`], so builders that keep the
    /// result must still check its length.
    pub fn to_display(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Array(_) => {
                let mut out = String::new();
                self.write_display(&mut out, &mut Path::new());
                out
            }
            other => other.display_scalar(),
        }
    }

    fn write_display(&self, out: &mut String, path: &mut Path) {
        match self {
            Value::Array(items) => {
                let id = array_id(items);
                if path.contains(id) || path.too_deep() {
                    return;
                }
                path.0.push(id);
                for (i, item) in items.borrow().iter().enumerate() {
                    if out.len() > MAX_STRING_LEN {
                        break;
                    }
                    if i > 0 {
                        out.push(',');
                    }
                    if !matches!(item, Value::Undefined | Value::Null) {
                        item.write_display(out, path);
                    }
                }
                path.0.pop();
            }
            Value::Str(s) => out.push_str(s),
            other => out.push_str(&other.display_scalar()),
        }
    }

    fn display_scalar(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::Str(s) => s.to_string(),
            Value::Array(_) => self.to_display(),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(closure) => match &closure.def.name {
                Some(name) => format!("function {}() {{ ... }}", name),
                None => "function () { ... }".to_string(),
            },
            Value::Native(native) => format!("function {}() {{ [native code] }}", native.name()),
            Value::Regex(re) => format!("/{}/{}", re.source, re.flags),
            Value::Expectation(_) => "[object Assertion]".to_string(),
        }
    }

    /// Strict equality (`===`)
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => Rc::ptr_eq(a, b),
            (Value::Expectation(a), Value::Expectation(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Abstract equality (`==`)
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (Value::Number(_), Value::Str(_)) | (Value::Str(_), Value::Number(_)) => {
                self.to_number() == other.to_number()
            }
            (Value::Bool(_), _) | (_, Value::Bool(_)) => {
                Value::Number(self.to_number()).loose_equals(&Value::Number(other.to_number()))
            }
            (Value::Array(_) | Value::Object(_), Value::Str(_) | Value::Number(_)) => {
                Value::str(self.to_display()).loose_equals(other)
            }
            (Value::Str(_) | Value::Number(_), Value::Array(_) | Value::Object(_)) => {
                self.loose_equals(&Value::str(other.to_display()))
            }
            _ => self.strict_equals(other),
        }
    }

    /// Structural equality used by `eql` and `deep` assertions.
    ///
    /// A pair of containers already under comparison counts as equal, which
    /// settles cycles. Structures nested beyond [`MAX_VALUE_DEPTH`] only equal
    /// themselves.
    pub fn deep_equals(&self, other: &Value) -> bool {
        self.deep_equals_at(other, &mut HashSet::new(), 0)
    }

    fn deep_equals_at(
        &self,
        other: &Value,
        visited: &mut HashSet<(*const (), *const ())>,
        depth: usize,
    ) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Array(a), Value::Array(b)) => {
                if Rc::ptr_eq(a, b) || !visited.insert((array_id(a), array_id(b))) {
                    return true;
                }
                if depth >= MAX_VALUE_DEPTH {
                    return false;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.deep_equals_at(y, visited, depth + 1))
            }
            (Value::Object(a), Value::Object(b)) => {
                if Rc::ptr_eq(a, b) || !visited.insert((object_id(a), object_id(b))) {
                    return true;
                }
                if depth >= MAX_VALUE_DEPTH {
                    return false;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.get(k)
                            .is_some_and(|other| v.deep_equals_at(other, visited, depth + 1))
                    })
            }
            (Value::Regex(a), Value::Regex(b)) => a.source == b.source && a.flags == b.flags,
            _ => self.strict_equals(other),
        }
    }

    /// Rendering used in assertion messages: strings quoted, containers
    /// expanded, long renderings abbreviated
    pub fn inspect(&self) -> String {
        let mut full = String::new();
        self.write_inspect(&mut full, 0);
        if full.chars().count() < 40 {
            return full;
        }
        match self {
            Value::Array(items) => format!("[ Array({}) ]", items.borrow().len()),
            Value::Object(map) => {
                let map = map.borrow();
                let keys: Vec<&str> = map.keys().take(3).map(String::as_str).collect();
                let shown = if keys.len() > 2 {
                    format!("{}, ...", keys[..2].join(", "))
                } else {
                    keys.join(", ")
                };
                format!("{{ Object ({}) }}", shown)
            }
            Value::Function(_) | Value::Native(_) => "[Function]".to_string(),
            _ => full,
        }
    }

    fn write_inspect(&self, out: &mut String, depth: usize) {
        match self {
            Value::Str(s) => {
                out.push('\'');
                out.push_str(&s.replace('\'', "\\'"));
                out.push('\'');
            }
            Value::Array(items) => {
                let items = items.borrow();
                if items.is_empty() {
                    out.push_str("[]");
                } else if depth > 2 {
                    out.push_str("[Array]");
                } else {
                    out.push_str("[ ");
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            if out.len() > INSPECT_BUDGET {
                                out.push_str(", ...");
                                break;
                            }
                            out.push_str(", ");
                        }
                        item.write_inspect(out, depth + 1);
                    }
                    out.push_str(" ]");
                }
            }
            Value::Object(map) => {
                let map = map.borrow();
                if map.is_empty() {
                    out.push_str("{}");
                } else if depth > 2 {
                    out.push_str("[Object]");
                } else {
                    out.push_str("{ ");
                    for (i, (key, value)) in map.iter().enumerate() {
                        if i > 0 {
                            if out.len() > INSPECT_BUDGET {
                                out.push_str(", ...");
                                break;
                            }
                            out.push_str(", ");
                        }
                        out.push_str(&inspect_key(key));
                        out.push_str(": ");
                        value.write_inspect(out, depth + 1);
                    }
                    out.push_str(" }");
                }
            }
            Value::Function(closure) => match &closure.def.name {
                Some(name) => out.push_str(&format!("[Function: {}]", name)),
                None => out.push_str("[Function]"),
            },
            Value::Native(native) => out.push_str(&format!("[Function: {}]", native.name())),
            Value::Number(n) if *n == 0.0 && n.is_sign_negative() => out.push_str("-0"),
            other => out.push_str(&other.display_scalar()),
        }
    }

    /// Property read shared by member and index access
    pub fn get_property(&self, key: &str) -> Value {
        match self {
            Value::Object(map) => map.borrow().get(key).cloned().unwrap_or(Value::Undefined),
            Value::Array(items) => {
                let items = items.borrow();
                if key == "length" {
                    return Value::Number(items.len() as f64);
                }
                key.parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or(Value::Undefined)
            }
            Value::Str(s) => {
                if key == "length" {
                    return Value::Number(s.encode_utf16().count() as f64);
                }
                key.parse::<usize>()
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::str(c.to_string()))
                    .unwrap_or(Value::Undefined)
            }
            Value::Regex(re) => match key {
                "source" => Value::Str(Rc::clone(&re.source)),
                "flags" => Value::str(&re.flags),
                _ => Value::Undefined,
            },
            _ => Value::Undefined,
        }
    }

    /// Own enumerable keys, in insertion order
    pub fn keys(&self) -> Vec<String> {
        match self {
            Value::Object(map) => map.borrow().keys().cloned().collect(),
            Value::Array(items) => (0..items.borrow().len()).map(|i| i.to_string()).collect(),
            Value::Str(s) => (0..s.chars().count()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_inspect(&mut out, 0);
        f.write_str(&out)
    }
}

fn inspect_key(key: &str) -> String {
    let identifier = key
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && key.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$');
    if identifier {
        key.to_string()
    } else {
        format!("'{}'", key)
    }
}

/// Number to string the way scripts expect it: integral values without a
/// fractional part
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn number_to_json(n: f64) -> Json {
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        Json::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Json::Number).unwrap_or(Json::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn self_referencing(heap: &Heap) -> (Value, ArrayRef) {
        let value = heap.array(vec![Value::Number(1.0)]).unwrap();
        let Value::Array(items) = &value else {
            unreachable!()
        };
        items.borrow_mut().push(value.clone());
        let items = Rc::clone(items);
        (value, items)
    }

    #[test]
    fn test_json_conversion_keeps_order() {
        let heap = Heap::default();
        let value = heap.from_json(&json!({"b": 1, "a": [true, null, "x"], "c": 1.5}));
        assert_eq!(value.to_json().unwrap(), json!({"b": 1, "a": [true, null, "x"], "c": 1.5}));
        assert_eq!(value.keys(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_inspect() {
        let heap = Heap::default();
        assert_eq!(Value::str("ok").inspect(), "'ok'");
        assert_eq!(heap.from_json(&json!([1, 2])).inspect(), "[ 1, 2 ]");
        assert_eq!(heap.from_json(&json!({"a": 1, "x-y": "z"})).inspect(), "{ a: 1, 'x-y': 'z' }");
        assert_eq!(heap.from_json(&json!({})).inspect(), "{}");
        assert_eq!(
            heap.from_json(&json!({"userId": 1, "id": 1, "title": "delectus aut autem"})).inspect(),
            "{ Object (userId, id, ...) }"
        );
    }

    #[test]
    fn test_equality_flavours() {
        let heap = Heap::default();
        let one = Value::Number(1.0);
        assert!(one.loose_equals(&Value::str("1")));
        assert!(!one.strict_equals(&Value::str("1")));
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.strict_equals(&Value::Undefined));

        let a = heap.from_json(&json!({"x": [1, 2]}));
        let b = heap.from_json(&json!({"x": [1, 2]}));
        assert!(!a.strict_equals(&b));
        assert!(a.deep_equals(&b));
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(number_to_string(200.0), "200");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(f64::NAN), "NaN");
    }

    #[test]
    fn test_scope_const_and_shadowing() {
        let root = Scope::root();
        root.declare("a", Value::Number(1.0), false);
        let child = Scope::child(&root);
        child.declare("b", Value::Number(2.0), true);
        assert!(child.lookup("a").is_some());
        assert_eq!(child.assign("a", Value::Null), Err(true));
        assert_eq!(child.assign("missing", Value::Null), Err(false));
        assert!(child.assign("b", Value::Null).is_ok());
    }

    #[test]
    fn test_self_referencing_array_conversions() {
        let heap = Heap::default();
        let (cyclic, _) = self_referencing(&heap);

        assert_eq!(cyclic.to_display(), "1,");
        assert!(cyclic.to_number().is_nan());
        assert!(cyclic.loose_equals(&Value::str("1,")));
        assert_eq!(
            cyclic.to_json(),
            Err(ScriptError::type_error("Converting circular structure to JSON"))
        );
        assert_eq!(cyclic.inspect(), "[ 1, [ 1, [ 1, [Array] ] ] ]");
    }

    #[test]
    fn test_cyclic_structures_compare_deeply() {
        let heap = Heap::default();
        let (a, _) = self_referencing(&heap);
        let (b, _) = self_referencing(&heap);
        assert!(a.deep_equals(&b));

        let (c, c_items) = self_referencing(&heap);
        c_items.borrow_mut().push(Value::Number(2.0));
        assert!(!a.deep_equals(&c));
    }

    #[test]
    fn test_deep_nesting_is_bounded() {
        let heap = Heap::default();
        let mut nested = heap.array(Vec::new()).unwrap();
        for _ in 0..10_000 {
            nested = heap.array(vec![nested]).unwrap();
        }
        assert_eq!(nested.to_display(), "");
        assert!(matches!(nested.to_json(), Err(ScriptError::Limit(_))));
        assert_eq!(nested.inspect(), "[ [ [ [Array] ] ] ]");
        drop(nested);
        drop(heap);
    }

    #[test]
    fn test_json_conversion_of_shared_subtrees_is_budgeted() {
        let heap = Heap::default();
        let leaf = heap.string("x".repeat(1024)).unwrap();
        let mut wide = heap.array(vec![leaf; 1024]).unwrap();
        for _ in 0..3 {
            wide = heap.array(vec![wide; 1024]).unwrap();
        }
        assert!(matches!(wide.to_json(), Err(ScriptError::Limit(_))));
    }

    #[test]
    fn test_heap_limits() {
        let heap = Heap::default();
        assert_eq!(
            heap.string("x".repeat(MAX_STRING_LEN + 1)).map(|_| ()),
            Err(string_too_long())
        );
        assert!(heap.string("x".repeat(MAX_STRING_LEN)).is_ok());
        assert_eq!(
            heap.array(vec![Value::Null; MAX_ARRAY_LEN + 1]).map(|_| ()),
            Err(array_too_long())
        );

        let mut spent = Ok(());
        for _ in 0..(MAX_HEAP_BYTES / MAX_STRING_LEN) + 1 {
            spent = heap.string("y".repeat(MAX_STRING_LEN)).map(|_| ());
            if spent.is_err() {
                break;
            }
        }
        assert!(matches!(spent, Err(ScriptError::Limit(_))));
    }

    #[test]
    fn test_teardown_releases_cycles() {
        let heap = Heap::default();
        let (cyclic, items) = self_referencing(&heap);
        let weak = Rc::downgrade(&items);
        drop(items);

        let scope = Scope::root();
        scope.declare("a", cyclic, true);
        heap.capture(&scope);
        let weak_scope = Rc::downgrade(&scope);
        drop(scope);

        drop(heap);
        assert!(weak.upgrade().is_none());
        assert!(weak_scope.upgrade().is_none());
    }
}
