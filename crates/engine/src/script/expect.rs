//! Chainable expectations behind `expect(...)`
//!
//! Failure messages follow chai's wording (`expected 404 to equal 200`) so
//! results read the same as they did for collections written against chai.

use std::rc::Rc;

use super::error::{ScriptError, ScriptResult};
use super::interp::Interpreter;
use super::schema;
use super::value::{number_to_string, ScriptRegex, Value};

const CHAIN_WORDS: &[&str] = &[
    "to", "be", "been", "is", "that", "which", "and", "has", "have", "with", "at", "of", "same",
    "but", "does", "still", "also", "own", "nested", "any", "all",
];

const METHODS: &[&str] = &[
    "equal", "equals", "eq", "eql", "eqls", "above", "gt", "greaterThan", "least", "gte",
    "greaterThanOrEqual", "below", "lt", "lessThan", "most", "lte", "lessThanOrEqual", "within",
    "a", "an", "property", "keys", "key", "members", "match", "matches", "string", "oneOf",
    "closeTo", "approximately", "satisfy", "satisfies", "jsonSchema",
];

#[derive(Clone)]
pub struct Expectation {
    actual: Value,
    message: Option<Rc<str>>,
    negate: bool,
    deep: bool,
    contains: bool,
    length: bool,
}

impl Expectation {
    pub fn new(actual: Value, message: Option<Rc<str>>) -> Self {
        Self {
            actual,
            message,
            negate: false,
            deep: false,
            contains: false,
            length: false,
        }
    }

    fn with(&self, update: impl FnOnce(&mut Expectation)) -> Value {
        let mut next = self.clone();
        update(&mut next);
        Value::Expectation(Rc::new(next))
    }

    fn this(&self) -> String {
        self.actual.inspect()
    }

    /// Pass or raise the message matching the current polarity
    fn verdict(&self, pass: bool, positive: String, negative: String) -> ScriptResult<()> {
        if pass != self.negate {
            return Ok(());
        }
        let message = if self.negate { negative } else { positive };
        Err(self.fail(message))
    }

    fn fail(&self, message: String) -> ScriptError {
        match &self.message {
            Some(prefix) => ScriptError::Assertion(format!("{}: {}", prefix, message)),
            None => ScriptError::Assertion(message),
        }
    }

    fn equals(&self, a: &Value, b: &Value) -> bool {
        if self.deep {
            a.deep_equals(b)
        } else {
            a.strict_equals(b)
        }
    }

    fn length_of(&self) -> ScriptResult<usize> {
        match &self.actual {
            Value::Str(s) => Ok(s.encode_utf16().count()),
            Value::Array(items) => Ok(items.borrow().len()),
            _ => Err(self.fail(format!("expected {} to have property 'length'", self.this()))),
        }
    }

    fn number(&self) -> ScriptResult<f64> {
        match &self.actual {
            Value::Number(n) => Ok(*n),
            _ => Err(self.fail(format!("expected {} to be a number or a date", self.this()))),
        }
    }

    /// Ordering assertions, applied to the length when `.length` was used
    fn compare(
        &self,
        verb: &str,
        opposite: &str,
        expected: &Value,
        test: impl Fn(f64, f64) -> bool,
    ) -> ScriptResult<()> {
        let limit = expected.to_number();
        if self.length {
            let len = self.length_of()?;
            return self.verdict(
                test(len as f64, limit),
                format!(
                    "expected {} to have a length {} {} but got {}",
                    self.this(),
                    verb,
                    expected.inspect(),
                    len
                ),
                format!(
                    "expected {} to not have a length {} {}",
                    self.this(),
                    verb,
                    expected.inspect()
                ),
            );
        }
        let actual = self.number()?;
        self.verdict(
            test(actual, limit),
            format!("expected {} to be {} {}", self.this(), verb, expected.inspect()),
            format!("expected {} to be {} {}", self.this(), opposite, expected.inspect()),
        )
    }

    fn includes(&self, needle: &Value) -> ScriptResult<bool> {
        match &self.actual {
            Value::Str(s) => Ok(s.contains(&needle.to_display())),
            Value::Array(items) => Ok(items.borrow().iter().any(|item| self.equals(item, needle))),
            Value::Object(map) => match needle {
                Value::Object(expected) => Ok(expected.borrow().iter().all(|(k, v)| {
                    map.borrow()
                        .get(k)
                        .is_some_and(|actual| self.equals(actual, v))
                })),
                _ => Ok(map.borrow().values().any(|v| self.equals(v, needle))),
            },
            other => Err(self.fail(format!(
                "object tested must be an array, an object, or a string, but {} given",
                other.type_name()
            ))),
        }
    }
}

fn article(type_name: &str) -> &'static str {
    match type_name.chars().next() {
        Some('a' | 'e' | 'i' | 'o' | 'u') => "an ",
        _ => "a ",
    }
}

fn joined_keys(keys: &[String]) -> String {
    keys.iter()
        .map(|k| format!("'{}'", k))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Interpreter<'_> {
    /// Property access on an expectation: chain words, flags and property
    /// assertions
    pub(super) fn expectation_property(
        &mut self,
        expectation: &Rc<Expectation>,
        key: &str,
    ) -> ScriptResult<Value> {
        let e = expectation.as_ref();
        let same = || Ok(Value::Expectation(Rc::clone(expectation)));
        let this = e.this();
        match key {
            k if CHAIN_WORDS.contains(&k) => same(),
            "not" => Ok(e.with(|n| n.negate = !n.negate)),
            "deep" => Ok(e.with(|n| n.deep = true)),
            "include" | "includes" | "contain" | "contains" => Ok(e.with(|n| n.contains = true)),
            "length" | "lengthOf" => Ok(e.with(|n| n.length = true)),
            "ok" => {
                e.verdict(
                    e.actual.truthy(),
                    format!("expected {} to be truthy", this),
                    format!("expected {} to be falsy", this),
                )?;
                same()
            }
            "true" | "false" => {
                let wanted = key == "true";
                let opposite = if wanted { "false" } else { "true" };
                e.verdict(
                    matches!(e.actual, Value::Bool(b) if b == wanted),
                    format!("expected {} to be {}", this, key),
                    format!("expected {} to be {}", this, opposite),
                )?;
                same()
            }
            "null" => {
                e.verdict(
                    matches!(e.actual, Value::Null),
                    format!("expected {} to be null", this),
                    format!("expected {} not to be null", this),
                )?;
                same()
            }
            "undefined" => {
                e.verdict(
                    matches!(e.actual, Value::Undefined),
                    format!("expected {} to be undefined", this),
                    format!("expected {} not to be undefined", this),
                )?;
                same()
            }
            "exist" => {
                e.verdict(
                    !matches!(e.actual, Value::Null | Value::Undefined),
                    format!("expected {} to exist", this),
                    format!("expected {} to not exist", this),
                )?;
                same()
            }
            "NaN" => {
                e.verdict(
                    matches!(e.actual, Value::Number(n) if n.is_nan()),
                    format!("expected {} to be NaN", this),
                    format!("expected {} not to be NaN", this),
                )?;
                same()
            }
            "empty" => {
                let empty = match &e.actual {
                    Value::Str(s) => s.is_empty(),
                    Value::Array(items) => items.borrow().is_empty(),
                    Value::Object(map) => map.borrow().is_empty(),
                    other => {
                        return Err(ScriptError::type_error(format!(
                            ".empty was passed non-string primitive {}",
                            other.inspect()
                        )))
                    }
                };
                e.verdict(
                    empty,
                    format!("expected {} to be empty", this),
                    format!("expected {} not to be empty", this),
                )?;
                same()
            }
            k if METHODS.contains(&k) => same(),
            other => Err(ScriptError::Thrown(format!("Invalid Chai property: {}", other))),
        }
    }

    /// Method assertions on an expectation
    pub(super) fn expectation_call(
        &mut self,
        expectation: &Rc<Expectation>,
        method: &str,
        args: Vec<Value>,
    ) -> ScriptResult<Value> {
        let e = expectation.as_ref();
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);
        let this = e.this();
        let expected = arg(0);
        let exp = expected.inspect();

        match method {
            "equal" | "equals" | "eq" => {
                let (positive, negative) = if e.deep {
                    ("to deeply equal", "to not deeply equal")
                } else {
                    ("to equal", "to not equal")
                };
                e.verdict(
                    e.equals(&e.actual, &expected),
                    format!("expected {} {} {}", this, positive, exp),
                    format!("expected {} {} {}", this, negative, exp),
                )?;
            }
            "eql" | "eqls" => {
                e.verdict(
                    e.actual.deep_equals(&expected),
                    format!("expected {} to deeply equal {}", this, exp),
                    format!("expected {} to not deeply equal {}", this, exp),
                )?;
            }
            "above" | "gt" | "greaterThan" => e.compare("above", "at most", &expected, |a, b| a > b)?,
            "least" | "gte" | "greaterThanOrEqual" => {
                e.compare("at least", "below", &expected, |a, b| a >= b)?
            }
            "below" | "lt" | "lessThan" => e.compare("below", "at least", &expected, |a, b| a < b)?,
            "most" | "lte" | "lessThanOrEqual" => {
                e.compare("at most", "above", &expected, |a, b| a <= b)?
            }
            "within" => {
                let (start, finish) = (expected.to_number(), arg(1).to_number());
                let range = format!("{}..{}", number_to_string(start), number_to_string(finish));
                let (value, subject) = if e.length {
                    (e.length_of()? as f64, "to have a length within")
                } else {
                    (e.number()?, "to be within")
                };
                let negative_subject = if e.length {
                    "to not have a length within"
                } else {
                    "to not be within"
                };
                e.verdict(
                    value >= start && value <= finish,
                    format!("expected {} {} {}", this, subject, range),
                    format!("expected {} {} {}", this, negative_subject, range),
                )?;
            }
            "a" | "an" => {
                let wanted = expected.to_display().to_lowercase();
                let article = article(&wanted);
                e.verdict(
                    e.actual.type_name() == wanted,
                    format!("expected {} to be {}{}", this, article, wanted),
                    format!("expected {} not to be {}{}", this, article, wanted),
                )?;
            }
            "include" | "includes" | "contain" | "contains" => {
                let deep = if e.deep { "deep " } else { "" };
                e.verdict(
                    e.includes(&expected)?,
                    format!("expected {} to {}include {}", this, deep, exp),
                    format!("expected {} to not {}include {}", this, deep, exp),
                )?;
            }
            "string" => {
                e.verdict(
                    e.actual.to_display().contains(&expected.to_display()),
                    format!("expected {} to contain {}", this, exp),
                    format!("expected {} to not contain {}", this, exp),
                )?;
            }
            "property" => {
                if matches!(e.actual, Value::Null | Value::Undefined) {
                    return Err(e.fail("Target cannot be null or undefined.".to_string()));
                }
                let name = expected.to_display();
                let has = match &e.actual {
                    Value::Object(map) => map.borrow().contains_key(&name),
                    other => !matches!(other.get_property(&name), Value::Undefined),
                };
                let value = e.actual.get_property(&name);
                let deep = if e.deep { "deep " } else { "" };
                if args.len() > 1 {
                    let wanted = arg(1);
                    e.verdict(
                        has && e.equals(&value, &wanted),
                        format!(
                            "expected {} to have {}property '{}' of {}, but got {}",
                            this,
                            deep,
                            name,
                            wanted.inspect(),
                            value.inspect()
                        ),
                        format!(
                            "expected {} to not have {}property '{}' of {}",
                            this,
                            deep,
                            name,
                            wanted.inspect()
                        ),
                    )?;
                } else {
                    e.verdict(
                        has,
                        format!("expected {} to have {}property '{}'", this, deep, name),
                        format!("expected {} to not have {}property '{}'", this, deep, name),
                    )?;
                }
                if !e.negate {
                    return Ok(Value::Expectation(Rc::new(Expectation::new(
                        value,
                        e.message.clone(),
                    ))));
                }
            }
            "length" | "lengthOf" => {
                let len = e.length_of()?;
                let wanted = expected.to_number();
                e.verdict(
                    len as f64 == wanted,
                    format!("expected {} to have a length of {} but got {}", this, exp, len),
                    format!("expected {} to not have a length of {}", this, len),
                )?;
            }
            "keys" | "key" => {
                let wanted: Vec<String> = match (&expected, args.len()) {
                    (Value::Array(items), 1) => items.borrow().iter().map(Value::to_display).collect(),
                    (Value::Object(map), 1) => map.borrow().keys().cloned().collect(),
                    _ => args.iter().map(Value::to_display).collect(),
                };
                if wanted.is_empty() {
                    return Err(e.fail("keys required".to_string()));
                }
                let actual = e.actual.keys();
                let present = wanted.iter().all(|k| actual.contains(k));
                let pass = if e.contains {
                    present
                } else {
                    present && actual.len() == wanted.len()
                };
                let verb = if e.contains { "contain" } else { "have" };
                let noun = if wanted.len() == 1 { "key" } else { "keys" };
                let list = joined_keys(&wanted);
                e.verdict(
                    pass,
                    format!("expected {} to {} {} {}", this, verb, noun, list),
                    format!("expected {} to not {} {} {}", this, verb, noun, list),
                )?;
            }
            "members" => {
                let (Value::Array(actual), Value::Array(wanted)) = (&e.actual, &expected) else {
                    return Err(e.fail(format!("expected {} to be an array", this)));
                };
                let (actual, wanted) = (actual.borrow().clone(), wanted.borrow().clone());
                let contained = |from: &[Value], into: &[Value]| {
                    from.iter().all(|x| into.iter().any(|y| e.equals(x, y)))
                };
                let pass = if e.contains {
                    contained(&wanted, &actual)
                } else {
                    actual.len() == wanted.len()
                        && contained(&wanted, &actual)
                        && contained(&actual, &wanted)
                };
                let relation = if e.contains {
                    "be a superset of"
                } else {
                    "have the same members as"
                };
                e.verdict(
                    pass,
                    format!("expected {} to {} {}", this, relation, exp),
                    format!("expected {} to not {} {}", this, relation, exp),
                )?;
            }
            "match" | "matches" => {
                let regex = match &expected {
                    Value::Regex(re) => Rc::clone(re),
                    other => Rc::new(
                        ScriptRegex::compile(&other.to_display(), "").map_err(ScriptError::Type)?,
                    ),
                };
                let shown = format!("/{}/{}", regex.source, regex.flags);
                e.verdict(
                    regex.regex.is_match(&e.actual.to_display()),
                    format!("expected {} to match {}", this, shown),
                    format!("expected {} not to match {}", this, shown),
                )?;
            }
            "oneOf" => {
                let Value::Array(list) = &expected else {
                    return Err(e.fail(format!("expected {} to be an array", exp)));
                };
                let found = list.borrow().iter().any(|v| e.equals(&e.actual, v));
                e.verdict(
                    found,
                    format!("expected {} to be one of {}", this, exp),
                    format!("expected {} to not be one of {}", this, exp),
                )?;
            }
            "closeTo" | "approximately" => {
                let delta = arg(1).to_number();
                let actual = e.number()?;
                let target = expected.to_number();
                let shown = format!("{} +/- {}", number_to_string(target), number_to_string(delta));
                e.verdict(
                    (actual - target).abs() <= delta,
                    format!("expected {} to be close to {}", this, shown),
                    format!("expected {} not to be close to {}", this, shown),
                )?;
            }
            "satisfy" | "satisfies" => {
                let result = self.call_value(&expected, vec![e.actual.clone()], "matcher")?;
                e.verdict(
                    result.truthy(),
                    format!("expected {} to satisfy {}", this, exp),
                    format!("expected {} to not satisfy {}", this, exp),
                )?;
            }
            "jsonSchema" => {
                let outcome = schema::validate(&e.actual.to_json()?, &expected.to_json()?);
                let detail = match &outcome {
                    Ok(()) => String::new(),
                    Err(err) => format!("\n{}", err),
                };
                e.verdict(
                    outcome.is_ok(),
                    format!("expected value to match json-schema{}", detail),
                    "expected value not to match json-schema".to_string(),
                )?;
            }
            other => {
                return Err(ScriptError::type_error(format!(
                    "expect(...).{} is not a function",
                    other
                )))
            }
        }
        Ok(Value::Expectation(Rc::clone(expectation)))
    }
}
