//! JSON schema (draft-4) validation backing `tv4` and `jsonSchema`
//!
//! Validation stops at the first violation, which is reported with tv4's
//! wording together with the data and schema paths that led to it.

use serde_json::{Map, Value as Json};
use thiserror::Error;

/// Deepest `$ref` / subschema nesting followed before giving up
const MAX_DEPTH: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct SchemaError {
    pub message: String,
    pub data_path: String,
    pub schema_path: String,
}

pub type SchemaResult = Result<(), SchemaError>;

/// Validate `data` against `schema`
pub fn validate(data: &Json, schema: &Json) -> SchemaResult {
    Validator { root: schema }.check(data, schema, "", "", 0)
}

struct Validator<'a> {
    root: &'a Json,
}

fn error(message: impl Into<String>, data_path: &str, schema_path: String) -> SchemaError {
    SchemaError {
        message: message.into(),
        data_path: data_path.to_string(),
        schema_path,
    }
}

fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn data_type(data: &Json) -> &'static str {
    match data {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn matches_type(data: &Json, wanted: &str) -> bool {
    match wanted {
        "integer" => data.as_f64().is_some_and(|n| n.fract() == 0.0),
        "number" => data.is_number(),
        "any" => true,
        other => data_type(data) == other,
    }
}

/// Equality with numbers compared by value, so `1` equals `1.0`
fn json_equal(a: &Json, b: &Json) -> bool {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => x.as_f64() == y.as_f64(),
        (Json::Array(x), Json::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| json_equal(a, b))
        }
        (Json::Object(x), Json::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| json_equal(v, other)))
        }
        _ => a == b,
    }
}

fn number_text(n: f64) -> String {
    super::value::number_to_string(n)
}

impl Validator<'_> {
    fn check(
        &self,
        data: &Json,
        schema: &Json,
        data_path: &str,
        schema_path: &str,
        depth: usize,
    ) -> SchemaResult {
        if depth > MAX_DEPTH {
            return Err(error(
                "Schema nesting too deep",
                data_path,
                schema_path.to_string(),
            ));
        }
        let Json::Object(schema) = schema else {
            return Ok(());
        };

        if let Some(Json::String(reference)) = schema.get("$ref") {
            let target = reference
                .strip_prefix('#')
                .and_then(|pointer| self.root.pointer(pointer));
            return match target {
                Some(target) => self.check(data, target, data_path, reference, depth + 1),
                None => Err(error(
                    format!("Could not resolve reference: {}", reference),
                    data_path,
                    format!("{}/$ref", schema_path),
                )),
            };
        }

        self.check_type(data, schema, data_path, schema_path)?;
        self.check_enum(data, schema, data_path, schema_path)?;
        match data {
            Json::Number(n) => {
                self.check_number(n.as_f64().unwrap_or(f64::NAN), schema, data_path, schema_path)?
            }
            Json::String(s) => self.check_string(s, schema, data_path, schema_path)?,
            Json::Array(items) => self.check_array(items, schema, data_path, schema_path, depth)?,
            Json::Object(map) => self.check_object(map, schema, data_path, schema_path, depth)?,
            _ => {}
        }
        self.check_combinators(data, schema, data_path, schema_path, depth)
    }

    fn check_type(
        &self,
        data: &Json,
        schema: &Map<String, Json>,
        data_path: &str,
        schema_path: &str,
    ) -> SchemaResult {
        let allowed: Vec<&str> = match schema.get("type") {
            Some(Json::String(t)) => vec![t.as_str()],
            Some(Json::Array(types)) => types.iter().filter_map(Json::as_str).collect(),
            _ => return Ok(()),
        };
        if allowed.iter().any(|t| matches_type(data, t)) {
            return Ok(());
        }
        Err(error(
            format!(
                "Invalid type: {} (expected {})",
                data_type(data),
                allowed.join("/")
            ),
            data_path,
            format!("{}/type", schema_path),
        ))
    }

    fn check_enum(
        &self,
        data: &Json,
        schema: &Map<String, Json>,
        data_path: &str,
        schema_path: &str,
    ) -> SchemaResult {
        if let Some(Json::Array(options)) = schema.get("enum") {
            if !options.iter().any(|option| json_equal(option, data)) {
                return Err(error(
                    format!("No enum match for: {}", data),
                    data_path,
                    format!("{}/enum", schema_path),
                ));
            }
        }
        if let Some(constant) = schema.get("const") {
            if !json_equal(constant, data) {
                return Err(error(
                    format!("Does not match constant value: {}", constant),
                    data_path,
                    format!("{}/const", schema_path),
                ));
            }
        }
        Ok(())
    }

    fn check_number(
        &self,
        n: f64,
        schema: &Map<String, Json>,
        data_path: &str,
        schema_path: &str,
    ) -> SchemaResult {
        if let Some(divisor) = schema.get("multipleOf").and_then(Json::as_f64) {
            let quotient = n / divisor;
            if divisor != 0.0 && (quotient - quotient.round()).abs() > 1e-9 {
                return Err(error(
                    format!(
                        "Value {} is not a multiple of {}",
                        number_text(n),
                        number_text(divisor)
                    ),
                    data_path,
                    format!("{}/multipleOf", schema_path),
                ));
            }
        }

        let exclusive = |key: &str| schema.get(key);
        if let Some(minimum) = schema.get("minimum").and_then(Json::as_f64) {
            let strict = exclusive("exclusiveMinimum") == Some(&Json::Bool(true));
            if n < minimum {
                return Err(error(
                    format!("Value {} is less than minimum {}", number_text(n), number_text(minimum)),
                    data_path,
                    format!("{}/minimum", schema_path),
                ));
            }
            if strict && n == minimum {
                return Err(error(
                    format!(
                        "Value {} is equal to exclusive minimum {}",
                        number_text(n),
                        number_text(minimum)
                    ),
                    data_path,
                    format!("{}/exclusiveMinimum", schema_path),
                ));
            }
        }
        if let Some(bound) = exclusive("exclusiveMinimum").and_then(Json::as_f64) {
            if n <= bound {
                return Err(error(
                    format!(
                        "Value {} is equal to or less than exclusive minimum {}",
                        number_text(n),
                        number_text(bound)
                    ),
                    data_path,
                    format!("{}/exclusiveMinimum", schema_path),
                ));
            }
        }
        if let Some(maximum) = schema.get("maximum").and_then(Json::as_f64) {
            let strict = exclusive("exclusiveMaximum") == Some(&Json::Bool(true));
            if n > maximum {
                return Err(error(
                    format!(
                        "Value {} is greater than maximum {}",
                        number_text(n),
                        number_text(maximum)
                    ),
                    data_path,
                    format!("{}/maximum", schema_path),
                ));
            }
            if strict && n == maximum {
                return Err(error(
                    format!(
                        "Value {} is equal to exclusive maximum {}",
                        number_text(n),
                        number_text(maximum)
                    ),
                    data_path,
                    format!("{}/exclusiveMaximum", schema_path),
                ));
            }
        }
        if let Some(bound) = exclusive("exclusiveMaximum").and_then(Json::as_f64) {
            if n >= bound {
                return Err(error(
                    format!(
                        "Value {} is equal to or greater than exclusive maximum {}",
                        number_text(n),
                        number_text(bound)
                    ),
                    data_path,
                    format!("{}/exclusiveMaximum", schema_path),
                ));
            }
        }
        Ok(())
    }

    fn check_string(
        &self,
        s: &str,
        schema: &Map<String, Json>,
        data_path: &str,
        schema_path: &str,
    ) -> SchemaResult {
        let len = s.chars().count();
        if let Some(min) = schema.get("minLength").and_then(Json::as_u64) {
            if (len as u64) < min {
                return Err(error(
                    format!("String is too short ({} chars), minimum {}", len, min),
                    data_path,
                    format!("{}/minLength", schema_path),
                ));
            }
        }
        if let Some(max) = schema.get("maxLength").and_then(Json::as_u64) {
            if (len as u64) > max {
                return Err(error(
                    format!("String is too long ({} chars), maximum {}", len, max),
                    data_path,
                    format!("{}/maxLength", schema_path),
                ));
            }
        }
        if let Some(pattern) = schema.get("pattern").and_then(Json::as_str) {
            let matched = regex::Regex::new(pattern)
                .map(|re| re.is_match(s))
                .map_err(|_| {
                    error(
                        format!("Invalid pattern: {}", pattern),
                        data_path,
                        format!("{}/pattern", schema_path),
                    )
                })?;
            if !matched {
                return Err(error(
                    format!("String does not match pattern: {}", pattern),
                    data_path,
                    format!("{}/pattern", schema_path),
                ));
            }
        }
        Ok(())
    }

    fn check_array(
        &self,
        items: &[Json],
        schema: &Map<String, Json>,
        data_path: &str,
        schema_path: &str,
        depth: usize,
    ) -> SchemaResult {
        if let Some(min) = schema.get("minItems").and_then(Json::as_u64) {
            if (items.len() as u64) < min {
                return Err(error(
                    format!("Array is too short ({}), minimum {}", items.len(), min),
                    data_path,
                    format!("{}/minItems", schema_path),
                ));
            }
        }
        if let Some(max) = schema.get("maxItems").and_then(Json::as_u64) {
            if (items.len() as u64) > max {
                return Err(error(
                    format!("Array is too long ({}), maximum {}", items.len(), max),
                    data_path,
                    format!("{}/maxItems", schema_path),
                ));
            }
        }
        if schema.get("uniqueItems") == Some(&Json::Bool(true)) {
            for i in 0..items.len() {
                for j in (i + 1)..items.len() {
                    if json_equal(&items[i], &items[j]) {
                        return Err(error(
                            format!("Array items are not unique (indices {} and {})", i, j),
                            data_path,
                            format!("{}/uniqueItems", schema_path),
                        ));
                    }
                }
            }
        }

        match schema.get("items") {
            Some(Json::Array(tuple)) => {
                for (index, item) in items.iter().enumerate() {
                    let item_path = format!("{}/{}", data_path, index);
                    match tuple.get(index) {
                        Some(item_schema) => self.check(
                            item,
                            item_schema,
                            &item_path,
                            &format!("{}/items/{}", schema_path, index),
                            depth + 1,
                        )?,
                        None => match schema.get("additionalItems") {
                            Some(Json::Bool(false)) => {
                                return Err(error(
                                    "Additional items not allowed",
                                    &item_path,
                                    format!("{}/additionalItems", schema_path),
                                ))
                            }
                            Some(extra @ Json::Object(_)) => self.check(
                                item,
                                extra,
                                &item_path,
                                &format!("{}/additionalItems", schema_path),
                                depth + 1,
                            )?,
                            _ => {}
                        },
                    }
                }
            }
            Some(item_schema @ Json::Object(_)) => {
                for (index, item) in items.iter().enumerate() {
                    self.check(
                        item,
                        item_schema,
                        &format!("{}/{}", data_path, index),
                        &format!("{}/items", schema_path),
                        depth + 1,
                    )?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn check_object(
        &self,
        map: &Map<String, Json>,
        schema: &Map<String, Json>,
        data_path: &str,
        schema_path: &str,
        depth: usize,
    ) -> SchemaResult {
        if let Some(min) = schema.get("minProperties").and_then(Json::as_u64) {
            if (map.len() as u64) < min {
                return Err(error(
                    format!("Too few properties defined ({}), minimum {}", map.len(), min),
                    data_path,
                    format!("{}/minProperties", schema_path),
                ));
            }
        }
        if let Some(max) = schema.get("maxProperties").and_then(Json::as_u64) {
            if (map.len() as u64) > max {
                return Err(error(
                    format!("Too many properties defined ({}), maximum {}", map.len(), max),
                    data_path,
                    format!("{}/maxProperties", schema_path),
                ));
            }
        }
        if let Some(Json::Array(required)) = schema.get("required") {
            for (index, key) in required.iter().filter_map(Json::as_str).enumerate() {
                if !map.contains_key(key) {
                    return Err(error(
                        format!("Missing required property: {}", key),
                        &format!("{}/{}", data_path, escape(key)),
                        format!("{}/required/{}", schema_path, index),
                    ));
                }
            }
        }

        let properties = schema.get("properties").and_then(Json::as_object);
        let pattern_properties = schema.get("patternProperties").and_then(Json::as_object);
        for (key, value) in map {
            let value_path = format!("{}/{}", data_path, escape(key));
            let mut known = false;
            if let Some(property_schema) = properties.and_then(|p| p.get(key)) {
                known = true;
                self.check(
                    value,
                    property_schema,
                    &value_path,
                    &format!("{}/properties/{}", schema_path, escape(key)),
                    depth + 1,
                )?;
            }
            for (pattern, property_schema) in pattern_properties.into_iter().flatten() {
                let Ok(re) = regex::Regex::new(pattern) else {
                    continue;
                };
                if re.is_match(key) {
                    known = true;
                    self.check(
                        value,
                        property_schema,
                        &value_path,
                        &format!("{}/patternProperties/{}", schema_path, escape(pattern)),
                        depth + 1,
                    )?;
                }
            }
            if known {
                continue;
            }
            match schema.get("additionalProperties") {
                Some(Json::Bool(false)) => {
                    return Err(error(
                        "Additional properties not allowed",
                        &value_path,
                        format!("{}/additionalProperties", schema_path),
                    ))
                }
                Some(extra @ Json::Object(_)) => self.check(
                    value,
                    extra,
                    &value_path,
                    &format!("{}/additionalProperties", schema_path),
                    depth + 1,
                )?,
                _ => {}
            }
        }
        Ok(())
    }

    fn check_combinators(
        &self,
        data: &Json,
        schema: &Map<String, Json>,
        data_path: &str,
        schema_path: &str,
        depth: usize,
    ) -> SchemaResult {
        if let Some(Json::Array(all)) = schema.get("allOf") {
            for (index, sub) in all.iter().enumerate() {
                self.check(
                    data,
                    sub,
                    data_path,
                    &format!("{}/allOf/{}", schema_path, index),
                    depth + 1,
                )?;
            }
        }
        if let Some(Json::Array(any)) = schema.get("anyOf") {
            let matched = any.iter().enumerate().any(|(index, sub)| {
                self.check(
                    data,
                    sub,
                    data_path,
                    &format!("{}/anyOf/{}", schema_path, index),
                    depth + 1,
                )
                .is_ok()
            });
            if !matched {
                return Err(error(
                    "Data does not match any schemas from \"anyOf\"",
                    data_path,
                    format!("{}/anyOf", schema_path),
                ));
            }
        }
        if let Some(Json::Array(one)) = schema.get("oneOf") {
            let valid: Vec<usize> = one
                .iter()
                .enumerate()
                .filter(|(index, sub)| {
                    self.check(
                        data,
                        sub,
                        data_path,
                        &format!("{}/oneOf/{}", schema_path, index),
                        depth + 1,
                    )
                    .is_ok()
                })
                .map(|(index, _)| index)
                .collect();
            match valid.as_slice() {
                [_] => {}
                [] => {
                    return Err(error(
                        "Data does not match any schemas from \"oneOf\"",
                        data_path,
                        format!("{}/oneOf", schema_path),
                    ))
                }
                [first, second, ..] => {
                    return Err(error(
                        format!(
                            "Data is valid against more than one schema from \"oneOf\": indices {} and {}",
                            first, second
                        ),
                        data_path,
                        format!("{}/oneOf", schema_path),
                    ))
                }
            }
        }
        if let Some(not) = schema.get("not") {
            if self
                .check(data, not, data_path, &format!("{}/not", schema_path), depth + 1)
                .is_ok()
            {
                return Err(error(
                    "Data matches schema from \"not\"",
                    data_path,
                    format!("{}/not", schema_path),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn todo_schema() -> Json {
        json!({
            "type": "object",
            "required": ["id", "title", "completed"],
            "properties": {
                "id": {"type": "integer", "minimum": 1},
                "title": {"type": "string", "minLength": 1},
                "completed": {"type": "boolean"},
                "tags": {"type": "array", "items": {"type": "string"}, "uniqueItems": true}
            },
            "additionalProperties": false
        })
    }

    #[test]
    fn test_valid_document() {
        let data = json!({"id": 1, "title": "write docs", "completed": false, "tags": ["a"]});
        assert_eq!(validate(&data, &todo_schema()), Ok(()));
    }

    #[test]
    fn test_type_error_paths() {
        let data = json!({"id": "1", "title": "x", "completed": true});
        let err = validate(&data, &todo_schema()).unwrap_err();
        assert_eq!(err.message, "Invalid type: string (expected integer)");
        assert_eq!(err.data_path, "/id");
        assert_eq!(err.schema_path, "/properties/id/type");
    }

    #[test]
    fn test_missing_required() {
        let err = validate(&json!({"id": 1}), &todo_schema()).unwrap_err();
        assert_eq!(err.message, "Missing required property: title");
    }

    #[test]
    fn test_additional_property_rejected() {
        let data = json!({"id": 1, "title": "x", "completed": true, "extra": 1});
        let err = validate(&data, &todo_schema()).unwrap_err();
        assert_eq!(err.message, "Additional properties not allowed");
        assert_eq!(err.data_path, "/extra");
    }

    #[test]
    fn test_array_rules() {
        let data = json!({"id": 1, "title": "x", "completed": true, "tags": ["a", "a"]});
        let err = validate(&data, &todo_schema()).unwrap_err();
        assert_eq!(err.message, "Array items are not unique (indices 0 and 1)");
    }

    #[test]
    fn test_combinators_and_refs() {
        let schema = json!({
            "definitions": {"positive": {"type": "number", "exclusiveMinimum": true, "minimum": 0}},
            "oneOf": [{"$ref": "#/definitions/positive"}, {"type": "string"}]
        });
        assert!(validate(&json!(3), &schema).is_ok());
        assert!(validate(&json!("x"), &schema).is_ok());
        let err = validate(&json!(0), &schema).unwrap_err();
        assert_eq!(err.message, "Data does not match any schemas from \"oneOf\"");

        let not = json!({"not": {"enum": [1, 2]}});
        assert!(validate(&json!(3), &not).is_ok());
        assert!(validate(&json!(2.0), &not).is_err());
    }

    #[test]
    fn test_string_constraints() {
        let schema = json!({"type": "string", "pattern": "^[a-z]+$", "maxLength": 3});
        assert_eq!(
            validate(&json!("abcd"), &schema).unwrap_err().message,
            "String is too long (4 chars), maximum 3"
        );
        assert_eq!(
            validate(&json!("AB"), &schema).unwrap_err().message,
            "String does not match pattern: ^[a-z]+$"
        );
    }
}
