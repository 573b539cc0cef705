//! Tree-walking evaluator
//!
//! Scripts only ever see the bindings installed by [`Interpreter::new`]:
//! `res`, `expect`, `tv4`, `test` and, when authorized, `bru`. There is no
//! host object that reaches the network, the filesystem or the process.

use std::rc::Rc;

use indexmap::IndexMap;
use tracing::info;

use super::ast::{
    AssignOp, BinaryOp, DeclKind, Expr, FunctionBody, LogicalOp, Pattern, Stmt, TemplatePart,
    UnaryOp,
};
use super::error::{ScriptError, ScriptResult};
use super::expect::Expectation;
use super::schema;
use super::value::{
    array_too_long, json_footprint, number_to_string, string_too_long, ArrayRef, Closure, Heap,
    Native, ObjectRef, Scope, ScriptRegex, Value, MAX_ARRAY_LEN, MAX_STRING_LEN,
};
use crate::transport::ResponseView;
use crate::variables::Variables;

/// Statements, loop iterations and calls a single script may perform
pub const MAX_STEPS: u64 = 1_000_000;

/// Deepest function call nesting
pub const MAX_CALL_DEPTH: usize = 32;

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

pub struct Interpreter<'a> {
    heap: Heap,
    vars: Option<&'a dyn Variables>,
    steps: u64,
    call_depth: usize,
    assertions: u64,
    res: Value,
    tv4: ObjectRef,
    global: Rc<Scope>,
}

impl<'a> Interpreter<'a> {
    /// `vars` is only handed over when script execution was authorized; it
    /// backs the `bru` binding.
    pub fn new(response: &ResponseView, vars: Option<&'a dyn Variables>) -> Self {
        let heap = Heap::default();
        let global = Scope::root();
        heap.capture(&global);

        let mut headers = IndexMap::new();
        for (name, value) in &response.headers {
            headers.insert(name.clone(), Value::str(value));
        }
        let mut res = IndexMap::new();
        res.insert("status".to_string(), Value::Number(f64::from(response.status)));
        res.insert("data".to_string(), heap.from_json(&response.data));
        res.insert("headers".to_string(), Value::Object(heap.host_object(headers)));
        let res = Value::Object(heap.host_object(res));

        let mut tv4 = IndexMap::new();
        tv4.insert("validate".to_string(), Value::Native(Native::Tv4Validate));
        tv4.insert(
            "validateResult".to_string(),
            Value::Native(Native::Tv4ValidateResult),
        );
        tv4.insert("error".to_string(), Value::Null);
        let tv4 = heap.host_object(tv4);

        global.declare("res", res.clone(), true);
        global.declare("expect", Value::Native(Native::Expect), true);
        global.declare("tv4", Value::Object(Rc::clone(&tv4)), true);
        global.declare("test", Value::Native(Native::Test), true);
        if vars.is_some() {
            let mut bru = IndexMap::new();
            bru.insert("setVar".to_string(), Value::Native(Native::BruSetVar));
            bru.insert("getVar".to_string(), Value::Native(Native::BruGetVar));
            bru.insert("hasVar".to_string(), Value::Native(Native::BruHasVar));
            global.declare("bru", Value::Object(heap.host_object(bru)), true);
        }

        Self {
            heap,
            vars,
            steps: 0,
            call_depth: 0,
            assertions: 0,
            res,
            tv4,
            global,
        }
    }

    /// Number of `expect(...)` invocations so far
    pub fn assertions(&self) -> u64 {
        self.assertions
    }

    pub fn run(&mut self, program: &[Stmt]) -> ScriptResult<()> {
        let scope = Rc::clone(&self.global);
        match self.exec_block(program, &scope)? {
            Flow::Normal | Flow::Return(_) => Ok(()),
            Flow::Break => Err(ScriptError::syntax("illegal break statement", 0, 0)),
            Flow::Continue => Err(ScriptError::syntax("illegal continue statement", 0, 0)),
        }
    }

    fn tick(&mut self) -> ScriptResult<()> {
        self.steps += 1;
        if self.steps > MAX_STEPS {
            return Err(ScriptError::Limit(
                "script exceeded its execution budget".to_string(),
            ));
        }
        Ok(())
    }

    fn exec_block(&mut self, body: &[Stmt], scope: &Rc<Scope>) -> ScriptResult<Flow> {
        for stmt in body {
            if let Stmt::Function(def) = stmt {
                if let Some(name) = &def.name {
                    self.heap.capture(scope);
                    let closure = Closure {
                        def: Rc::clone(def),
                        scope: Rc::clone(scope),
                    };
                    scope.declare(name, Value::Function(Rc::new(closure)), true);
                }
            }
        }
        for stmt in body {
            match self.exec(stmt, scope)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> ScriptResult<Flow> {
        self.tick()?;
        match stmt {
            Stmt::VarDecl { kind, declarations } => {
                for (pattern, init) in declarations {
                    let value = match init {
                        Some(expr) => self.eval(expr, scope)?,
                        None => Value::Undefined,
                    };
                    bind_pattern(pattern, value, scope, *kind != DeclKind::Const)?;
                }
                Ok(Flow::Normal)
            }
            Stmt::Function(_) | Stmt::Empty => Ok(Flow::Normal),
            Stmt::If {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.exec(then, scope)
                } else if let Some(otherwise) = otherwise {
                    self.exec(otherwise, scope)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::Block(body) => self.exec_block(body, &Scope::child(scope)),
            Stmt::ForOf {
                pattern,
                iterable,
                body,
            } => {
                let subject = self.eval(iterable, scope)?;
                let items = match &subject {
                    Value::Array(items) => items.borrow().clone(),
                    Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
                    other => {
                        return Err(ScriptError::type_error(format!(
                            "{} is not iterable",
                            other.inspect()
                        )))
                    }
                };
                self.heap.reserve(items.len())?;
                self.run_loop(items, pattern, body, scope)
            }
            Stmt::ForIn {
                pattern,
                object,
                body,
            } => {
                let subject = self.eval(object, scope)?;
                let keys = subject.keys();
                self.heap.charge(keys.iter().map(String::len).sum())?;
                let keys = keys.into_iter().map(Value::str).collect();
                self.run_loop(keys, pattern, body, scope)
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                let loop_scope = Scope::child(scope);
                if let Some(init) = init {
                    self.exec(init, &loop_scope)?;
                }
                loop {
                    self.tick()?;
                    if let Some(test) = test {
                        if !self.eval(test, &loop_scope)?.truthy() {
                            break;
                        }
                    }
                    match self.exec(body, &loop_scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(update) = update {
                        self.eval(update, &loop_scope)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::While { test, body } => {
                loop {
                    self.tick()?;
                    if !self.eval(test, scope)?.truthy() {
                        break;
                    }
                    match self.exec(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Expr(expr) => {
                self.eval(expr, scope)?;
                Ok(Flow::Normal)
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Throw(expr) => {
                let value = self.eval(expr, scope)?;
                Err(ScriptError::Thrown(thrown_message(&value)))
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
        }
    }

    fn run_loop(
        &mut self,
        items: Vec<Value>,
        pattern: &Pattern,
        body: &Stmt,
        scope: &Rc<Scope>,
    ) -> ScriptResult<Flow> {
        for item in items {
            self.tick()?;
            let iteration = Scope::child(scope);
            bind_pattern(pattern, item, &iteration, true)?;
            match self.exec(body, &iteration)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    pub(super) fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> ScriptResult<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(Rc::clone(s))),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(expr) => out.push_str(&self.eval(expr, scope)?.to_display()),
                    }
                    if out.len() > MAX_STRING_LEN {
                        return Err(string_too_long());
                    }
                }
                self.heap.string(out)
            }
            Expr::Regex { pattern, flags } => ScriptRegex::compile(pattern, flags)
                .map(|re| Value::Regex(Rc::new(re)))
                .map_err(|e| ScriptError::Thrown(format!("SyntaxError: {}", e))),
            Expr::Ident(name) => scope
                .lookup(name)
                .ok_or_else(|| ScriptError::Reference(name.clone())),
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, scope)?);
                }
                self.heap.array(values)
            }
            Expr::Object(props) => {
                let mut map = IndexMap::new();
                for (key, value) in props {
                    let value = self.eval(value, scope)?;
                    map.insert(key.clone(), value);
                }
                self.heap.object(map)
            }
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let object = self.eval(object, scope)?;
                if *optional && is_nullish(&object) {
                    return Ok(Value::Undefined);
                }
                self.member(&object, property)
            }
            Expr::Index {
                object,
                index,
                optional,
            } => {
                let object = self.eval(object, scope)?;
                if *optional && is_nullish(&object) {
                    return Ok(Value::Undefined);
                }
                let key = property_key(&self.eval(index, scope)?);
                self.member(&object, &key)
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => self.eval_call(callee, args, *optional, scope),
            Expr::New { constructor, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, scope)?);
                }
                match constructor.as_str() {
                    "Error" | "TypeError" | "RangeError" | "AssertionError" => {
                        let message = values
                            .first()
                            .filter(|v| !matches!(v, Value::Undefined))
                            .map(Value::to_display)
                            .unwrap_or_default();
                        let mut error = IndexMap::new();
                        error.insert("name".to_string(), Value::str(constructor));
                        error.insert("message".to_string(), self.heap.string(message)?);
                        self.heap.object(error)
                    }
                    other => Err(ScriptError::type_error(format!("{} is not a constructor", other))),
                }
            }
            Expr::Unary { op, operand } => {
                if *op == UnaryOp::Typeof {
                    if let Expr::Ident(name) = operand.as_ref() {
                        return Ok(Value::str(
                            scope.lookup(name).map(|v| v.type_of()).unwrap_or("undefined"),
                        ));
                    }
                }
                let value = self.eval(operand, scope)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::Typeof => Value::str(value.type_of()),
                })
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                self.binary(*op, &left, &right)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.truthy(),
                    LogicalOp::Or => left.truthy(),
                    LogicalOp::Nullish => !is_nullish(&left),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Conditional {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }
            Expr::Assign { op, target, value } => {
                let rhs = self.eval(value, scope)?;
                let new_value = match op {
                    AssignOp::Assign => rhs,
                    AssignOp::Add => {
                        let current = self.eval(target, scope)?;
                        self.binary(BinaryOp::Add, &current, &rhs)?
                    }
                    AssignOp::Sub => {
                        let current = self.eval(target, scope)?;
                        self.binary(BinaryOp::Sub, &current, &rhs)?
                    }
                };
                self.store(target, new_value.clone(), scope)?;
                Ok(new_value)
            }
            Expr::Update {
                increment,
                prefix,
                target,
            } => {
                let old = self.eval(target, scope)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.store(target, Value::Number(new), scope)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Function(def) => {
                self.heap.capture(scope);
                Ok(Value::Function(Rc::new(Closure {
                    def: Rc::clone(def),
                    scope: Rc::clone(scope),
                })))
            }
        }
    }

    fn member(&mut self, object: &Value, key: &str) -> ScriptResult<Value> {
        match object {
            Value::Undefined | Value::Null => Err(ScriptError::type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                object.to_display(),
                key
            ))),
            Value::Expectation(expectation) => self.expectation_property(expectation, key),
            other => Ok(other.get_property(key)),
        }
    }

    fn store(&mut self, target: &Expr, value: Value, scope: &Rc<Scope>) -> ScriptResult<()> {
        match target {
            Expr::Ident(name) => scope.assign(name, value).map_err(|is_const| {
                if is_const {
                    ScriptError::type_error("Assignment to constant variable.")
                } else {
                    ScriptError::Reference(name.clone())
                }
            }),
            Expr::Member {
                object, property, ..
            } => {
                let object = self.eval(object, scope)?;
                self.set_property(&object, property, value)
            }
            Expr::Index { object, index, .. } => {
                let object = self.eval(object, scope)?;
                let key = property_key(&self.eval(index, scope)?);
                self.set_property(&object, &key, value)
            }
            _ => Err(ScriptError::syntax("invalid assignment target", 0, 0)),
        }
    }

    fn eval_args(&mut self, args: &[Expr], scope: &Rc<Scope>) -> ScriptResult<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, scope)?);
        }
        Ok(values)
    }

    fn eval_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        optional: bool,
        scope: &Rc<Scope>,
    ) -> ScriptResult<Value> {
        let (receiver, method) = match callee {
            Expr::Member {
                object,
                property,
                optional: optional_member,
            } => {
                let receiver = self.eval(object, scope)?;
                if *optional_member && is_nullish(&receiver) {
                    return Ok(Value::Undefined);
                }
                (receiver, property.clone())
            }
            Expr::Index {
                object,
                index,
                optional: optional_member,
            } => {
                let receiver = self.eval(object, scope)?;
                if *optional_member && is_nullish(&receiver) {
                    return Ok(Value::Undefined);
                }
                let key = property_key(&self.eval(index, scope)?);
                (receiver, key)
            }
            other => {
                let function = self.eval(other, scope)?;
                if optional && is_nullish(&function) {
                    return Ok(Value::Undefined);
                }
                let args = self.eval_args(args, scope)?;
                return self.call_value(&function, args, &describe_callee(other));
            }
        };

        let args = self.eval_args(args, scope)?;
        self.call_method(&receiver, &method, args, optional)
    }

    fn call_method(
        &mut self,
        receiver: &Value,
        method: &str,
        args: Vec<Value>,
        optional: bool,
    ) -> ScriptResult<Value> {
        match receiver {
            Value::Undefined | Value::Null => Err(ScriptError::type_error(format!(
                "Cannot read properties of {} (reading '{}')",
                receiver.to_display(),
                method
            ))),
            Value::Expectation(expectation) => self.expectation_call(expectation, method, args),
            Value::Str(s) => self.string_method(s, method, &args),
            Value::Array(items) => self.array_method(items, method, args),
            Value::Number(n) => number_method(*n, method, &args),
            Value::Bool(b) if method == "toString" => Ok(Value::str(b.to_string())),
            Value::Regex(re) if method == "test" => {
                let subject = args.first().map(Value::to_display).unwrap_or_default();
                Ok(Value::Bool(re.regex.is_match(&subject)))
            }
            Value::Object(map) => {
                let function = map.borrow().get(method).cloned();
                match function {
                    Some(f) if f.is_callable() => self.call_value(&f, args, method),
                    None if method == "hasOwnProperty" => {
                        let key = args.first().map(property_key).unwrap_or_default();
                        Ok(Value::Bool(map.borrow().contains_key(&key)))
                    }
                    None | Some(Value::Undefined) if optional => Ok(Value::Undefined),
                    _ => Err(ScriptError::type_error(format!("{} is not a function", method))),
                }
            }
            _ => Err(ScriptError::type_error(format!("{} is not a function", method))),
        }
    }

    pub(super) fn call_value(
        &mut self,
        function: &Value,
        args: Vec<Value>,
        name: &str,
    ) -> ScriptResult<Value> {
        match function {
            Value::Function(closure) => self.call_closure(closure, args),
            Value::Native(native) => self.call_native(*native, args),
            _ => Err(ScriptError::type_error(format!("{} is not a function", name))),
        }
    }

    fn call_closure(&mut self, closure: &Rc<Closure>, args: Vec<Value>) -> ScriptResult<Value> {
        self.tick()?;
        self.call_depth += 1;
        let result = if self.call_depth > MAX_CALL_DEPTH {
            Err(ScriptError::Limit("Maximum call stack size exceeded".to_string()))
        } else {
            self.invoke(closure, args)
        };
        self.call_depth -= 1;
        result
    }

    fn invoke(&mut self, closure: &Rc<Closure>, args: Vec<Value>) -> ScriptResult<Value> {
        let scope = Scope::child(&closure.scope);
        let mut args = args.into_iter();
        for param in &closure.def.params {
            bind_pattern(param, args.next().unwrap_or(Value::Undefined), &scope, true)?;
        }
        match &closure.def.body {
            FunctionBody::Block(body) => match self.exec_block(body, &scope)? {
                Flow::Return(value) => Ok(value),
                _ => Ok(Value::Undefined),
            },
            FunctionBody::Expr(expr) => self.eval(expr, &scope),
        }
    }

    fn call_native(&mut self, native: Native, args: Vec<Value>) -> ScriptResult<Value> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);
        match native {
            Native::Test => {
                let name = arg(0).to_display();
                info!("{}", name);
                let body = arg(1);
                if !body.is_callable() {
                    return Err(ScriptError::type_error(format!(
                        "test '{}' needs a function body",
                        name
                    )));
                }
                let bindings = vec![
                    self.res.clone(),
                    Value::Object(Rc::clone(&self.tv4)),
                    Value::Native(Native::Expect),
                ];
                self.call_value(&body, bindings, &name)?;
                Ok(Value::Undefined)
            }
            Native::Expect => {
                self.assertions += 1;
                let message = match arg(1) {
                    Value::Str(s) => Some(s),
                    _ => None,
                };
                Ok(Value::Expectation(Rc::new(Expectation::new(arg(0), message))))
            }
            Native::Tv4Validate => {
                let outcome = schema::validate(&arg(0).to_json()?, &arg(1).to_json()?);
                let error = match &outcome {
                    Ok(()) => Value::Null,
                    Err(e) => self.schema_error_value(e)?,
                };
                self.tv4.borrow_mut().insert("error".to_string(), error);
                Ok(Value::Bool(outcome.is_ok()))
            }
            Native::Tv4ValidateResult => {
                let outcome = schema::validate(&arg(0).to_json()?, &arg(1).to_json()?);
                let error = match &outcome {
                    Ok(()) => Value::Null,
                    Err(e) => self.schema_error_value(e)?,
                };
                let mut result = IndexMap::new();
                result.insert("valid".to_string(), Value::Bool(outcome.is_ok()));
                result.insert("error".to_string(), error);
                result.insert("missing".to_string(), self.heap.array(Vec::new())?);
                self.heap.object(result)
            }
            Native::BruSetVar | Native::BruGetVar | Native::BruHasVar => {
                let Some(vars) = self.vars else {
                    return Err(ScriptError::Reference("bru".to_string()));
                };
                let key = arg(0).to_display();
                match native {
                    Native::BruSetVar => {
                        let value = arg(1).to_json()?;
                        self.heap.charge(json_footprint(&value))?;
                        vars.set_var(&key, value);
                        Ok(Value::Undefined)
                    }
                    Native::BruGetVar => match vars.get_var(&key) {
                        Some(value) => {
                            self.heap.charge(json_footprint(&value))?;
                            Ok(self.heap.from_json(&value))
                        }
                        None => Ok(Value::Undefined),
                    },
                    _ => Ok(Value::Bool(vars.has_var(&key))),
                }
            }
        }
    }

    fn array_method(&mut self, items: &ArrayRef, method: &str, args: Vec<Value>) -> ScriptResult<Value> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);
        let snapshot = || items.borrow().clone();
        match method {
            "includes" => {
                let needle = arg(0);
                Ok(Value::Bool(snapshot().iter().any(|v| same_value_zero(v, &needle))))
            }
            "indexOf" => {
                let needle = arg(0);
                let index = snapshot().iter().position(|v| v.strict_equals(&needle));
                Ok(Value::Number(index.map(|i| i as f64).unwrap_or(-1.0)))
            }
            "join" => {
                let separator = match arg(0) {
                    Value::Undefined => ",".to_string(),
                    other => other.to_display(),
                };
                let mut out = String::new();
                for (i, item) in snapshot().iter().enumerate() {
                    if i > 0 {
                        out.push_str(&separator);
                    }
                    if !matches!(item, Value::Undefined | Value::Null) {
                        out.push_str(&item.to_display());
                    }
                    if out.len() > MAX_STRING_LEN {
                        return Err(string_too_long());
                    }
                }
                self.heap.string(out)
            }
            "slice" => {
                let all = snapshot();
                let (start, end) = slice_bounds(all.len(), &arg(0), &arg(1));
                self.heap.array(all[start..end].to_vec())
            }
            "concat" => {
                let extra: usize = args
                    .iter()
                    .map(|v| match v {
                        Value::Array(more) => more.borrow().len(),
                        _ => 1,
                    })
                    .sum();
                if items.borrow().len().saturating_add(extra) > MAX_ARRAY_LEN {
                    return Err(array_too_long());
                }
                let mut all = snapshot();
                for extra in &args {
                    match extra {
                        Value::Array(more) => all.extend(more.borrow().iter().cloned()),
                        other => all.push(other.clone()),
                    }
                }
                self.heap.array(all)
            }
            "push" => {
                if items.borrow().len().saturating_add(args.len()) > MAX_ARRAY_LEN {
                    return Err(array_too_long());
                }
                self.heap.reserve(args.len())?;
                let mut borrowed = items.borrow_mut();
                borrowed.extend(args.iter().cloned());
                Ok(Value::Number(borrowed.len() as f64))
            }
            "map" | "filter" | "find" | "findIndex" | "some" | "every" | "forEach" => {
                let callback = arg(0);
                if !callback.is_callable() {
                    return Err(ScriptError::type_error(format!(
                        "{} is not a function",
                        callback.inspect()
                    )));
                }
                let all = snapshot();
                let array = Value::Array(Rc::clone(items));
                let mut mapped = Vec::new();
                for (index, item) in all.into_iter().enumerate() {
                    let result = self.call_value(
                        &callback,
                        vec![item.clone(), Value::Number(index as f64), array.clone()],
                        "callback",
                    )?;
                    match method {
                        "map" => mapped.push(result),
                        "filter" if result.truthy() => mapped.push(item),
                        "find" if result.truthy() => return Ok(item),
                        "findIndex" if result.truthy() => return Ok(Value::Number(index as f64)),
                        "some" if result.truthy() => return Ok(Value::Bool(true)),
                        "every" if !result.truthy() => return Ok(Value::Bool(false)),
                        _ => {}
                    }
                }
                Ok(match method {
                    "map" | "filter" => self.heap.array(mapped)?,
                    "find" | "forEach" => Value::Undefined,
                    "findIndex" => Value::Number(-1.0),
                    "some" => Value::Bool(false),
                    _ => Value::Bool(true),
                })
            }
            "reduce" => {
                let callback = arg(0);
                let all = snapshot();
                let mut iter = all.into_iter().enumerate();
                let mut accumulator = if args.len() > 1 {
                    arg(1)
                } else {
                    match iter.next() {
                        Some((_, first)) => first,
                        None => {
                            return Err(ScriptError::type_error(
                                "Reduce of empty array with no initial value",
                            ))
                        }
                    }
                };
                for (index, item) in iter {
                    accumulator = self.call_value(
                        &callback,
                        vec![accumulator, item, Value::Number(index as f64)],
                        "callback",
                    )?;
                }
                Ok(accumulator)
            }
            "toString" => self.heap.string(Value::Array(Rc::clone(items)).to_display()),
            other => Err(ScriptError::type_error(format!("array.{} is not a function", other))),
        }
    }
}

impl Interpreter<'_> {
    fn set_property(&self, object: &Value, key: &str, value: Value) -> ScriptResult<()> {
        match object {
            Value::Object(map) => {
                let mut map = map.borrow_mut();
                if !map.contains_key(key) {
                    self.heap.reserve(1)?;
                    self.heap.charge(key.len())?;
                }
                map.insert(key.to_string(), value);
                Ok(())
            }
            Value::Array(items) => {
                if let Ok(index) = key.parse::<usize>() {
                    if index >= MAX_ARRAY_LEN {
                        return Err(array_too_long());
                    }
                    let mut items = items.borrow_mut();
                    if index >= items.len() {
                        self.heap.reserve(index + 1 - items.len())?;
                        items.resize(index + 1, Value::Undefined);
                    }
                    items[index] = value;
                }
                Ok(())
            }
            Value::Undefined | Value::Null => Err(ScriptError::type_error(format!(
                "Cannot set properties of {} (setting '{}')",
                object.to_display(),
                key
            ))),
            _ => Ok(()),
        }
    }

    fn schema_error_value(&self, error: &schema::SchemaError) -> ScriptResult<Value> {
        let mut map = IndexMap::new();
        map.insert("message".to_string(), self.heap.string(error.message.clone())?);
        map.insert("dataPath".to_string(), self.heap.string(error.data_path.clone())?);
        map.insert("schemaPath".to_string(), self.heap.string(error.schema_path.clone())?);
        self.heap.object(map)
    }

    fn binary(&self, op: BinaryOp, left: &Value, right: &Value) -> ScriptResult<Value> {
        let numeric = |f: fn(f64, f64) -> f64| Value::Number(f(left.to_number(), right.to_number()));
        Ok(match op {
            BinaryOp::Add => {
                let stringy = |v: &Value| !matches!(v, Value::Undefined | Value::Null | Value::Bool(_) | Value::Number(_));
                if stringy(left) || stringy(right) {
                    let mut joined = left.to_display();
                    if joined.len() > MAX_STRING_LEN {
                        return Err(string_too_long());
                    }
                    joined.push_str(&right.to_display());
                    self.heap.string(joined)?
                } else {
                    numeric(|a, b| a + b)
                }
            }
            BinaryOp::Sub => numeric(|a, b| a - b),
            BinaryOp::Mul => numeric(|a, b| a * b),
            BinaryOp::Div => numeric(|a, b| a / b),
            BinaryOp::Rem => numeric(|a, b| a % b),
            BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
            BinaryOp::NotEq => Value::Bool(!left.loose_equals(right)),
            BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
            BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
                let ordering = match (left, right) {
                    (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                    _ => left.to_number().partial_cmp(&right.to_number()),
                };
                Value::Bool(match (op, ordering) {
                    (_, None) => false,
                    (BinaryOp::Lt, Some(o)) => o.is_lt(),
                    (BinaryOp::Gt, Some(o)) => o.is_gt(),
                    (BinaryOp::Le, Some(o)) => o.is_le(),
                    (_, Some(o)) => o.is_ge(),
                })
            }
            BinaryOp::In => match right {
                Value::Object(map) => Value::Bool(map.borrow().contains_key(&property_key(left))),
                Value::Array(items) => {
                    let key = property_key(left);
                    Value::Bool(
                        key == "length"
                            || key.parse::<usize>().is_ok_and(|i| i < items.borrow().len()),
                    )
                }
                other => {
                    return Err(ScriptError::type_error(format!(
                        "Cannot use 'in' operator to search for '{}' in {}",
                        property_key(left),
                        other.to_display()
                    )))
                }
            },
        })
    }

    fn string_method(&self, shared: &Rc<str>, method: &str, args: &[Value]) -> ScriptResult<Value> {
        let s: &str = shared;
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);
        let text = |i: usize| arg(i).to_display();
        let heap = &self.heap;
        match method {
            "includes" => Ok(Value::Bool(s.contains(&text(0)))),
            "startsWith" => Ok(Value::Bool(s.starts_with(&text(0)))),
            "endsWith" => Ok(Value::Bool(s.ends_with(&text(0)))),
            "indexOf" => Ok(Value::Number(
                s.find(&text(0))
                    .map(|byte| s[..byte].chars().count() as f64)
                    .unwrap_or(-1.0),
            )),
            "toLowerCase" => heap.string(s.to_lowercase()),
            "toUpperCase" => heap.string(s.to_uppercase()),
            "trim" => heap.string(s.trim().to_string()),
            "trimStart" => heap.string(s.trim_start().to_string()),
            "trimEnd" => heap.string(s.trim_end().to_string()),
            "charAt" => {
                let index = arg(0).to_number();
                let index = if index.is_nan() { 0 } else { index as usize };
                Ok(Value::str(s.chars().nth(index).map(String::from).unwrap_or_default()))
            }
            "slice" | "substring" => {
                let chars: Vec<char> = s.chars().collect();
                let (start, end) = slice_bounds(chars.len(), &arg(0), &arg(1));
                heap.string(chars[start..end].iter().collect())
            }
            "split" => {
                let parts: Vec<&str> = match arg(0) {
                    Value::Undefined => vec![s],
                    Value::Regex(re) => re.regex.split(s).collect(),
                    separator => {
                        let separator = separator.to_display();
                        if separator.is_empty() {
                            s.char_indices().map(|(i, c)| &s[i..i + c.len_utf8()]).collect()
                        } else {
                            s.split(separator.as_str()).collect()
                        }
                    }
                };
                if parts.len() > MAX_ARRAY_LEN {
                    return Err(array_too_long());
                }
                heap.charge(parts.iter().map(|part| part.len()).sum())?;
                heap.array(parts.into_iter().map(Value::str).collect())
            }
            "replace" | "replaceAll" => {
                let replacement = text(1);
                let replaced = match arg(0) {
                    Value::Regex(re) => {
                        let all = method == "replaceAll" || re.flags.contains('g');
                        let hits = if all { re.regex.find_iter(s).count() } else { 1 };
                        bounded_replacement(s.len(), hits, replacement.len())?;
                        let expand = regex::NoExpand(replacement.as_str());
                        if all {
                            re.regex.replace_all(s, expand).into_owned()
                        } else {
                            re.regex.replace(s, expand).into_owned()
                        }
                    }
                    pattern => {
                        let pattern = pattern.to_display();
                        if method == "replaceAll" {
                            let hits = if pattern.is_empty() {
                                s.chars().count() + 1
                            } else {
                                s.matches(pattern.as_str()).count()
                            };
                            bounded_replacement(s.len(), hits, replacement.len())?;
                            s.replace(&pattern, &replacement)
                        } else {
                            bounded_replacement(s.len(), 1, replacement.len())?;
                            s.replacen(&pattern, &replacement, 1)
                        }
                    }
                };
                heap.string(replaced)
            }
            "match" => match arg(0) {
                Value::Regex(re) => match re.regex.captures(s) {
                    Some(captures) => {
                        let groups: Vec<Value> = captures
                            .iter()
                            .map(|m| m.map(|m| Value::str(m.as_str())).unwrap_or(Value::Undefined))
                            .collect();
                        heap.charge(captures.iter().flatten().map(|m| m.len()).sum())?;
                        heap.array(groups)
                    }
                    None => Ok(Value::Null),
                },
                other => Err(ScriptError::type_error(format!(
                    "match expects a regular expression, got {}",
                    other.inspect()
                ))),
            },
            "repeat" => {
                let count = arg(0).to_number();
                if !(count >= 0.0 && count.is_finite()) {
                    return Err(ScriptError::Limit(format!("Invalid count value: {}", number_to_string(count))));
                }
                if (count as usize).saturating_mul(s.len()) > MAX_STRING_LEN {
                    return Err(string_too_long());
                }
                heap.string(s.repeat(count as usize))
            }
            "toString" => Ok(Value::Str(Rc::clone(shared))),
            other => Err(ScriptError::type_error(format!("string.{} is not a function", other))),
        }
    }
}

/// Reject a replacement whose result would exceed the string cap
fn bounded_replacement(len: usize, hits: usize, replacement: usize) -> ScriptResult<()> {
    if len.saturating_add(hits.saturating_mul(replacement)) > MAX_STRING_LEN {
        return Err(string_too_long());
    }
    Ok(())
}

fn bind_pattern(pattern: &Pattern, value: Value, scope: &Rc<Scope>, mutable: bool) -> ScriptResult<()> {
    match pattern {
        Pattern::Ident(name) => {
            scope.declare(name, value, mutable);
            Ok(())
        }
        Pattern::Object(props) => {
            if is_nullish(&value) {
                return Err(ScriptError::type_error(format!(
                    "Cannot destructure '{}' as it is {}.",
                    value.to_display(),
                    value.to_display()
                )));
            }
            for (key, target) in props {
                bind_pattern(target, value.get_property(key), scope, mutable)?;
            }
            Ok(())
        }
        Pattern::Array(items) => {
            if !matches!(value, Value::Array(_) | Value::Str(_)) {
                return Err(ScriptError::type_error(format!(
                    "{} is not iterable",
                    value.inspect()
                )));
            }
            for (index, target) in items.iter().enumerate() {
                if let Some(target) = target {
                    bind_pattern(target, value.get_property(&index.to_string()), scope, mutable)?;
                }
            }
            Ok(())
        }
    }
}

fn is_nullish(value: &Value) -> bool {
    matches!(value, Value::Undefined | Value::Null)
}

fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => a.strict_equals(b),
    }
}

fn property_key(value: &Value) -> String {
    match value {
        Value::Number(n) => number_to_string(*n),
        other => other.to_display(),
    }
}

fn describe_callee(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        _ => "expression".to_string(),
    }
}

fn thrown_message(value: &Value) -> String {
    match value.get_property("message") {
        Value::Str(message) if matches!(value, Value::Object(_)) => message.to_string(),
        _ => value.to_display(),
    }
}

/// Char-based `slice` bounds with negative offsets counted from the end
fn slice_bounds(len: usize, start: &Value, end: &Value) -> (usize, usize) {
    let resolve = |value: &Value, default: usize| -> usize {
        match value {
            Value::Undefined => default,
            other => {
                let n = other.to_number();
                if n.is_nan() {
                    0
                } else if n < 0.0 {
                    len.saturating_sub((-n) as usize)
                } else {
                    (n as usize).min(len)
                }
            }
        }
    };
    let start = resolve(start, 0);
    let end = resolve(end, len);
    (start, end.max(start))
}

fn number_method(n: f64, method: &str, args: &[Value]) -> ScriptResult<Value> {
    match method {
        "toFixed" => {
            let digits = args.first().map(Value::to_number).unwrap_or(0.0);
            if !(0.0..=100.0).contains(&digits) {
                return Err(ScriptError::Limit("toFixed() digits argument must be between 0 and 100".to_string()));
            }
            Ok(Value::str(format!("{:.*}", digits as usize, n)))
        }
        "toString" => Ok(Value::str(number_to_string(n))),
        other => Err(ScriptError::type_error(format!("number.{} is not a function", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse_program;
    use crate::variables::VariableStore;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn response() -> ResponseView {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        ResponseView {
            status: 200,
            data: json!({"id": 1, "title": "delectus aut autem", "tags": ["a", "b"]}),
            headers,
        }
    }

    fn run(source: &str) -> (ScriptResult<()>, u64) {
        let program = parse_program(source).unwrap();
        let mut interp = Interpreter::new(&response(), None);
        let result = interp.run(&program);
        (result, interp.assertions())
    }

    #[test]
    fn test_closures_and_loops() {
        let (result, _) = run(
            r#"
            function counter() {
                let n = 0;
                return () => ++n;
            }
            const next = counter();
            next(); next();
            let total = 0;
            for (let i = 0; i < 5; i++) {
                if (i === 3) continue;
                total += i;
            }
            const doubled = [1, 2, 3].map(x => x * 2).filter(x => x > 2);
            if (next() !== 3 || total !== 7 || doubled.join('-') !== '4-6') {
                throw new Error(`bad: ${total} ${doubled}`);
            }
            "#,
        );
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_response_bindings() {
        let (result, assertions) = run(
            r#"
            const { id, tags: [first] } = res.data;
            if (res.status !== 200) throw new Error('status');
            if (res.headers['content-type'] !== 'application/json') throw new Error('header');
            if (id !== 1 || first !== 'a') throw new Error('destructure');
            "#,
        );
        assert_eq!(result, Ok(()));
        assert_eq!(assertions, 0);
    }

    #[test]
    fn test_thrown_error_message() {
        let (result, _) = run("throw new Error('boom')");
        assert_eq!(result, Err(ScriptError::Thrown("boom".to_string())));
    }

    #[test]
    fn test_undeclared_reference() {
        let (result, _) = run("process.exit(1)");
        assert_eq!(result, Err(ScriptError::Reference("process".to_string())));
    }

    #[test]
    fn test_const_reassignment_rejected() {
        let (result, _) = run("const a = 1; a = 2;");
        assert!(matches!(result, Err(ScriptError::Type(_))));
    }

    #[test]
    fn test_bru_absent_without_authorization() {
        let (result, _) = run("bru.setVar('x', 1)");
        assert_eq!(result, Err(ScriptError::Reference("bru".to_string())));
    }

    #[test]
    fn test_bru_bound_to_variables() {
        let store = VariableStore::new();
        let program = parse_program("bru.setVar('token', res.data.id + 41); bru.setVar('seen', bru.hasVar('token'))").unwrap();
        let mut interp = Interpreter::new(&response(), Some(&store));
        interp.run(&program).unwrap();
        assert_eq!(store.get_var("token"), Some(json!(42)));
        assert_eq!(store.get_var("seen"), Some(json!(true)));
    }

    #[test]
    fn test_infinite_loop_hits_budget() {
        let (result, _) = run("while (true) {}");
        assert!(matches!(result, Err(ScriptError::Limit(_))));
    }

    #[test]
    fn test_runaway_recursion_hits_call_depth() {
        let (result, _) = run("function f(n) { return f(n + 1); } f(0);");
        assert_eq!(
            result,
            Err(ScriptError::Limit("Maximum call stack size exceeded".to_string()))
        );
    }

    #[test]
    fn test_string_helpers() {
        let (result, _) = run(
            r#"
            const s = '  Hello World  '.trim();
            const checks = [
                s.toLowerCase() === 'hello world',
                s.split(' ').length === 2,
                s.indexOf('World') === 6,
                s.slice(-5) === 'World',
                s.replace(/o/g, '0') === 'Hell0 W0rld',
                (1.005).toFixed(1) === '1.0',
                typeof missing === 'undefined',
                'id' in res.data,
            ];
            if (!checks.every(c => c)) throw new Error(checks.join(','));
            "#,
        );
        assert_eq!(result, Ok(()));
    }
}
