//! Assertion sandbox
//!
//! Test code attached to a request runs in a small embedded interpreter
//! rather than a host language runtime. A script can reach exactly four
//! things: the response view (`res`), the expectation builder (`expect`),
//! the schema validator (`tv4`) and, only when execution was authorized, the
//! variable binding (`bru`). `test(name, fn)` groups assertions and passes
//! the same capabilities to `fn`.
//!
//! ```text
//! source ──rewrite_legacy_accessors──▶ lexer ──▶ parser ──▶ Interpreter
//!                                                              │
//!                                        res / expect / tv4 / bru
//! ```

mod ast;
mod error;
mod expect;
mod interp;
mod lexer;
mod parser;
pub mod schema;
mod value;

use std::sync::OnceLock;

use regex::Regex;

pub use error::{ScriptError, ScriptResult};
pub use interp::{MAX_CALL_DEPTH, MAX_STEPS};
pub use parser::MAX_NESTING;

use crate::transport::ResponseView;
use crate::variables::{compile_pattern, Variables};
use interp::Interpreter;
use parser::parse_program;

/// What running one script produced
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxOutcome {
    /// `expect(...)` invocations, counted even when a later one threw
    pub assertions: u64,

    /// First failure, if any
    pub result: ScriptResult<()>,
}

impl SandboxOutcome {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

fn legacy_accessors() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"res\.getStatus\(\)", "res.status"),
            (r"res\.getBody\(\)", "res.data"),
            (r"res\.getHeaders\(\)", "res.headers"),
            (r"res\.getHeader\('([^']+)'\)", "res.headers['${1}']"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Some((compile_pattern(pattern)?, replacement)))
        .collect()
    })
}

/// Rewrite the accessor calls of older collections into plain field access:
/// `res.getStatus()`, `res.getBody()`, `res.getHeaders()` and
/// `res.getHeader('x')`. Purely textual.
pub fn rewrite_legacy_accessors(source: &str) -> String {
    let mut rewritten = source.to_string();
    for (pattern, replacement) in legacy_accessors() {
        let next = pattern.replace_all(&rewritten, *replacement).into_owned();
        rewritten = next;
    }
    rewritten
}

/// Run `source` against `response`.
///
/// `vars` backs `bru.setVar` / `bru.getVar`; pass `None` to leave `bru`
/// unbound.
pub fn evaluate(
    source: &str,
    response: &ResponseView,
    vars: Option<&dyn Variables>,
) -> SandboxOutcome {
    let source = rewrite_legacy_accessors(source);
    let program = match parse_program(&source) {
        Ok(program) => program,
        Err(e) => {
            return SandboxOutcome {
                assertions: 0,
                result: Err(e),
            }
        }
    };

    let mut interpreter = Interpreter::new(response, vars);
    let result = interpreter.run(&program);
    SandboxOutcome {
        assertions: interpreter.assertions(),
        result,
    }
}
