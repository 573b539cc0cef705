use thiserror::Error;

pub type ScriptResult<T> = std::result::Result<T, ScriptError>;

/// Why an assertion script stopped
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("SyntaxError: {message} ({line}:{column})")]
    Syntax {
        message: String,
        line: u32,
        column: u32,
    },

    #[error("ReferenceError: {0} is not defined")]
    Reference(String),

    #[error("TypeError: {0}")]
    Type(String),

    /// A failed expectation, shown the way chai prints it
    #[error("{0}")]
    Assertion(String),

    /// A value raised with `throw`
    #[error("{0}")]
    Thrown(String),

    #[error("RangeError: {0}")]
    Limit(String),
}

impl ScriptError {
    pub fn syntax(message: impl Into<String>, line: u32, column: u32) -> Self {
        ScriptError::Syntax {
            message: message.into(),
            line,
            column,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        ScriptError::Type(message.into())
    }

    /// Short class name used in result entries
    pub fn kind(&self) -> &'static str {
        match self {
            ScriptError::Syntax { .. } => "SyntaxError",
            ScriptError::Reference(_) => "ReferenceError",
            ScriptError::Type(_) => "TypeError",
            ScriptError::Assertion(_) => "AssertionError",
            ScriptError::Thrown(_) => "Error",
            ScriptError::Limit(_) => "RangeError",
        }
    }
}
