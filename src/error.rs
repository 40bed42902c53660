use thiserror::Error;

/// Main error type for the schema engine
#[derive(Error, Debug)]
pub enum CopilotError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Expression errors
    #[error("Expression error: {0}")]
    Expression(#[from] ExprError),

    // Schema authoring errors
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Unknown strategy type: {0}")]
    UnknownStrategyType(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for CopilotError
pub type Result<T> = std::result::Result<T, CopilotError>;

/// Errors raised while compiling or evaluating a formula expression
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("Unsafe expression: {reason}")]
    Unsafe { reason: String },

    #[error("Syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("{0} is not defined")]
    UnknownIdentifier(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("{function} expects {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: String,
        got: usize,
    },

    #[error("Type error: {0}")]
    Type(String),

    #[error("Invalid result: {0}")]
    InvalidResult(String),
}

impl ExprError {
    pub fn unsafe_expr(reason: impl Into<String>) -> Self {
        Self::Unsafe {
            reason: reason.into(),
        }
    }

    pub fn syntax(position: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            position,
            message: message.into(),
        }
    }

    pub fn is_unsafe(&self) -> bool {
        matches!(self, Self::Unsafe { .. })
    }
}

/// Structural errors detected when a schema is registered
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Schema {schema}: duplicate field key '{key}'")]
    DuplicateField { schema: String, key: String },

    #[error("Schema {schema}: field '{field}' depends on unknown field '{dependency}'")]
    MissingDependency {
        schema: String,
        field: String,
        dependency: String,
    },

    #[error("Schema {schema}: computed field '{field}' has no formula")]
    MissingFormula { schema: String, field: String },

    #[error("Schema {0} is already registered")]
    DuplicateSchema(String),

    #[error("Schema type must be non-empty")]
    EmptyType,
}
