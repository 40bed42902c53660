pub mod cli;
pub mod config;
pub mod error;
pub mod schema;

pub use config::AppConfig;
pub use error::{CopilotError, ExprError, Result, SchemaError};
pub use schema::{
    compute_all_derived_fields, compute_field_value, detect_strategy_type, evaluate_condition,
    validate_field_value, validate_schema, AiProposal, ComputeContext, ComputeOutcome,
    FieldComputeStatus, ParamSchemaField, ResolveResult, ResolvedParam, SchemaRegistry,
    StrategyKind, StrategySchema,
};
