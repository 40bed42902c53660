//! Strategy parameter schemas and the compute engine.
//!
//! - [`expr`]: restricted formula language
//! - [`compute`]: computed fields, iterated to a fixpoint
//! - [`validator`]: cross-field validators, `showWhen`, single-field checks
//! - [`definitions`]: built-in grid / RSI / DCA schemas
//! - [`registry`]: catalog plus the resolve pipeline
//! - [`detect`]: free-text strategy type heuristic

pub mod compute;
pub mod definitions;
pub mod detect;
pub mod expr;
pub mod prompt;
pub mod registry;
pub mod types;
pub mod validator;

pub use compute::{
    compute_all_derived_fields, compute_field_value, ComputeEngine, ComputeOutcome,
    FieldComputeStatus, MAX_COMPUTE_PASSES,
};
pub use definitions::builtin_schemas;
pub use detect::{detect_strategy_type, StrategyKind};
pub use registry::{RegistryOptions, SchemaRegistry};
pub use types::{
    AiProposal, ComputeContext, ConstraintRule, ControlType, FieldConfig, FieldConstraint,
    ParamSchemaField, ParamValues, ResolveResult, ResolvedParam, SchemaValidator, Severity,
    StrategySchema,
};
pub use validator::{
    evaluate_condition, validate_field_value, validate_schema, FieldRule, FieldValidation,
    SchemaValidation,
};
