//! Schema registry: catalog of strategy schemas and the resolution pipeline.
//!
//! ```text
//! AiProposal ─► seed values (proposal, else default)
//!            ─► ComputeEngine (computed fields)
//!            ─► validate_schema (cross-field rules)
//!            ─► showWhen filter ─► sort ─► Vec<ResolvedParam>
//! ```
//!
//! The registry is an explicit object built once at startup and shared by
//! reference. Schemas are immutable after registration; every resolve call
//! works on fresh local maps.

use crate::error::{CopilotError, Result, SchemaError};
use crate::schema::compute::{ComputeEngine, MAX_COMPUTE_PASSES};
use crate::schema::definitions::builtin_schemas;
use crate::schema::expr::CompiledExpression;
use crate::schema::prompt::schema_to_prompt;
use crate::schema::types::{
    AiProposal, ComputeContext, ParamSchemaField, ParamValues, ResolveResult, ResolvedParam,
    StrategySchema, DEFAULT_FIELD_ORDER,
};
use crate::schema::validator::{evaluate_condition, is_blank, validate_schema};
use anyhow::Context;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Names formulas may read without declaring them in `dependsOn`.
const CONTEXT_NAMES: [&str; 5] = ["ctx", "currentPrice", "high24h", "low24h", "balance"];

/// Tunables of the resolution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryOptions {
    pub max_passes: usize,
    pub default_order: i32,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            max_passes: MAX_COMPUTE_PASSES,
            default_order: DEFAULT_FIELD_ORDER,
        }
    }
}

#[derive(Debug, Default)]
struct Catalog {
    by_type: HashMap<String, Arc<StrategySchema>>,
    /// Registration order.
    types: Vec<String>,
}

#[derive(Debug)]
pub struct SchemaRegistry {
    catalog: RwLock<Catalog>,
    engine: ComputeEngine,
    default_order: i32,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    /// Empty registry with default options.
    pub fn new() -> Self {
        Self::with_options(RegistryOptions::default())
    }

    pub fn with_options(options: RegistryOptions) -> Self {
        Self {
            catalog: RwLock::new(Catalog::default()),
            engine: ComputeEngine::new(options.max_passes),
            default_order: options.default_order,
        }
    }

    /// Registry holding the built-in schemas.
    pub fn with_builtins() -> std::result::Result<Self, SchemaError> {
        Self::from_schemas(RegistryOptions::default(), builtin_schemas())
    }

    pub fn from_schemas(
        options: RegistryOptions,
        schemas: impl IntoIterator<Item = StrategySchema>,
    ) -> std::result::Result<Self, SchemaError> {
        let registry = Self::with_options(options);
        for schema in schemas {
            registry.register(schema)?;
        }
        Ok(registry)
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Validate and insert a schema. Structural problems fail here so they
    /// surface at startup rather than during resolution.
    pub fn register(&self, schema: StrategySchema) -> std::result::Result<(), SchemaError> {
        if schema.strategy_type.trim().is_empty() {
            return Err(SchemaError::EmptyType);
        }
        check_structure(&schema)?;
        lint_expressions(&schema);

        let mut catalog = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
        if catalog.by_type.contains_key(&schema.strategy_type) {
            return Err(SchemaError::DuplicateSchema(schema.strategy_type));
        }

        info!(
            strategy_type = %schema.strategy_type,
            version = %schema.version,
            fields = schema.fields.len(),
            validators = schema.validators.len(),
            "registered strategy schema"
        );
        catalog.types.push(schema.strategy_type.clone());
        catalog
            .by_type
            .insert(schema.strategy_type.clone(), Arc::new(schema));
        Ok(())
    }

    /// Register one schema, or an array of schemas, from a JSON file.
    pub fn register_from_path(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading schema file {}", path.display()))?;
        let raw: JsonValue = serde_json::from_str(&text)
            .with_context(|| format!("parsing schema file {}", path.display()))?;
        let schemas: Vec<StrategySchema> = match raw {
            JsonValue::Array(_) => serde_json::from_value(raw)?,
            single => vec![serde_json::from_value(single)?],
        };

        let count = schemas.len();
        for schema in schemas {
            self.register(schema)?;
        }
        debug!(path = %path.display(), count, "loaded schema file");
        Ok(count)
    }

    /// Register every `*.json` file in `dir`, in file name order.
    pub fn load_dir(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("reading schema directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && path.extension().map(|e| e == "json").unwrap_or(false) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut total = 0;
        for path in &paths {
            total += self.register_from_path(path)?;
        }
        info!(dir = %dir.display(), files = paths.len(), schemas = total, "loaded schema directory");
        Ok(total)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn get(&self, strategy_type: &str) -> Option<Arc<StrategySchema>> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_type
            .get(strategy_type)
            .cloned()
    }

    /// All schemas in registration order.
    pub fn get_all(&self) -> Vec<Arc<StrategySchema>> {
        let catalog = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
        catalog
            .types
            .iter()
            .filter_map(|t| catalog.by_type.get(t).cloned())
            .collect()
    }

    pub fn has(&self, strategy_type: &str) -> bool {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_type
            .contains_key(strategy_type)
    }

    pub fn get_types(&self) -> Vec<String> {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .types
            .clone()
    }

    pub fn len(&self) -> usize {
        self.catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .types
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fields the caller must supply. Empty for unknown types.
    pub fn get_required_fields(&self, strategy_type: &str) -> Vec<ParamSchemaField> {
        self.get(strategy_type)
            .map(|schema| schema.required_fields().cloned().collect())
            .unwrap_or_default()
    }

    /// Every declared field. Empty for unknown types.
    pub fn get_fields(&self, strategy_type: &str) -> Vec<ParamSchemaField> {
        self.get(strategy_type)
            .map(|schema| schema.fields.clone())
            .unwrap_or_default()
    }

    pub fn to_ai_prompt(&self, strategy_type: &str) -> Result<String> {
        self.get(strategy_type)
            .map(|schema| schema_to_prompt(&schema))
            .ok_or_else(|| CopilotError::UnknownStrategyType(strategy_type.to_string()))
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve a sparse AI proposal into a complete, validated parameter
    /// list. Never fails: problems are reported in `errors` / `warnings`.
    pub fn resolve_params(&self, proposal: &AiProposal, context: &ComputeContext) -> ResolveResult {
        match self.get(&proposal.strategy_type) {
            Some(schema) => self.resolve_schema(&schema, &proposal.values, context),
            None => unknown_type(&proposal.strategy_type),
        }
    }

    /// Parameter list built from defaults only, for a fresh form.
    pub fn get_default_params(
        &self,
        strategy_type: &str,
        context: &ComputeContext,
    ) -> Vec<ResolvedParam> {
        match self.get(strategy_type) {
            Some(schema) => {
                self.resolve_schema(&schema, &ParamValues::new(), context)
                    .params
            }
            None => Vec::new(),
        }
    }

    /// Re-resolve `previous` with one field changed.
    ///
    /// Edits to computed, read-only or undeclared fields are refused: the
    /// previous values are resolved again and an error entry is added.
    pub fn apply_edit(
        &self,
        previous: &ResolveResult,
        key: &str,
        value: JsonValue,
        context: &ComputeContext,
    ) -> ResolveResult {
        let schema = match self.get(&previous.strategy_type) {
            Some(schema) => schema,
            None => return unknown_type(&previous.strategy_type),
        };

        let rejection = match schema.field(key) {
            None => Some(format!("未知参数: {}", key)),
            Some(field) if field.computed || field.readonly => {
                Some(format!("参数 {} 为只读，不能修改", field.label))
            }
            Some(_) => None,
        };

        match rejection {
            Some(message) => {
                debug!(strategy_type = %schema.strategy_type, key, "edit rejected");
                let mut result = self.resolve_schema(&schema, &previous.values, context);
                result.errors.insert(0, message);
                result
            }
            None => {
                let mut values = previous.values.clone();
                values.insert(key.to_string(), value);
                self.resolve_schema(&schema, &values, context)
            }
        }
    }

    /// Seed, compute, validate, filter and order one schema's values.
    ///
    /// `order` ranks fields inside their `group`. Groups keep the position
    /// of their first field in declaration order, so a later group with
    /// lower `order` values still follows the earlier groups.
    fn resolve_schema(
        &self,
        schema: &StrategySchema,
        provided: &ParamValues,
        context: &ComputeContext,
    ) -> ResolveResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // 1. declared values, else defaults
        let mut seeded = ParamValues::new();
        for field in &schema.fields {
            let supplied = if field.computed {
                None
            } else {
                provided.get(&field.key).filter(|v| !v.is_null()).cloned()
            };
            let value = supplied
                .or_else(|| field.default_value.clone())
                .unwrap_or(JsonValue::Null);

            if field.required && !field.computed && is_blank(&value) {
                errors.push(format!("缺少必填参数: {}", field.label));
            }
            seeded.insert(field.key.clone(), value);
        }

        // 2. computed fields
        let outcome = self.engine.compute(&schema.fields, &seeded, context);
        if !outcome.converged {
            warnings.push(format!(
                "计算字段在 {} 轮后仍未收敛，可能存在循环依赖",
                outcome.passes
            ));
        }
        for (key, error) in outcome.failures() {
            debug!(strategy_type = %schema.strategy_type, field = key, %error, "computed field unresolved");
        }
        let values = outcome.values;

        // 3. cross-field validators
        let validation = validate_schema(&schema.validators, &values, context);
        errors.extend(validation.errors);
        warnings.extend(validation.warnings);

        // 4. visibility, field-level checks, ordering
        let mut visible: Vec<&ParamSchemaField> = schema
            .fields
            .iter()
            .filter(|field| match &field.show_when {
                Some(condition) => evaluate_condition(condition, &values, context),
                None => true,
            })
            .collect();

        for field in visible.iter().filter(|f| !f.computed) {
            warnings.extend(field_warnings(schema, field, &values));
        }

        let group_rank = group_ranks(schema);
        visible.sort_by_key(|field| {
            (
                group_rank.get(field.group.as_str()).copied().unwrap_or(usize::MAX),
                field.sort_order(self.default_order),
            )
        });

        let params = visible
            .into_iter()
            .map(|field| {
                let value = values.get(&field.key).cloned().unwrap_or(JsonValue::Null);
                ResolvedParam::from_field(field, value)
            })
            .collect();

        debug!(
            strategy_type = %schema.strategy_type,
            errors = errors.len(),
            warnings = warnings.len(),
            passes = outcome.passes,
            "resolved parameters"
        );

        ResolveResult {
            strategy_type: schema.strategy_type.clone(),
            params,
            values,
            errors,
            warnings,
        }
    }
}

fn unknown_type(strategy_type: &str) -> ResolveResult {
    debug!(strategy_type, "resolve requested for unknown strategy type");
    ResolveResult {
        strategy_type: strategy_type.to_string(),
        errors: vec![format!("未知的策略类型: {}", strategy_type)],
        ..Default::default()
    }
}

/// Position of each group's first appearance in declaration order.
fn group_ranks(schema: &StrategySchema) -> HashMap<&str, usize> {
    let mut ranks = HashMap::new();
    for field in &schema.fields {
        let next = ranks.len();
        ranks.entry(field.group.as_str()).or_insert(next);
    }
    ranks
}

/// Config range and inter-field constraint violations of one field.
fn field_warnings(
    schema: &StrategySchema,
    field: &ParamSchemaField,
    values: &ParamValues,
) -> Vec<String> {
    let mut warnings = Vec::new();
    let value = match values.get(&field.key).and_then(JsonValue::as_f64) {
        Some(value) => value,
        None => return warnings,
    };

    if let Some(min) = field.config.min {
        if value < min {
            warnings.push(format!("{} 不能小于 {}", field.label, min));
        }
    }
    if let Some(max) = field.config.max {
        if value > max {
            warnings.push(format!("{} 不能大于 {}", field.label, max));
        }
    }

    for constraint in &field.constraints {
        let other = match values.get(&constraint.field).and_then(JsonValue::as_f64) {
            Some(other) => other,
            None => continue,
        };
        if !constraint.rule.holds(value, other) {
            let message = constraint.message.clone().unwrap_or_else(|| {
                let other_label = schema
                    .field(&constraint.field)
                    .map(|f| f.label.as_str())
                    .unwrap_or(constraint.field.as_str());
                format!(
                    "{} 必须 {} {}",
                    field.label,
                    constraint.rule.symbol(),
                    other_label
                )
            });
            warnings.push(message);
        }
    }
    warnings
}

/// Fail-fast structural checks run before a schema is accepted.
fn check_structure(schema: &StrategySchema) -> std::result::Result<(), SchemaError> {
    let mut keys = HashSet::new();
    for field in &schema.fields {
        if !keys.insert(field.key.as_str()) {
            return Err(SchemaError::DuplicateField {
                schema: schema.strategy_type.clone(),
                key: field.key.clone(),
            });
        }
    }

    for field in schema.computed_fields() {
        if field.active_formula().is_none() {
            return Err(SchemaError::MissingFormula {
                schema: schema.strategy_type.clone(),
                field: field.key.clone(),
            });
        }
        if let Some(missing) = field.depends_on.iter().find(|d| !keys.contains(d.as_str())) {
            return Err(SchemaError::MissingDependency {
                schema: schema.strategy_type.clone(),
                field: field.key.clone(),
                dependency: missing.clone(),
            });
        }
    }
    Ok(())
}

/// Compile every expression of a schema once and log what looks wrong.
/// Nothing here rejects the schema: broken expressions soft-fail at
/// resolve time.
fn lint_expressions(schema: &StrategySchema) {
    let strategy_type = schema.strategy_type.as_str();

    for field in &schema.fields {
        if let Some(formula) = field.active_formula() {
            match CompiledExpression::compile(formula) {
                Ok(compiled) => {
                    for name in compiled.identifiers() {
                        let declared = field.depends_on.contains(&name)
                            || CONTEXT_NAMES.contains(&name.as_str());
                        if !declared {
                            warn!(
                                strategy_type,
                                field = %field.key,
                                identifier = %name,
                                "formula reads a key missing from dependsOn"
                            );
                        }
                    }
                }
                Err(error) => {
                    warn!(strategy_type, field = %field.key, %error, "formula does not compile")
                }
            }
        }
        if let Some(condition) = &field.show_when {
            if let Err(error) = CompiledExpression::compile(condition) {
                warn!(strategy_type, field = %field.key, %error, "showWhen does not compile");
            }
        }
    }

    for validator in &schema.validators {
        if let Err(error) = CompiledExpression::compile(&validator.expression) {
            warn!(strategy_type, validator = %validator.name, %error, "validator does not compile");
        }
    }
}
