//! Declarative schema types shared by the evaluator, compute engine,
//! validator and registry.
//!
//! Keys and wire names are camelCase because these structures travel to and
//! from the UI layer and AI integration layer as JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// Parameter values keyed by field key. `null` means "no value".
pub type ParamValues = BTreeMap<String, JsonValue>;

/// Sort key used for fields that do not declare an `order`.
pub const DEFAULT_FIELD_ORDER: i32 = 99;

// =============================================================================
// Field controls
// =============================================================================

/// UI control used to render a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlType {
    Slider,
    Number,
    Select,
    Toggle,
    ButtonGroup,
    LogicBuilder,
    HeatmapSlider,
}

impl ControlType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Slider => "slider",
            Self::Number => "number",
            Self::Select => "select",
            Self::Toggle => "toggle",
            Self::ButtonGroup => "button_group",
            Self::LogicBuilder => "logic_builder",
            Self::HeatmapSlider => "heatmap_slider",
        }
    }
}

impl fmt::Display for ControlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One choice of a select / button group control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub label: String,
    pub value: JsonValue,
}

/// Colored band of a heatmap slider (e.g. RSI oversold zone).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapZone {
    pub from: f64,
    pub to: f64,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Type-specific control configuration. Every attribute is optional; each
/// control reads the ones it understands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<HeatmapZone>,
}

impl FieldConfig {
    /// Numeric range with a step.
    pub fn range(min: f64, max: f64, step: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            step: Some(step),
            ..Default::default()
        }
    }

    /// Lower bound only.
    pub fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            ..Default::default()
        }
    }

    /// Choices given as `(label, value)` string pairs.
    pub fn options(options: &[(&str, &str)]) -> Self {
        Self {
            options: options
                .iter()
                .map(|(label, value)| SelectOption {
                    label: (*label).to_string(),
                    value: JsonValue::from(*value),
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_step(mut self, step: f64) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_zone(mut self, from: f64, to: f64, color: &str, label: &str) -> Self {
        self.zones.push(HeatmapZone {
            from,
            to,
            color: color.to_string(),
            label: Some(label.to_string()),
        });
        self
    }
}

// =============================================================================
// Constraints and validators
// =============================================================================

/// Comparison used by an inter-field constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintRule {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl ConstraintRule {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    pub fn holds(self, value: f64, other: f64) -> bool {
        match self {
            Self::Gt => value > other,
            Self::Gte => value >= other,
            Self::Lt => value < other,
            Self::Lte => value <= other,
        }
    }
}

/// "This field's value must be `rule` the value of `field`."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConstraint {
    #[serde(rename = "type")]
    pub rule: ConstraintRule,
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FieldConstraint {
    pub fn new(rule: ConstraintRule, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule,
            field: field.into(),
            message: Some(message.into()),
        }
    }
}

/// Whether a failed validator blocks acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Named cross-field rule evaluated against the fully resolved values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaValidator {
    pub name: String,
    pub expression: String,
    pub message: String,
    pub severity: Severity,
}

impl SchemaValidator {
    pub fn error(name: &str, expression: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            expression: expression.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        }
    }

    pub fn warning(name: &str, expression: &str, message: &str) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(name, expression, message)
        }
    }
}

// =============================================================================
// ParamSchemaField
// =============================================================================

fn default_level() -> u8 {
    1
}

fn default_group() -> String {
    "basic".to_string()
}

/// One declared strategy parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamSchemaField {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub control: ControlType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<JsonValue>,
    #[serde(default)]
    pub required: bool,
    /// 1 = core (always shown), 2 = advanced (collapsible)
    #[serde(default = "default_level")]
    pub level: u8,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,
    #[serde(default)]
    pub config: FieldConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<FieldConstraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_when: Option<String>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub computed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl ParamSchemaField {
    pub fn new(key: &str, label: &str, control: ControlType) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            control,
            default_value: None,
            required: false,
            level: default_level(),
            group: default_group(),
            order: None,
            config: FieldConfig::default(),
            description: None,
            constraints: Vec::new(),
            show_when: None,
            readonly: false,
            computed: false,
            formula: None,
            depends_on: Vec::new(),
        }
    }

    /// Read-only field derived from `formula`.
    pub fn computed(key: &str, label: &str, formula: &str, depends_on: &[&str]) -> Self {
        Self {
            computed: true,
            readonly: true,
            formula: Some(formula.to_string()),
            depends_on: depends_on.iter().map(|k| k.to_string()).collect(),
            ..Self::new(key, label, ControlType::Number)
        }
    }

    pub fn default_value(mut self, value: JsonValue) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn advanced(mut self) -> Self {
        self.level = 2;
        self
    }

    pub fn group(mut self, group: &str) -> Self {
        self.group = group.to_string();
        self
    }

    pub fn order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn config(mut self, config: FieldConfig) -> Self {
        self.config = config;
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn constraint(mut self, constraint: FieldConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn show_when(mut self, expression: &str) -> Self {
        self.show_when = Some(expression.to_string());
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Formula of a computed field, if it has a non-empty one.
    pub fn active_formula(&self) -> Option<&str> {
        if !self.computed {
            return None;
        }
        self.formula
            .as_deref()
            .map(str::trim)
            .filter(|formula| !formula.is_empty())
    }

    pub fn sort_order(&self, default_order: i32) -> i32 {
        self.order.unwrap_or(default_order)
    }
}

// =============================================================================
// StrategySchema
// =============================================================================

/// Declarative description of one strategy type's parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategySchema {
    #[serde(rename = "type")]
    pub strategy_type: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    pub fields: Vec<ParamSchemaField>,
    #[serde(default)]
    pub validators: Vec<SchemaValidator>,
    #[serde(default)]
    pub recommended_symbols: Vec<String>,
    #[serde(default)]
    pub recommended_timeframes: Vec<String>,
}

impl StrategySchema {
    pub fn new(strategy_type: &str, name: &str, version: &str) -> Self {
        Self {
            strategy_type: strategy_type.to_string(),
            name: name.to_string(),
            description: String::new(),
            version: version.to_string(),
            fields: Vec::new(),
            validators: Vec::new(),
            recommended_symbols: Vec::new(),
            recommended_timeframes: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_field(mut self, field: ParamSchemaField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_validator(mut self, validator: SchemaValidator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn with_symbols(mut self, symbols: &[&str]) -> Self {
        self.recommended_symbols = symbols.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_timeframes(mut self, timeframes: &[&str]) -> Self {
        self.recommended_timeframes = timeframes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn field(&self, key: &str) -> Option<&ParamSchemaField> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn computed_fields(&self) -> impl Iterator<Item = &ParamSchemaField> {
        self.fields.iter().filter(|f| f.computed)
    }

    /// Required fields the caller must supply (computed fields excluded).
    pub fn required_fields(&self) -> impl Iterator<Item = &ParamSchemaField> {
        self.fields.iter().filter(|f| f.required && !f.computed)
    }
}

// =============================================================================
// ComputeContext
// =============================================================================

/// Market / account values injected into every formula environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_price: Option<f64>,
    #[serde(default, rename = "high24h", skip_serializing_if = "Option::is_none")]
    pub high_24h: Option<f64>,
    #[serde(default, rename = "low24h", skip_serializing_if = "Option::is_none")]
    pub low_24h: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
}

impl ComputeContext {
    pub fn with_price(price: f64) -> Self {
        Self {
            current_price: Some(price),
            ..Default::default()
        }
    }

    /// Flattened shortcuts exposed to formulas; absent values read as 0.
    pub fn shortcuts(&self) -> [(&'static str, f64); 4] {
        [
            ("currentPrice", self.current_price.unwrap_or(0.0)),
            ("high24h", self.high_24h.unwrap_or(0.0)),
            ("low24h", self.low_24h.unwrap_or(0.0)),
            ("balance", self.balance.unwrap_or(0.0)),
        ]
    }

    /// Only the values the caller actually supplied, for the `ctx` namespace.
    pub fn provided(&self) -> Vec<(&'static str, f64)> {
        [
            ("currentPrice", self.current_price),
            ("high24h", self.high_24h),
            ("low24h", self.low_24h),
            ("balance", self.balance),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
    }
}

// =============================================================================
// Resolution input / output
// =============================================================================

/// Sparse key/value proposal coming from the AI integration layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiProposal {
    pub strategy_type: String,
    #[serde(default)]
    pub values: ParamValues,
}

impl AiProposal {
    pub fn new(strategy_type: &str, values: ParamValues) -> Self {
        Self {
            strategy_type: strategy_type.to_string(),
            values,
        }
    }
}

/// Parameter ready for the UI layer to render. Built fresh on every resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedParam {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub control: ControlType,
    pub value: JsonValue,
    pub level: u8,
    pub group: String,
    pub config: FieldConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Vec<FieldConstraint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
    pub disabled: bool,
}

impl ResolvedParam {
    pub fn from_field(field: &ParamSchemaField, value: JsonValue) -> Self {
        Self {
            key: field.key.clone(),
            label: field.label.clone(),
            control: field.control,
            value,
            level: field.level,
            group: field.group.clone(),
            config: field.config.clone(),
            constraints: (!field.constraints.is_empty()).then(|| field.constraints.clone()),
            description: field.description.clone(),
            required: field.required,
            disabled: field.readonly || field.computed,
        }
    }
}

/// Outcome of resolving an AI proposal against a schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResult {
    pub strategy_type: String,
    pub params: Vec<ResolvedParam>,
    /// Every resolved value, hidden fields included, for round-trip editing.
    pub values: ParamValues,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ResolveResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn param(&self, key: &str) -> Option<&ResolvedParam> {
        self.params.iter().find(|p| p.key == key)
    }

    pub fn value(&self, key: &str) -> Option<&JsonValue> {
        self.values.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_wire_format() {
        let field: ParamSchemaField = serde_json::from_value(json!({
            "key": "gridCount",
            "label": "网格数量",
            "type": "slider",
            "defaultValue": 10,
            "required": true,
            "config": { "min": 2, "max": 200, "step": 1 },
            "showWhen": "enabled === true"
        }))
        .unwrap();

        assert_eq!(field.control, ControlType::Slider);
        assert_eq!(field.level, 1);
        assert_eq!(field.group, "basic");
        assert_eq!(field.order, None);
        assert_eq!(field.sort_order(DEFAULT_FIELD_ORDER), 99);
        assert_eq!(field.config.max, Some(200.0));
        assert_eq!(field.show_when.as_deref(), Some("enabled === true"));
        assert!(!field.computed);
    }

    #[test]
    fn test_computed_field_is_disabled() {
        let field = ParamSchemaField::computed("spacing", "间距", "a / b", &["a", "b"]);
        assert_eq!(field.active_formula(), Some("a / b"));

        let param = ResolvedParam::from_field(&field, json!(1));
        assert!(param.disabled);
        assert!(param.constraints.is_none());
    }

    #[test]
    fn test_blank_formula_is_inactive() {
        let mut field = ParamSchemaField::computed("x", "X", "  ", &[]);
        assert_eq!(field.active_formula(), None);
        field.computed = false;
        field.formula = Some("1 + 1".to_string());
        assert_eq!(field.active_formula(), None);
    }

    #[test]
    fn test_context_wire_names() {
        let ctx: ComputeContext =
            serde_json::from_value(json!({ "currentPrice": 100.5, "high24h": 110 })).unwrap();
        assert_eq!(ctx.current_price, Some(100.5));
        assert_eq!(ctx.high_24h, Some(110.0));
        assert_eq!(ctx.provided().len(), 2);
        assert_eq!(ctx.shortcuts()[3], ("balance", 0.0));
    }

    #[test]
    fn test_constraint_rules() {
        assert!(ConstraintRule::Gt.holds(2.0, 1.0));
        assert!(!ConstraintRule::Gt.holds(1.0, 1.0));
        assert!(ConstraintRule::Lte.holds(1.0, 1.0));
        assert_eq!(ConstraintRule::Gte.symbol(), ">=");
    }
}
