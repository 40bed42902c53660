//! Schema-level validation
//!
//! Cross-field validators and `showWhen` conditions run through the formula
//! evaluator; single-field checks are plain structural rules.

use crate::schema::expr::{CompiledExpression, Environment};
use crate::schema::types::{ComputeContext, ParamValues, SchemaValidator, Severity};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

// =============================================================================
// Cross-field validators
// =============================================================================

/// Outcome of running a schema's validators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Evaluate every validator against fully resolved values.
///
/// A validator whose expression cannot run is reported as a warning naming
/// the validator and never blocks acceptance.
pub fn validate_schema(
    validators: &[SchemaValidator],
    values: &ParamValues,
    context: &ComputeContext,
) -> SchemaValidation {
    let env = Environment::new(values, context);
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for validator in validators {
        let passed = CompiledExpression::compile(&validator.expression)
            .and_then(|expression| expression.evaluate_bool(&env));

        match passed {
            Ok(true) => {}
            Ok(false) => {
                debug!(validator = %validator.name, severity = ?validator.severity, "validator failed");
                match validator.severity {
                    Severity::Error => errors.push(validator.message.clone()),
                    Severity::Warning => warnings.push(validator.message.clone()),
                }
            }
            Err(error) => {
                warn!(validator = %validator.name, %error, "validator execution failed");
                warnings.push(format!("校验规则执行失败: {} ({})", validator.name, error));
            }
        }
    }

    SchemaValidation {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Evaluate a `showWhen` condition. Any failure counts as visible.
pub fn evaluate_condition(expression: &str, values: &ParamValues, context: &ComputeContext) -> bool {
    let env = Environment::new(values, context);
    match CompiledExpression::compile(expression).and_then(|e| e.evaluate_bool(&env)) {
        Ok(visible) => visible,
        Err(error) => {
            debug!(expression, %error, "condition failed, showing field");
            true
        }
    }
}

// =============================================================================
// Single-field validation
// =============================================================================

/// Structural rules for one UI input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRule {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub pattern: Option<String>,
}

impl FieldRule {
    pub fn required() -> Self {
        Self {
            required: true,
            ..Default::default()
        }
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValidation {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FieldValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn fail(error: String) -> Self {
        Self {
            valid: false,
            error: Some(error),
        }
    }
}

/// `null` or a blank string.
pub(crate) fn is_blank(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Check one value: required, numeric range, then regex pattern.
///
/// Range applies to numbers only, the pattern to strings only. Empty
/// optional values pass.
pub fn validate_field_value(key: &str, value: &JsonValue, rule: &FieldRule) -> FieldValidation {
    if is_blank(value) {
        return if rule.required {
            FieldValidation::fail("此字段为必填项".to_string())
        } else {
            FieldValidation::ok()
        };
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = rule.min {
            if n < min {
                return FieldValidation::fail(format!("值不能小于 {}", min));
            }
        }
        if let Some(max) = rule.max {
            if n > max {
                return FieldValidation::fail(format!("值不能大于 {}", max));
            }
        }
    }

    if let (Some(pattern), JsonValue::String(text)) = (rule.pattern.as_deref(), value) {
        match Regex::new(pattern) {
            Ok(re) if re.is_match(text) => {}
            Ok(_) => return FieldValidation::fail("格式不正确".to_string()),
            Err(error) => {
                warn!(field = key, pattern, %error, "invalid validation pattern");
                return FieldValidation::fail(format!("无效的校验规则: {}", pattern));
            }
        }
    }

    FieldValidation::ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(pairs: &[(&str, JsonValue)]) -> ParamValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn rsi_validators() -> Vec<SchemaValidator> {
        vec![
            SchemaValidator::error(
                "rsiThresholdsValid",
                "rsiOverbought - rsiOversold >= 20",
                "超买阈值必须比超卖阈值至少高 20",
            ),
            SchemaValidator::warning(
                "rsiRangeValid",
                "rsiOversold >= 10 && rsiOverbought <= 90",
                "RSI 阈值过于极端",
            ),
        ]
    }

    #[test]
    fn test_validator_severity() {
        let ctx = ComputeContext::default();
        let failing = values(&[("rsiOverbought", json!(65)), ("rsiOversold", json!(60))]);
        let result = validate_schema(&rsi_validators(), &failing, &ctx);
        assert!(!result.valid);
        assert_eq!(result.errors, vec!["超买阈值必须比超卖阈值至少高 20"]);
        assert!(result.warnings.is_empty());

        let extreme = values(&[("rsiOverbought", json!(95)), ("rsiOversold", json!(5))]);
        let result = validate_schema(&rsi_validators(), &extreme, &ctx);
        assert!(result.valid);
        assert_eq!(result.warnings, vec!["RSI 阈值过于极端"]);

        let healthy = values(&[("rsiOverbought", json!(70)), ("rsiOversold", json!(30))]);
        let result = validate_schema(&rsi_validators(), &healthy, &ctx);
        assert!(result.valid);
        assert!(result.errors.is_empty() && result.warnings.is_empty());
    }

    #[test]
    fn test_broken_validator_only_warns() {
        let validators = vec![
            SchemaValidator::error("sneaky", "window.alert(1)", "never shown"),
            SchemaValidator::error("typo", "upperBnd > 0", "never shown"),
        ];
        let result = validate_schema(&validators, &ParamValues::new(), &ComputeContext::default());
        assert!(result.valid);
        assert!(result.errors.is_empty());
        assert_eq!(result.warnings.len(), 2);
        assert!(result.warnings[0].contains("sneaky"));
        assert!(result.warnings[1].contains("typo"));
    }

    #[test]
    fn test_validator_sees_context() {
        let validators = vec![SchemaValidator::warning(
            "priceInRange",
            "currentPrice <= 0 || (currentPrice >= lowerBound && currentPrice <= upperBound)",
            "当前价格不在网格区间内",
        )];
        let vals = values(&[("upperBound", json!(110)), ("lowerBound", json!(100))]);
        let inside = validate_schema(&validators, &vals, &ComputeContext::with_price(105.0));
        assert!(inside.warnings.is_empty());
        let outside = validate_schema(&validators, &vals, &ComputeContext::with_price(120.0));
        assert_eq!(outside.warnings, vec!["当前价格不在网格区间内"]);
        let unknown = validate_schema(&validators, &vals, &ComputeContext::default());
        assert!(unknown.warnings.is_empty());
    }

    #[test]
    fn test_evaluate_condition() {
        let ctx = ComputeContext::default();
        let on = values(&[("flag", json!(true))]);
        let off = values(&[("flag", json!(false))]);
        assert!(evaluate_condition("flag === true", &on, &ctx));
        assert!(!evaluate_condition("flag === true", &off, &ctx));
        // fails open
        assert!(evaluate_condition("missing.value", &off, &ctx));
        assert!(evaluate_condition("this.flag", &off, &ctx));
        assert!(evaluate_condition("flag ===", &off, &ctx));
    }

    #[test]
    fn test_validate_required() {
        let rule = FieldRule::required();
        assert!(!validate_field_value("name", &JsonValue::Null, &rule).valid);
        assert!(!validate_field_value("name", &json!("  "), &rule).valid);
        assert!(validate_field_value("name", &json!("grid"), &rule).valid);
        assert!(validate_field_value("name", &JsonValue::Null, &FieldRule::default()).valid);
        assert!(validate_field_value("flag", &json!(false), &rule).valid);
    }

    #[test]
    fn test_validate_range() {
        let rule = FieldRule::default().with_range(Some(2.0), Some(200.0));
        assert!(validate_field_value("gridCount", &json!(10), &rule).valid);
        let low = validate_field_value("gridCount", &json!(1), &rule);
        assert_eq!(low.error.as_deref(), Some("值不能小于 2"));
        let high = validate_field_value("gridCount", &json!(250.5), &rule);
        assert_eq!(high.error.as_deref(), Some("值不能大于 200"));
        // range does not apply to strings
        assert!(validate_field_value("gridCount", &json!("abc"), &rule).valid);
    }

    #[test]
    fn test_validate_pattern() {
        let rule = FieldRule::default().with_pattern("^[A-Z]+/USDT$");
        assert!(validate_field_value("symbol", &json!("BTC/USDT"), &rule).valid);
        let bad = validate_field_value("symbol", &json!("btc-usdt"), &rule);
        assert_eq!(bad.error.as_deref(), Some("格式不正确"));

        let broken = FieldRule::default().with_pattern("([");
        let result = validate_field_value("symbol", &json!("x"), &broken);
        assert!(!result.valid);
    }

    #[test]
    fn test_field_rule_wire_format() {
        let rule: FieldRule =
            serde_json::from_value(json!({ "required": true, "min": 0, "pattern": "^\\d+$" }))
                .unwrap();
        assert!(rule.required);
        assert_eq!(rule.min, Some(0.0));
        assert_eq!(rule.max, None);
    }
}
