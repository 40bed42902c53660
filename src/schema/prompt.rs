//! Schema to LLM prompt serialization.
//!
//! The block tells the model which keys it must emit, which it may emit and
//! which are derived by the system and must be left out.

use crate::schema::types::{ParamSchemaField, StrategySchema};
use serde_json::Value as JsonValue;

fn describe_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => format!("\"{}\"", s),
        other => other.to_string(),
    }
}

fn describe_field(field: &ParamSchemaField) -> String {
    let mut hints = vec![field.control.to_string()];
    let config = &field.config;

    match (config.min, config.max) {
        (Some(min), Some(max)) => hints.push(format!("范围 {}-{}", min, max)),
        (Some(min), None) => hints.push(format!("最小 {}", min)),
        (None, Some(max)) => hints.push(format!("最大 {}", max)),
        (None, None) => {}
    }
    if let Some(unit) = &config.unit {
        hints.push(format!("单位 {}", unit));
    }
    if !config.options.is_empty() {
        let options: Vec<String> = config.options.iter().map(|o| describe_value(&o.value)).collect();
        hints.push(format!("可选值 {}", options.join(" | ")));
    }
    if let Some(default) = &field.default_value {
        hints.push(format!("默认 {}", describe_value(default)));
    }
    if let Some(condition) = &field.show_when {
        hints.push(format!("仅当 {} 时生效", condition));
    }

    let mut line = format!("- {} ({}) [{}]", field.key, field.label, hints.join(", "));
    if let Some(description) = &field.description {
        line.push_str(": ");
        line.push_str(description);
    }
    line
}

/// Render `schema` as a prompt block.
pub fn schema_to_prompt(schema: &StrategySchema) -> String {
    let mut lines = vec![format!("## 策略类型: {} ({})", schema.name, schema.strategy_type)];
    if !schema.description.is_empty() {
        lines.push(schema.description.clone());
    }

    let required: Vec<&ParamSchemaField> = schema.required_fields().collect();
    let optional: Vec<&ParamSchemaField> = schema
        .fields
        .iter()
        .filter(|f| !f.required && !f.computed)
        .collect();
    let computed: Vec<&ParamSchemaField> = schema.computed_fields().collect();

    lines.push(String::new());
    lines.push("### 必填参数（必须输出）".to_string());
    lines.extend(required.iter().map(|f| describe_field(f)));

    if !optional.is_empty() {
        lines.push(String::new());
        lines.push("### 可选参数（未输出时使用默认值）".to_string());
        lines.extend(optional.iter().map(|f| describe_field(f)));
    }

    if !computed.is_empty() {
        lines.push(String::new());
        lines.push("### 系统计算字段（不要输出）".to_string());
        lines.extend(computed.iter().map(|f| {
            format!(
                "- {} ({}) = {}",
                f.key,
                f.label,
                f.formula.as_deref().unwrap_or_default()
            )
        }));
    }

    if !schema.validators.is_empty() {
        lines.push(String::new());
        lines.push("### 校验规则".to_string());
        lines.extend(
            schema
                .validators
                .iter()
                .map(|v| format!("- {}: {}", v.expression, v.message)),
        );
    }

    lines.push(String::new());
    lines.push(format!(
        "请以 JSON 输出: {{\"strategyType\": \"{}\", \"values\": {{...}}}}",
        schema.strategy_type
    ));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::definitions::grid_schema;

    #[test]
    fn test_grid_prompt_sections() {
        let prompt = schema_to_prompt(&grid_schema());
        let required = prompt.find("### 必填参数").unwrap();
        let optional = prompt.find("### 可选参数").unwrap();
        let computed = prompt.find("### 系统计算字段").unwrap();
        assert!(required < optional && optional < computed);

        let required_block = &prompt[required..optional];
        assert!(required_block.contains("- upperBound (价格上限)"));
        assert!(required_block.contains("范围 2-200"));
        assert!(!required_block.contains("gridSpacing"));

        let computed_block = &prompt[computed..];
        assert!(computed_block.contains("- gridSpacing (网格间距) = (upperBound - lowerBound) / gridCount"));
        assert!(prompt.contains("\"strategyType\": \"grid\""));
    }

    #[test]
    fn test_optional_fields_show_options_and_conditions() {
        let prompt = schema_to_prompt(&grid_schema());
        assert!(prompt.contains("可选值 \"arithmetic\" | \"geometric\""));
        assert!(prompt.contains("仅当 stopLossEnabled === true 时生效"));
    }
}
