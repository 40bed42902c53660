//! Built-in strategy schemas.
//!
//! These are plain data. New strategy types are added by writing another
//! definition and registering it; the engine does not change.

mod dca;
mod grid;
mod rsi;

pub use dca::{dca_schema, DCA_TYPE};
pub use grid::{grid_schema, GRID_TYPE};
pub use rsi::{rsi_reversal_schema, RSI_REVERSAL_TYPE};

use crate::schema::types::StrategySchema;

/// Every built-in schema, in registration order.
pub fn builtin_schemas() -> Vec<StrategySchema> {
    vec![grid_schema(), rsi_reversal_schema(), dca_schema()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::compute::compute_all_derived_fields;
    use crate::schema::expr::{is_helper, CompiledExpression};
    use crate::schema::types::{ComputeContext, ParamValues};
    use std::collections::HashSet;

    #[test]
    fn test_builtin_types() {
        let types: Vec<String> = builtin_schemas()
            .into_iter()
            .map(|s| s.strategy_type)
            .collect();
        assert_eq!(types, vec!["grid", "rsi_reversal", "dca"]);
    }

    #[test]
    fn test_builtin_keys_unique_and_dependencies_declared() {
        for schema in builtin_schemas() {
            let keys: HashSet<&str> = schema.fields.iter().map(|f| f.key.as_str()).collect();
            assert_eq!(keys.len(), schema.fields.len(), "{}", schema.strategy_type);

            for field in schema.computed_fields() {
                let formula = field.active_formula().unwrap();
                for dep in &field.depends_on {
                    assert!(keys.contains(dep.as_str()), "{}.{}", field.key, dep);
                }
                // every name the formula reads is declared
                for name in CompiledExpression::compile(formula).unwrap().identifiers() {
                    assert!(
                        field.depends_on.contains(&name) || is_helper(&name),
                        "{} reads undeclared {}",
                        field.key,
                        name
                    );
                }
            }
        }
    }

    #[test]
    fn test_builtin_expressions_compile() {
        for schema in builtin_schemas() {
            for validator in &schema.validators {
                assert!(
                    CompiledExpression::compile(&validator.expression).is_ok(),
                    "{}",
                    validator.name
                );
            }
            for field in &schema.fields {
                if let Some(condition) = &field.show_when {
                    assert!(CompiledExpression::compile(condition).is_ok(), "{}", field.key);
                }
            }
        }
    }

    fn defaults(schema: &StrategySchema) -> ParamValues {
        schema
            .fields
            .iter()
            .filter_map(|f| f.default_value.clone().map(|v| (f.key.clone(), v)))
            .collect()
    }

    #[test]
    fn test_dca_derived_fields() {
        let schema = dca_schema();
        let mut values = defaults(&schema);
        values.insert("frequency".to_string(), serde_json::json!("weekly"));
        values.insert("amountPerPurchase".to_string(), serde_json::json!(300));

        let outcome = compute_all_derived_fields(&schema.fields, &values, &ComputeContext::default());
        assert!(outcome.converged);
        assert_eq!(outcome.values["estimatedPurchases"], serde_json::json!(3));
        assert_eq!(outcome.values["estimatedDays"], serde_json::json!(21));
    }

    #[test]
    fn test_rsi_derived_fields() {
        let schema = rsi_reversal_schema();
        let outcome =
            compute_all_derived_fields(&schema.fields, &defaults(&schema), &ComputeContext::default());
        assert_eq!(outcome.values["rsiBandWidth"], serde_json::json!(40));
        assert_eq!(outcome.values["riskRewardRatio"], serde_json::json!(2));
    }
}
