//! Compute engine: resolves computed fields from their formulas.
//!
//! Computed fields are not topologically sorted. Every pass evaluates each
//! formula against the current combined values (later fields in a pass see
//! the results of earlier ones) and the engine stops at the first pass that
//! changes nothing. Forward references simply take an extra pass. A formula
//! that fails keeps the field's previous value for that pass and never stops
//! the other fields from being computed.

use crate::error::ExprError;
use crate::schema::expr::{evaluate, CompiledExpression, Environment, Value};
use crate::schema::types::{ComputeContext, ParamSchemaField, ParamValues};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Default cap on fixpoint passes.
pub const MAX_COMPUTE_PASSES: usize = 10;

/// Last known state of one computed field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldComputeStatus {
    /// Not evaluated yet.
    Pending,
    /// Evaluated successfully in `pass` (1-based).
    Computed { pass: usize },
    /// The most recent evaluation failed. `previously_computed` tells whether
    /// the value kept is an earlier computed result or the seed value.
    Failed {
        error: ExprError,
        previously_computed: bool,
    },
}

impl FieldComputeStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    fn has_computed(&self) -> bool {
        matches!(
            self,
            Self::Computed { .. }
                | Self::Failed {
                    previously_computed: true,
                    ..
                }
        )
    }
}

/// Result of resolving every computed field of a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeOutcome {
    /// Input values with computed fields filled in. Every declared field key
    /// is present (`null` when it has no value).
    pub values: ParamValues,
    pub passes: usize,
    /// False when the pass cap was hit while values were still changing.
    pub converged: bool,
    pub statuses: BTreeMap<String, FieldComputeStatus>,
}

impl ComputeOutcome {
    /// Fields whose most recent evaluation failed.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &ExprError)> {
        self.statuses.iter().filter_map(|(key, status)| match status {
            FieldComputeStatus::Failed { error, .. } => Some((key.as_str(), error)),
            _ => None,
        })
    }
}

/// Evaluate a single formula against `params` and the market context.
pub fn compute_field_value(
    formula: &str,
    params: &ParamValues,
    context: &ComputeContext,
) -> Result<JsonValue, ExprError> {
    let env = Environment::new(params, context);
    evaluate(formula, &env).map(|value| value.to_json())
}

/// Resolve all computed fields with the default pass cap.
pub fn compute_all_derived_fields(
    fields: &[ParamSchemaField],
    current_values: &ParamValues,
    context: &ComputeContext,
) -> ComputeOutcome {
    ComputeEngine::default().compute(fields, current_values, context)
}

/// Fixpoint iteration over computed fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeEngine {
    max_passes: usize,
}

impl Default for ComputeEngine {
    fn default() -> Self {
        Self {
            max_passes: MAX_COMPUTE_PASSES,
        }
    }
}

impl ComputeEngine {
    pub fn new(max_passes: usize) -> Self {
        Self {
            max_passes: max_passes.max(1),
        }
    }

    pub fn max_passes(&self) -> usize {
        self.max_passes
    }

    pub fn compute(
        &self,
        fields: &[ParamSchemaField],
        current_values: &ParamValues,
        context: &ComputeContext,
    ) -> ComputeOutcome {
        let mut values = current_values.clone();
        for field in fields {
            values.entry(field.key.clone()).or_insert(JsonValue::Null);
        }

        let formulas: Vec<(&str, Result<CompiledExpression, ExprError>)> = fields
            .iter()
            .filter_map(|field| {
                field
                    .active_formula()
                    .map(|source| (field.key.as_str(), CompiledExpression::compile(source)))
            })
            .collect();

        let mut statuses: BTreeMap<String, FieldComputeStatus> = formulas
            .iter()
            .map(|(key, _)| (key.to_string(), FieldComputeStatus::Pending))
            .collect();

        if formulas.is_empty() {
            return ComputeOutcome {
                values,
                passes: 0,
                converged: true,
                statuses,
            };
        }

        let mut env = Environment::new(&values, context);
        let mut passes = 0;
        let mut converged = false;

        while passes < self.max_passes {
            passes += 1;
            let mut changed = 0usize;

            for (key, compiled) in &formulas {
                let result = match compiled {
                    Ok(expression) => expression.evaluate(&env).map(|value| value.to_json()),
                    Err(error) => Err(error.clone()),
                };

                match result {
                    Ok(value) => {
                        let unchanged = values.get(*key) == Some(&value);
                        let settled = matches!(
                            statuses.get(*key),
                            Some(FieldComputeStatus::Computed { .. })
                        );
                        if !(unchanged && settled) {
                            statuses.insert(
                                key.to_string(),
                                FieldComputeStatus::Computed { pass: passes },
                            );
                        }
                        if !unchanged {
                            env.set(key, Value::from_json(&value));
                            values.insert(key.to_string(), value);
                            changed += 1;
                        }
                    }
                    Err(error) => {
                        debug!(field = %key, pass = passes, %error, "computed field failed, keeping previous value");
                        let previously_computed = statuses
                            .get(*key)
                            .map(FieldComputeStatus::has_computed)
                            .unwrap_or(false);
                        statuses.insert(
                            key.to_string(),
                            FieldComputeStatus::Failed {
                                error,
                                previously_computed,
                            },
                        );
                    }
                }
            }

            debug!(pass = passes, changed, "compute pass finished");
            if changed == 0 {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(
                passes,
                "computed fields did not stabilise, possible circular dependency"
            );
        }

        ComputeOutcome {
            values,
            passes,
            converged,
            statuses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::ControlType;
    use serde_json::json;

    fn values(pairs: &[(&str, JsonValue)]) -> ParamValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn input(key: &str) -> ParamSchemaField {
        ParamSchemaField::new(key, key, ControlType::Number)
    }

    fn grid_fields() -> Vec<ParamSchemaField> {
        vec![
            // declared before the field it reads to force a second pass
            ParamSchemaField::computed(
                "gridProfitPercent",
                "单格利润率",
                "gridSpacing / lowerBound * 100",
                &["gridSpacing", "lowerBound"],
            ),
            input("upperBound"),
            input("lowerBound"),
            input("gridCount"),
            input("investment"),
            ParamSchemaField::computed(
                "gridSpacing",
                "网格间距",
                "(upperBound - lowerBound) / gridCount",
                &["upperBound", "lowerBound", "gridCount"],
            ),
            ParamSchemaField::computed(
                "amountPerGrid",
                "每格投资",
                "investment / gridCount",
                &["investment", "gridCount"],
            ),
        ]
    }

    #[test]
    fn test_compute_field_value() {
        let params = values(&[("total", json!(1000)), ("perPurchase", json!(300))]);
        let value =
            compute_field_value("floor(total / perPurchase)", &params, &ComputeContext::default())
                .unwrap();
        assert_eq!(value, json!(3));
    }

    #[test]
    fn test_compute_field_value_rejects_unsafe_and_non_finite() {
        let params = values(&[("a", json!(1))]);
        let ctx = ComputeContext::default();
        assert!(compute_field_value("this.a", &params, &ctx)
            .unwrap_err()
            .is_unsafe());
        assert!(matches!(
            compute_field_value("a / 0", &params, &ctx),
            Err(ExprError::InvalidResult(_))
        ));
    }

    #[test]
    fn test_long_operator_chain_is_refused() {
        let formula = format!("{}1", "1+".repeat(2000));
        let err = compute_field_value(&formula, &ParamValues::new(), &ComputeContext::default())
            .unwrap_err();
        assert!(err.is_unsafe(), "{err:?}");

        let fields = vec![ParamSchemaField::computed("sum", "Sum", &formula, &[])];
        let outcome =
            compute_all_derived_fields(&fields, &ParamValues::new(), &ComputeContext::default());
        assert_eq!(outcome.values["sum"], JsonValue::Null);
        assert_eq!(outcome.failures().count(), 1);
    }

    #[test]
    fn test_forward_references_resolve() {
        let current = values(&[
            ("upperBound", json!(110)),
            ("lowerBound", json!(100)),
            ("gridCount", json!(10)),
            ("investment", json!(1000)),
        ]);
        let outcome = compute_all_derived_fields(&grid_fields(), &current, &ComputeContext::default());

        assert!(outcome.converged);
        assert_eq!(outcome.passes, 3);
        assert_eq!(outcome.values["gridSpacing"], json!(1));
        assert_eq!(outcome.values["amountPerGrid"], json!(100));
        assert_eq!(outcome.values["gridProfitPercent"], json!(1));
        assert_eq!(
            outcome.statuses["gridProfitPercent"],
            FieldComputeStatus::Computed { pass: 2 }
        );
        assert_eq!(
            outcome.statuses["gridSpacing"],
            FieldComputeStatus::Computed { pass: 1 }
        );
        assert_eq!(outcome.failures().count(), 0);
    }

    #[test]
    fn test_status_records_producing_pass() {
        // confirming passes must not move a settled field's pass forward
        let fields = vec![
            ParamSchemaField::computed("b", "B", "a + 1", &["a"]),
            ParamSchemaField::computed("a", "A", "2", &[]),
        ];
        let current = values(&[("b", json!(3))]);
        let outcome = compute_all_derived_fields(&fields, &current, &ComputeContext::default());

        assert!(outcome.converged);
        assert_eq!(outcome.passes, 2);
        assert_eq!(outcome.statuses["a"], FieldComputeStatus::Computed { pass: 1 });
        // fails in pass 1 on the missing `a`, then matches the seeded value
        assert_eq!(outcome.statuses["b"], FieldComputeStatus::Computed { pass: 2 });
        assert_eq!(outcome.values["b"], json!(3));
    }

    #[test]
    fn test_does_not_touch_inputs() {
        let current = values(&[
            ("upperBound", json!(110)),
            ("lowerBound", json!(100)),
            ("gridCount", json!(5)),
            ("investment", json!(1000)),
        ]);
        let outcome = compute_all_derived_fields(&grid_fields(), &current, &ComputeContext::default());
        assert_eq!(outcome.values["gridSpacing"], json!(2));
        assert_eq!(outcome.values["amountPerGrid"], json!(200));
        assert_eq!(outcome.values["investment"], json!(1000));
        assert_eq!(outcome.values["upperBound"], json!(110));
    }

    #[test]
    fn test_circular_fields_stop_at_cap() {
        let fields = vec![
            ParamSchemaField::computed("a", "A", "b + 1", &["b"]),
            ParamSchemaField::computed("b", "B", "a + 1", &["a"]),
        ];
        let current = values(&[("a", json!(0))]);
        let outcome = compute_all_derived_fields(&fields, &current, &ComputeContext::default());

        assert!(!outcome.converged);
        assert_eq!(outcome.passes, MAX_COMPUTE_PASSES);
        assert!(outcome.values["a"].is_number());
        assert!(outcome.values["b"].is_number());
    }

    #[test]
    fn test_custom_pass_cap() {
        let fields = vec![
            ParamSchemaField::computed("a", "A", "b + 1", &["b"]),
            ParamSchemaField::computed("b", "B", "a + 1", &["a"]),
        ];
        let current = values(&[("a", json!(0))]);
        let outcome = ComputeEngine::new(3).compute(&fields, &current, &ComputeContext::default());
        assert_eq!(outcome.passes, 3);
        assert!(!outcome.converged);
        assert_eq!(ComputeEngine::new(0).max_passes(), 1);
    }

    #[test]
    fn test_failing_formula_does_not_block_others() {
        let fields = vec![
            input("investment"),
            input("gridCount"),
            ParamSchemaField::computed("broken", "Broken", "investment / missingField", &[]),
            ParamSchemaField::computed("unsafe", "Unsafe", "window.alert(1)", &[]),
            ParamSchemaField::computed("amountPerGrid", "每格投资", "investment / gridCount", &[]),
        ];
        let current = values(&[("investment", json!(1000)), ("gridCount", json!(4))]);
        let outcome = compute_all_derived_fields(&fields, &current, &ComputeContext::default());

        assert!(outcome.converged);
        assert_eq!(outcome.values["amountPerGrid"], json!(250));
        assert_eq!(outcome.values["broken"], JsonValue::Null);
        assert_eq!(outcome.failures().count(), 2);
        assert!(matches!(
            &outcome.statuses["broken"],
            FieldComputeStatus::Failed {
                error: ExprError::UnknownIdentifier(_),
                previously_computed: false,
            }
        ));
        assert!(matches!(
            &outcome.statuses["unsafe"],
            FieldComputeStatus::Failed { error, .. } if error.is_unsafe()
        ));
    }

    #[test]
    fn test_failure_after_success_is_distinguished() {
        // `ratio` computes in pass 1 while divisor is still 4, then fails in
        // pass 2 once `divisor` has become 0.
        let fields = vec![
            input("seed"),
            ParamSchemaField::computed("ratio", "Ratio", "10 / divisor", &["divisor"]),
            ParamSchemaField::computed("divisor", "Divisor", "seed - 4", &["seed"]),
        ];
        let current = values(&[("seed", json!(4)), ("divisor", json!(4))]);
        let outcome = compute_all_derived_fields(&fields, &current, &ComputeContext::default());

        assert_eq!(outcome.values["ratio"], json!(2.5));
        assert_eq!(outcome.values["divisor"], json!(0));
        assert!(matches!(
            &outcome.statuses["ratio"],
            FieldComputeStatus::Failed {
                error: ExprError::InvalidResult(_),
                previously_computed: true,
            }
        ));
    }

    #[test]
    fn test_context_is_visible_to_formulas() {
        let fields = vec![ParamSchemaField::computed(
            "upperDefault",
            "默认上限",
            "round(currentPrice * 1.1)",
            &[],
        )];
        let outcome = compute_all_derived_fields(
            &fields,
            &ParamValues::new(),
            &ComputeContext::with_price(100.0),
        );
        assert_eq!(outcome.values["upperDefault"], json!(110));
    }

    #[test]
    fn test_no_computed_fields() {
        let outcome = compute_all_derived_fields(
            &[input("x")],
            &values(&[("x", json!(1))]),
            &ComputeContext::default(),
        );
        assert_eq!(outcome.passes, 0);
        assert!(outcome.converged);
        assert!(outcome.statuses.is_empty());
    }
}
