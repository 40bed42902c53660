//! AST evaluator and formula environment.

use super::parser::{parse, BinaryOp, Expr, LogicalOp, UnaryOp};
use super::value::Value;
use crate::error::ExprError;
use crate::schema::types::{ComputeContext, ParamValues};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Longest formula accepted by the compiler.
pub const MAX_EXPRESSION_LEN: usize = 4096;

/// Helper functions callable from formulas.
pub const HELPERS: [&str; 11] = [
    "round",
    "floor",
    "ceil",
    "abs",
    "min",
    "max",
    "pow",
    "sqrt",
    "percentage",
    "clamp",
    "toFixed",
];

pub fn is_helper(name: &str) -> bool {
    HELPERS.contains(&name)
}

// =============================================================================
// Environment
// =============================================================================

/// Variables visible to a formula.
///
/// Holds the `ctx` object, the flattened context shortcuts (`currentPrice`,
/// `high24h`, `low24h`, `balance`, 0 when absent) and every field value by
/// key. Field values shadow the context names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    vars: BTreeMap<String, Value>,
}

impl Environment {
    pub fn new(values: &ParamValues, context: &ComputeContext) -> Self {
        let mut vars = BTreeMap::new();

        let ctx = context
            .provided()
            .into_iter()
            .map(|(name, value)| (name.to_string(), Value::Number(value)))
            .collect();
        vars.insert("ctx".to_string(), Value::Object(ctx));
        for (name, value) in context.shortcuts() {
            vars.insert(name.to_string(), Value::Number(value));
        }
        for (key, value) in values {
            vars.insert(key.clone(), Value::from_json(value));
        }

        Self { vars }
    }

    pub fn with_value(mut self, key: &str, value: Value) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.vars.insert(key.to_string(), value);
    }

    /// Make `key` resolvable, as `undefined` unless it already has a value.
    pub fn declare(&mut self, key: &str) {
        self.vars.entry(key.to_string()).or_insert(Value::Undefined);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }
}

// =============================================================================
// CompiledExpression
// =============================================================================

/// A formula that passed the safety checks and parsed successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpression {
    source: String,
    ast: Expr,
}

impl CompiledExpression {
    pub fn compile(source: &str) -> Result<Self, ExprError> {
        if source.len() > MAX_EXPRESSION_LEN {
            return Err(ExprError::unsafe_expr(format!(
                "expression longer than {} characters",
                MAX_EXPRESSION_LEN
            )));
        }
        let ast = parse(source)?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Variables the formula reads.
    pub fn identifiers(&self) -> BTreeSet<String> {
        self.ast.identifiers()
    }

    /// Evaluate against `env`. A non-finite numeric result is an error.
    pub fn evaluate(&self, env: &Environment) -> Result<Value, ExprError> {
        let value = eval(&self.ast, env)?;
        if let Value::Number(n) = value {
            if !n.is_finite() {
                return Err(ExprError::InvalidResult(format!(
                    "'{}' evaluated to {}",
                    self.source,
                    Value::Number(n)
                )));
            }
        }
        Ok(value)
    }

    pub fn evaluate_bool(&self, env: &Environment) -> Result<bool, ExprError> {
        self.evaluate(env).map(|value| value.is_truthy())
    }
}

impl fmt::Display for CompiledExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Compile and evaluate `expression` in one step.
pub fn evaluate(expression: &str, env: &Environment) -> Result<Value, ExprError> {
    CompiledExpression::compile(expression)?.evaluate(env)
}

// =============================================================================
// Tree walking
// =============================================================================

fn eval(expr: &Expr, env: &Environment) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => match env.get(name) {
            Some(value) => Ok(value.clone()),
            None if is_helper(name) => Err(ExprError::Type(format!(
                "helper {} must be called",
                name
            ))),
            None => Err(ExprError::UnknownIdentifier(name.clone())),
        },
        Expr::Array(items) => items
            .iter()
            .map(|item| eval(item, env))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Unary(op, operand) => {
            let value = eval(operand, env)?;
            Ok(match op {
                UnaryOp::Not => Value::Bool(!value.is_truthy()),
                UnaryOp::Neg => Value::Number(-value.to_number()),
                UnaryOp::Plus => Value::Number(value.to_number()),
            })
        }
        Expr::Binary(op, left, right) => {
            let left = eval(left, env)?;
            let right = eval(right, env)?;
            Ok(binary(*op, &left, &right))
        }
        Expr::Logical(op, left, right) => {
            let left = eval(left, env)?;
            match (op, left.is_truthy()) {
                (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                _ => eval(right, env),
            }
        }
        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => {
            if eval(condition, env)?.is_truthy() {
                eval(then, env)
            } else {
                eval(otherwise, env)
            }
        }
        Expr::Member(object, property) => member(&eval(object, env)?, property),
        Expr::Index(object, index) => {
            let object = eval(object, env)?;
            let index = eval(index, env)?;
            match &index {
                Value::Number(n) => element(&object, *n),
                other => member(&object, &other.to_string()),
            }
        }
        Expr::Call(name, args) => {
            let args = args
                .iter()
                .map(|arg| eval(arg, env))
                .collect::<Result<Vec<_>, _>>()?;
            call_helper(name, &args)
        }
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    let (a, b) = (left.to_number(), right.to_number());
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::Str(_), _) | (_, Value::Str(_)) => Value::Str(format!("{}{}", left, right)),
            _ => Value::Number(a + b),
        },
        BinaryOp::Sub => Value::Number(a - b),
        BinaryOp::Mul => Value::Number(a * b),
        BinaryOp::Div => Value::Number(a / b),
        BinaryOp::Rem => Value::Number(a % b),
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
            Value::Bool(compare(op, left, right))
        }
        BinaryOp::LooseEq => Value::Bool(left.loose_eq(right)),
        BinaryOp::LooseNe => Value::Bool(!left.loose_eq(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_eq(right)),
        BinaryOp::StrictNe => Value::Bool(!left.strict_eq(right)),
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    if let (Value::Str(a), Value::Str(b)) = (left, right) {
        return match op {
            BinaryOp::Lt => a < b,
            BinaryOp::Gt => a > b,
            BinaryOp::Le => a <= b,
            _ => a >= b,
        };
    }
    let (a, b) = (left.to_number(), right.to_number());
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Gt => a > b,
        BinaryOp::Le => a <= b,
        _ => a >= b,
    }
}

fn member(object: &Value, property: &str) -> Result<Value, ExprError> {
    match object {
        Value::Undefined | Value::Null => Err(ExprError::Type(format!(
            "cannot read property '{}' of {}",
            property,
            object.type_name()
        ))),
        Value::Object(map) => Ok(map.get(property).cloned().unwrap_or(Value::Undefined)),
        Value::Array(items) if property == "length" => Ok(Value::Number(items.len() as f64)),
        Value::Str(s) if property == "length" => Ok(Value::Number(s.chars().count() as f64)),
        _ => Ok(Value::Undefined),
    }
}

fn element(object: &Value, index: f64) -> Result<Value, ExprError> {
    let slot = (index >= 0.0 && index.fract() == 0.0).then_some(index as usize);
    match (object, slot) {
        (Value::Undefined | Value::Null, _) => Err(ExprError::Type(format!(
            "cannot index {} with {}",
            object.type_name(),
            Value::Number(index)
        ))),
        (Value::Array(items), Some(i)) => Ok(items.get(i).cloned().unwrap_or(Value::Undefined)),
        (Value::Str(s), Some(i)) => Ok(s
            .chars()
            .nth(i)
            .map(|c| Value::Str(c.to_string()))
            .unwrap_or(Value::Undefined)),
        (Value::Object(_), _) => member(object, &Value::Number(index).to_string()),
        _ => Ok(Value::Undefined),
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn check_arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), ExprError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{}-{}", min, max)
        };
        return Err(ExprError::Arity {
            function: name.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

/// NaN-propagating fold used by `min` / `max` / `clamp`.
fn fold_nan(values: impl IntoIterator<Item = f64>, init: f64, pick: fn(f64, f64) -> f64) -> f64 {
    values.into_iter().fold(init, |acc, v| {
        if acc.is_nan() || v.is_nan() {
            f64::NAN
        } else {
            pick(acc, v)
        }
    })
}

/// Round half up, matching the behaviour formula authors expect from `round`.
fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}

fn to_fixed(value: f64, digits: f64) -> Result<f64, ExprError> {
    if !(0.0..=100.0).contains(&digits) {
        return Err(ExprError::Type(format!(
            "toFixed digits must be between 0 and 100, got {}",
            Value::Number(digits)
        )));
    }
    let digits = digits.trunc() as i32;
    if !value.is_finite() || digits > 15 {
        return Ok(value);
    }
    let factor = 10f64.powi(digits);
    Ok((value * factor).round() / factor)
}

fn call_helper(name: &str, args: &[Value]) -> Result<Value, ExprError> {
    let nums: Vec<f64> = args.iter().map(Value::to_number).collect();
    let unary = |f: fn(f64) -> f64| -> Result<f64, ExprError> {
        check_arity(name, args, 1, 1)?;
        Ok(f(nums[0]))
    };

    let result = match name {
        "round" => unary(round_half_up)?,
        "floor" => unary(f64::floor)?,
        "ceil" => unary(f64::ceil)?,
        "abs" => unary(f64::abs)?,
        "sqrt" => unary(f64::sqrt)?,
        "min" => fold_nan(nums.iter().copied(), f64::INFINITY, f64::min),
        "max" => fold_nan(nums.iter().copied(), f64::NEG_INFINITY, f64::max),
        "pow" => {
            check_arity(name, args, 2, 2)?;
            nums[0].powf(nums[1])
        }
        "percentage" => {
            check_arity(name, args, 2, 2)?;
            nums[0] * nums[1] / 100.0
        }
        "clamp" => {
            check_arity(name, args, 3, 3)?;
            let floored = fold_nan([nums[0], nums[1]], nums[0], f64::max);
            fold_nan([floored, nums[2]], floored, f64::min)
        }
        "toFixed" => {
            check_arity(name, args, 1, 2)?;
            to_fixed(nums[0], nums.get(1).copied().unwrap_or(0.0))?
        }
        _ => return Err(ExprError::UnknownFunction(name.to_string())),
    };
    Ok(Value::Number(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env() -> Environment {
        let values: ParamValues = [
            ("upperBound", json!(110)),
            ("lowerBound", json!(100)),
            ("gridCount", json!(10)),
            ("mode", json!("geometric")),
            ("enabled", json!(true)),
            ("missing", json!(null)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let ctx = ComputeContext {
            current_price: Some(105.0),
            balance: Some(500.0),
            ..Default::default()
        };
        Environment::new(&values, &ctx)
    }

    fn eval_str(source: &str) -> Result<Value, ExprError> {
        evaluate(source, &env())
    }

    fn num(source: &str) -> f64 {
        match eval_str(source) {
            Ok(Value::Number(n)) => n,
            other => panic!("{source} should be a number, got {other:?}"),
        }
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(num("(upperBound - lowerBound) / gridCount"), 1.0);
        assert_eq!(num("7 % 3"), 1.0);
        assert_eq!(num("-gridCount + 2 * 3"), -4.0);
        assert_eq!(num("+'4' * 2"), 8.0);
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval_str("upperBound > lowerBound").unwrap(), Value::Bool(true));
        assert_eq!(eval_str("enabled === true").unwrap(), Value::Bool(true));
        assert_eq!(eval_str("gridCount == '10'").unwrap(), Value::Bool(true));
        assert_eq!(eval_str("gridCount === '10'").unwrap(), Value::Bool(false));
        assert_eq!(eval_str("!enabled || gridCount").unwrap(), Value::Number(10.0));
        assert_eq!(eval_str("0 && undefinedName").unwrap(), Value::Number(0.0));
        assert_eq!(eval_str("'abc' < 'abd'").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_conditional_with_strings() {
        assert_eq!(num("mode === 'geometric' ? 2 : 1"), 2.0);
        assert_eq!(
            eval_str("'grid-' + gridCount").unwrap(),
            Value::Str("grid-10".to_string())
        );
    }

    #[test]
    fn test_context_exposure() {
        assert_eq!(num("currentPrice"), 105.0);
        assert_eq!(num("ctx.balance"), 500.0);
        assert_eq!(num("high24h"), 0.0);
        assert_eq!(eval_str("ctx.high24h").unwrap(), Value::Undefined);
        assert_eq!(eval_str("ctx['currentPrice']").unwrap(), Value::Number(105.0));
    }

    #[test]
    fn test_helpers() {
        assert_eq!(num("round(2.5)"), 3.0);
        assert_eq!(num("round(-2.5)"), -2.0);
        assert_eq!(num("floor(1000 / 300)"), 3.0);
        assert_eq!(num("ceil(1.2)"), 2.0);
        assert_eq!(num("abs(-3)"), 3.0);
        assert_eq!(num("min(3, 1, 2)"), 1.0);
        assert_eq!(num("max(3, 1, 2)"), 3.0);
        assert_eq!(num("pow(2, 10)"), 1024.0);
        assert_eq!(num("sqrt(16)"), 4.0);
        assert_eq!(num("percentage(200, 5)"), 10.0);
        assert_eq!(num("clamp(150, 0, 100)"), 100.0);
        assert_eq!(num("clamp(-5, 0, 100)"), 0.0);
        assert_eq!(num("toFixed(3.14159, 2)"), 3.14);
        assert_eq!(num("toFixed(2.5)"), 3.0);
    }

    #[test]
    fn test_helper_errors() {
        assert!(matches!(eval_str("pow(2)"), Err(ExprError::Arity { .. })));
        assert!(matches!(eval_str("launch(1)"), Err(ExprError::UnknownFunction(_))));
        assert!(matches!(eval_str("round"), Err(ExprError::Type(_))));
        assert!(matches!(eval_str("toFixed(1, 101)"), Err(ExprError::Type(_))));
    }

    #[test]
    fn test_non_finite_results_are_rejected() {
        assert!(matches!(eval_str("1 / 0"), Err(ExprError::InvalidResult(_))));
        assert!(matches!(eval_str("missing * 2"), Err(ExprError::InvalidResult(_))));
        assert!(matches!(eval_str("sqrt(-1)"), Err(ExprError::InvalidResult(_))));
        assert!(matches!(eval_str("min()"), Err(ExprError::InvalidResult(_))));
    }

    #[test]
    fn test_missing_values_are_undefined() {
        assert_eq!(eval_str("missing").unwrap(), Value::Undefined);
        assert_eq!(eval_str("missing == null").unwrap(), Value::Bool(true));
        assert!(matches!(eval_str("missing.value"), Err(ExprError::Type(_))));
    }

    #[test]
    fn test_unknown_identifier() {
        assert_eq!(
            eval_str("nope + 1").unwrap_err(),
            ExprError::UnknownIdentifier("nope".to_string())
        );
    }

    #[test]
    fn test_unsafe_expressions_never_run() {
        for source in ["window.alert(1)", "this.x", "require('fs')", "process.exit()", "a; b"] {
            assert!(eval_str(source).unwrap_err().is_unsafe(), "{source}");
        }
    }

    #[test]
    fn test_declare_keeps_existing_values() {
        let mut env = env();
        env.declare("gridCount");
        env.declare("fresh");
        assert_eq!(env.get("gridCount"), Some(&Value::Number(10.0)));
        assert_eq!(env.get("fresh"), Some(&Value::Undefined));
    }

    #[test]
    fn test_arrays() {
        assert_eq!(num("[1, 2, 3][1]"), 2.0);
        assert_eq!(num("[1, 2, 3].length"), 3.0);
        assert_eq!(eval_str("[1][5]").unwrap(), Value::Undefined);
    }

    #[test]
    fn test_identifiers_of_compiled_expression() {
        let compiled = CompiledExpression::compile("investment / gridCount").unwrap();
        assert!(compiled.identifiers().contains("investment"));
        assert_eq!(compiled.to_string(), "investment / gridCount");
        assert!(CompiledExpression::compile(&"1+".repeat(3000)).unwrap_err().is_unsafe());
    }
}
