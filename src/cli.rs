use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::{CopilotError, Result};
use crate::schema::{
    detect_strategy_type, validate_field_value, AiProposal, ComputeContext, FieldRule, ParamValues,
    SchemaRegistry,
};

#[derive(Parser, Debug)]
#[command(name = "copilot")]
#[command(version = "0.1.0")]
#[command(about = "Strategy parameter schemas: resolve, validate and inspect", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory
    #[arg(short, long, default_value = "config", global = true)]
    pub config: PathBuf,

    /// Current market price exposed to formulas
    #[arg(long, global = true)]
    pub price: Option<f64>,

    /// 24h high
    #[arg(long, global = true)]
    pub high: Option<f64>,

    /// 24h low
    #[arg(long, global = true)]
    pub low: Option<f64>,

    /// Account balance
    #[arg(long, global = true)]
    pub balance: Option<f64>,

    /// Print single-line JSON
    #[arg(long, global = true)]
    pub compact: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List registered strategy types
    Types,
    /// Print the default parameter list of a strategy type
    Defaults {
        strategy_type: String,
    },
    /// Resolve proposed values against a schema
    Resolve {
        strategy_type: String,
        /// Values as a JSON object, e.g. '{"gridCount": 10}'
        #[arg(long, conflicts_with = "file")]
        values: Option<String>,
        /// Read values from a JSON file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Edit one field after resolving (key=value, repeatable)
        #[arg(long = "set", value_parser = parse_assignment)]
        edits: Vec<(String, JsonValue)>,
    },
    /// Print the LLM prompt block of a strategy type
    Prompt {
        strategy_type: String,
    },
    /// Guess the strategy type from free text
    Detect {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Validate a single field value
    Check {
        key: String,
        value: String,
        #[arg(long)]
        required: bool,
        #[arg(long)]
        min: Option<f64>,
        #[arg(long)]
        max: Option<f64>,
        #[arg(long)]
        pattern: Option<String>,
    },
}

/// Parse `key=value`; the value is JSON when it parses, a string otherwise.
pub fn parse_assignment(raw: &str) -> std::result::Result<(String, JsonValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.to_string(), parse_value(value)))
}

fn parse_value(raw: &str) -> JsonValue {
    serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string()))
}

impl Cli {
    /// Market context: command line flags over configured defaults.
    pub fn context(&self, defaults: &ComputeContext) -> ComputeContext {
        ComputeContext {
            current_price: self.price.or(defaults.current_price),
            high_24h: self.high.or(defaults.high_24h),
            low_24h: self.low.or(defaults.low_24h),
            balance: self.balance.or(defaults.balance),
        }
    }

    fn print<T: Serialize>(&self, value: &T) -> Result<()> {
        let out = if self.compact {
            serde_json::to_string(value)?
        } else {
            serde_json::to_string_pretty(value)?
        };
        println!("{}", out);
        Ok(())
    }
}

fn read_values(values: Option<&str>, file: Option<&PathBuf>) -> Result<ParamValues> {
    let raw = match (values, file) {
        (Some(inline), _) => inline.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)?,
        (None, None) => return Ok(ParamValues::new()),
    };
    match serde_json::from_str::<JsonValue>(&raw)? {
        JsonValue::Object(map) => Ok(map.into_iter().collect()),
        other => Err(CopilotError::Validation(format!(
            "values must be a JSON object, got {}",
            other
        ))),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TypeSummary {
    #[serde(rename = "type")]
    strategy_type: String,
    name: String,
    version: String,
    fields: usize,
}

/// Execute a command. Returns `false` when the result should make the
/// process exit non-zero (resolution errors, invalid field).
pub fn run(cli: &Cli, registry: &SchemaRegistry, defaults: &ComputeContext) -> Result<bool> {
    let context = cli.context(defaults);
    debug!(?context, "market context");

    match &cli.command {
        Commands::Types => {
            let types: Vec<TypeSummary> = registry
                .get_all()
                .iter()
                .map(|s| TypeSummary {
                    strategy_type: s.strategy_type.clone(),
                    name: s.name.clone(),
                    version: s.version.clone(),
                    fields: s.fields.len(),
                })
                .collect();
            cli.print(&types)?;
            Ok(true)
        }
        Commands::Defaults { strategy_type } => {
            if !registry.has(strategy_type) {
                return Err(CopilotError::UnknownStrategyType(strategy_type.clone()));
            }
            cli.print(&registry.get_default_params(strategy_type, &context))?;
            Ok(true)
        }
        Commands::Resolve {
            strategy_type,
            values,
            file,
            edits,
        } => {
            let values = read_values(values.as_deref(), file.as_ref())?;
            let proposal = AiProposal::new(strategy_type, values);
            let mut result = registry.resolve_params(&proposal, &context);
            for (key, value) in edits {
                result = registry.apply_edit(&result, key, value.clone(), &context);
            }
            info!(
                strategy_type = %strategy_type,
                errors = result.errors.len(),
                warnings = result.warnings.len(),
                "resolved"
            );
            cli.print(&result)?;
            Ok(result.is_valid())
        }
        Commands::Prompt { strategy_type } => {
            println!("{}", registry.to_ai_prompt(strategy_type)?);
            Ok(true)
        }
        Commands::Detect { text } => {
            let input = text.join(" ");
            match detect_strategy_type(&input) {
                Some(kind) if registry.has(kind.as_str()) => println!("{}", kind),
                Some(kind) => println!("{} (no schema registered)", kind),
                None => println!("unknown"),
            }
            Ok(true)
        }
        Commands::Check {
            key,
            value,
            required,
            min,
            max,
            pattern,
        } => {
            let rule = FieldRule {
                required: *required,
                min: *min,
                max: *max,
                pattern: pattern.clone(),
            };
            let result = validate_field_value(key, &parse_value(value), &rule);
            cli.print(&result)?;
            Ok(result.valid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_resolve_command() {
        let cli = Cli::try_parse_from([
            "copilot",
            "--price",
            "105",
            "resolve",
            "grid",
            "--values",
            r#"{"upperBound": 110}"#,
            "--set",
            "gridCount=5",
            "--set",
            "gridMode=geometric",
        ])
        .unwrap();

        assert_eq!(cli.price, Some(105.0));
        match cli.command {
            Commands::Resolve {
                strategy_type,
                values,
                edits,
                ..
            } => {
                assert_eq!(strategy_type, "grid");
                assert!(values.is_some());
                assert_eq!(
                    edits,
                    vec![
                        ("gridCount".to_string(), json!(5)),
                        ("gridMode".to_string(), json!("geometric")),
                    ]
                );
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_values_and_file_conflict() {
        let parsed = Cli::try_parse_from([
            "copilot", "resolve", "grid", "--values", "{}", "--file", "x.json",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(parse_assignment("a=true").unwrap(), ("a".to_string(), json!(true)));
        assert_eq!(parse_assignment("a=1h").unwrap(), ("a".to_string(), json!("1h")));
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=3").is_err());
    }

    #[test]
    fn test_context_flags_override_defaults() {
        let cli = Cli::try_parse_from(["copilot", "types", "--balance", "50"]).unwrap();
        let defaults = ComputeContext {
            current_price: Some(100.0),
            balance: Some(10.0),
            ..Default::default()
        };
        let ctx = cli.context(&defaults);
        assert_eq!(ctx.current_price, Some(100.0));
        assert_eq!(ctx.balance, Some(50.0));
    }

    #[test]
    fn test_read_values() {
        let values = read_values(Some(r#"{"gridCount": 8}"#), None).unwrap();
        assert_eq!(values.get("gridCount"), Some(&json!(8)));
        assert!(read_values(None, None).unwrap().is_empty());
        assert!(matches!(
            read_values(Some("[1, 2]"), None),
            Err(CopilotError::Validation(_))
        ));
    }

    #[test]
    fn test_run_reports_validity() {
        let registry = SchemaRegistry::with_builtins().unwrap();
        let ok = Cli::try_parse_from([
            "copilot",
            "--compact",
            "resolve",
            "rsi_reversal",
            "--values",
            r#"{"rsiOverbought": 70, "rsiOversold": 30}"#,
        ])
        .unwrap();
        assert!(run(&ok, &registry, &ComputeContext::default()).unwrap());

        let bad = Cli::try_parse_from([
            "copilot",
            "--compact",
            "resolve",
            "rsi_reversal",
            "--set",
            "rsiOversold=60",
        ])
        .unwrap();
        assert!(!run(&bad, &registry, &ComputeContext::default()).unwrap());

        let unknown = Cli::try_parse_from(["copilot", "prompt", "martingale"]).unwrap();
        assert!(matches!(
            run(&unknown, &registry, &ComputeContext::default()),
            Err(CopilotError::UnknownStrategyType(_))
        ));
    }
}
