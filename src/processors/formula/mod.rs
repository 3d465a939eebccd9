//! Spreadsheet formula evaluation.
//!
//! Formulas use the familiar spreadsheet syntax (`=ROUND(SUM(1,2)/3, 2)`),
//! are parsed into an expression tree and evaluated without any cell
//! references. The result is then coerced to the output type requested by
//! the flow step (`int`, `float`, `str` or `bool`).

mod eval;
mod lexer;
mod parser;

use std::str::FromStr;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};
use thiserror::Error;

use super::{activity, ActionManifest, AttributeDef, Picklist, ProcessOutput, Processor};
use crate::batch::{Item, ItemError};
use crate::errors::ProcessError;

pub use eval::FormulaValue;

/// Why a formula could not be evaluated. Messages lead with the spreadsheet
/// error code a user would recognise.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    #[error("#ERROR! syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("#NAME? unknown function {0}")]
    UnknownFunction(String),

    #[error("#NAME? unknown name {0}")]
    UnknownName(String),

    #[error("#DIV/0! division by zero")]
    DivisionByZero,

    #[error("#VALUE! {0}")]
    InvalidValue(String),

    #[error("#NUM! {0}")]
    InvalidNumber(String),

    #[error("#N/A {function} expects {expected} argument(s), got {found}")]
    Arity {
        function: String,
        expected: String,
        found: usize,
    },
}

/// Parse and evaluate a formula string.
pub fn evaluate(formula: &str) -> Result<FormulaValue, FormulaError> {
    let expr = parser::parse(formula)?;
    eval::evaluate(&expr)
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// Type the formula result is converted to before it is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    Int,
    Float,
    Str,
    Bool,
}

impl FromStr for OutputType {
    type Err = ProcessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            "str" => Ok(Self::Str),
            "bool" => Ok(Self::Bool),
            _ => Err(ProcessError::UnsupportedOutputType(s.to_string())),
        }
    }
}

impl OutputType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::Bool => "bool",
        }
    }

    /// Convert a formula result into a JSON value of this type.
    pub fn coerce(&self, value: &FormulaValue) -> Result<Value, ProcessError> {
        let fail = || ProcessError::Coercion {
            value: value.to_string(),
            target: self.name(),
        };

        match (self, value) {
            (Self::Str, v) => Ok(Value::String(v.to_string())),

            (Self::Int, FormulaValue::Number(n)) => {
                let truncated = n.trunc();
                if !truncated.is_finite()
                    || truncated >= i64::MAX as f64
                    || truncated < i64::MIN as f64
                {
                    return Err(fail());
                }
                Ok(json!(truncated as i64))
            }
            (Self::Int, FormulaValue::Bool(b)) => Ok(json!(i64::from(*b))),
            (Self::Int, FormulaValue::Text(s)) => {
                s.trim().parse::<i64>().map(|n| json!(n)).map_err(|_| fail())
            }

            (Self::Float, FormulaValue::Number(n)) => {
                serde_json::Number::from_f64(*n).map(Value::Number).ok_or_else(fail)
            }
            (Self::Float, FormulaValue::Bool(b)) => Ok(json!(if *b { 1.0 } else { 0.0 })),
            (Self::Float, FormulaValue::Text(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(fail),

            (Self::Bool, FormulaValue::Bool(b)) => Ok(Value::Bool(*b)),
            (Self::Bool, FormulaValue::Number(n)) => Ok(Value::Bool(*n != 0.0)),
            (Self::Bool, FormulaValue::Text(s)) => match s.trim().to_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" | "" => Ok(Value::Bool(false)),
                _ => Err(fail()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

pub static FORMULA_MANIFEST: Lazy<ActionManifest> = Lazy::new(|| ActionManifest {
    base: "calcFormula",
    api_name: "calc-formula",
    display_name: "Calculate Formula",
    description: "Calculate an Excel formula",
    trigger_name: "Formula is Calculated",
    filter_name: "Formula was Calculated",
    primary_attribute: "formula",
    realm: "Workflow Pro Calculate Formula",
    flow_attributes: vec![
        AttributeDef::new(
            "formula",
            "text",
            "Formula",
            "Open-text field containing the formula to be calculated",
        ),
        AttributeDef::new("data_type", "string", "Response Data Type", "Data type for the output")
            .with_picklist(),
        AttributeDef::new("field", "string", "Response Field", "Field to store the result"),
    ],
    callback_attributes: vec![
        AttributeDef::new("data_type", "string", "Output Data Type", "Output Data Type"),
        AttributeDef::new("field", "string", "Response Field", "Field to store the result"),
        AttributeDef::new("answer", "text", "Formula result", "Formula result"),
        AttributeDef::new("formula_value", "text", "Formula Value", "Formula Value"),
        AttributeDef::new("formula_error", "text", "Formula Error", "Formula Error"),
    ],
    callback_user_driven_mapping: true,
    picklists: vec![Picklist {
        field: "data_type",
        choices: vec!["int", "str", "bool", "float"],
    }],
    response_attribute: Some("field"),
    output_column: "answer",
});

/// Evaluates `formula` and coerces the result to `data_type`.
#[derive(Debug, Default, Clone)]
pub struct FormulaProcessor;

impl FormulaProcessor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Processor for FormulaProcessor {
    fn manifest(&self) -> &ActionManifest {
        &FORMULA_MANIFEST
    }

    async fn process(&self, item: &Item) -> Result<ProcessOutput, ProcessError> {
        let formula = item.input_or("formula", "");
        let data_type = item.input_or("data_type", "str");
        let output_type: OutputType = data_type.parse()?;

        let answer = output_type.coerce(&evaluate(&formula)?)?;
        log::debug!("formula {:?} evaluated to {}", formula, answer);

        Ok(ProcessOutput {
            value: answer.clone(),
            activity: activity([
                ("formula_value", Value::String(formula)),
                ("data_type", Value::String(data_type)),
                ("field", item.context.get("field").cloned().unwrap_or(Value::Null)),
                ("answer", answer),
            ]),
        })
    }

    fn failure_activity(&self, _item: &Item, error: &ItemError) -> Map<String, Value> {
        activity([("formula_error", Value::String(error.describe()))])
    }

    fn input_columns(&self, item: &Item) -> Vec<(String, String)> {
        vec![
            ("formula".to_string(), item.input_or("formula", "")),
            ("data_type".to_string(), item.input_or("data_type", "str")),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(context: Value) -> Item {
        Item::new(0, Some(json!(42)), context.as_object().cloned().unwrap())
    }

    #[test]
    fn test_output_type_names() {
        assert_eq!("INT".parse::<OutputType>().unwrap(), OutputType::Int);
        assert_eq!(" float ".parse::<OutputType>().unwrap(), OutputType::Float);
        let err = "decimal".parse::<OutputType>().unwrap_err();
        assert_eq!(err.to_string(), "Unsupported output_type: decimal");
    }

    #[test]
    fn test_coercions() {
        let n = FormulaValue::Number(2.9);
        assert_eq!(OutputType::Int.coerce(&n).unwrap(), json!(2));
        assert_eq!(OutputType::Int.coerce(&FormulaValue::Number(-2.9)).unwrap(), json!(-2));
        assert_eq!(OutputType::Float.coerce(&n).unwrap(), json!(2.9));
        assert_eq!(OutputType::Str.coerce(&FormulaValue::Number(2.0)).unwrap(), json!("2"));
        assert_eq!(OutputType::Str.coerce(&FormulaValue::Bool(true)).unwrap(), json!("TRUE"));
        assert_eq!(OutputType::Bool.coerce(&FormulaValue::Number(0.0)).unwrap(), json!(false));
        assert_eq!(OutputType::Bool.coerce(&FormulaValue::Text("True".into())).unwrap(), json!(true));
        assert_eq!(OutputType::Int.coerce(&FormulaValue::Text(" 12 ".into())).unwrap(), json!(12));
        assert!(matches!(
            OutputType::Int.coerce(&FormulaValue::Text("twelve".into())),
            Err(ProcessError::Coercion { target: "int", .. })
        ));
        assert!(OutputType::Bool.coerce(&FormulaValue::Text("maybe".into())).is_err());
    }

    #[test]
    fn test_int_coercion_rejects_out_of_range() {
        let two_pow_63 = FormulaValue::Number(9_223_372_036_854_775_808.0);
        assert!(matches!(
            OutputType::Int.coerce(&two_pow_63),
            Err(ProcessError::Coercion { target: "int", .. })
        ));
        assert_eq!(
            OutputType::Int.coerce(&FormulaValue::Number(-9_223_372_036_854_775_808.0)).unwrap(),
            json!(i64::MIN)
        );
    }

    #[tokio::test]
    async fn test_process_success_activity() {
        let out = FormulaProcessor::new()
            .process(&item(json!({"formula": "=1+1", "data_type": "int", "field": "score"})))
            .await
            .unwrap();
        assert_eq!(out.value, json!(2));
        assert_eq!(out.activity["formula_value"], "=1+1");
        assert_eq!(out.activity["data_type"], "int");
        assert_eq!(out.activity["field"], "score");
        assert_eq!(out.activity["answer"], 2);
    }

    #[tokio::test]
    async fn test_process_defaults_to_str() {
        let out = FormulaProcessor::new()
            .process(&item(json!({"formula": "=UPPER(\"ok\")"})))
            .await
            .unwrap();
        assert_eq!(out.value, json!("OK"));
        assert_eq!(out.activity["data_type"], "str");
    }

    #[tokio::test]
    async fn test_process_failures() {
        let processor = FormulaProcessor::new();

        let err = processor
            .process(&item(json!({"formula": "=INVALID(", "data_type": "int"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Formula(FormulaError::Syntax { .. })));

        let err = processor
            .process(&item(json!({"formula": "=1", "data_type": "decimal"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::UnsupportedOutputType(_)));

        let err = processor
            .process(&item(json!({"data_type": "int"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Formula(_)));
    }

    #[test]
    fn test_failure_activity_and_columns() {
        let processor = FormulaProcessor::new();
        let it = item(json!({"formula": "=1/0", "field": "score"}));
        let error = ItemError::new("Formula evaluation failed", "caused by: #DIV/0! division by zero");
        let activity = processor.failure_activity(&it, &error);
        assert_eq!(
            activity["formula_error"],
            "Formula evaluation failed\ncaused by: #DIV/0! division by zero"
        );
        assert_eq!(
            processor.input_columns(&it),
            vec![
                ("formula".to_string(), "=1/0".to_string()),
                ("data_type".to_string(), "str".to_string()),
            ]
        );
        assert_eq!(processor.output_field(&it).as_deref(), Some("score"));
    }

    #[test]
    fn test_manifest() {
        let m = FormulaProcessor::new().manifest().clone();
        assert_eq!(m.items_table(), "calcFormulaLeads");
        assert_eq!(m.picklist("data_type").unwrap().choices, vec!["int", "str", "bool", "float"]);
        assert_eq!(m.service_definition()["primaryAttribute"], "formula");
    }
}
