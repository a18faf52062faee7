//! `condition`: compare one input field against a value and branch.
//!
//! Config: `field` (dotted path into the input), `operator` (default
//! `equals`) and `value`. Emits the input unchanged plus `conditionMet` on
//! port `"true"` or `"false"`.
//!
//! A bare `condition` entry is also accepted: a boolean, or a
//! `"field == value"` expression.

use crate::BuiltinNode;
use async_trait::async_trait;
use std::str::FromStr;
use weavecore::{Node, NodeContext, NodeError, NodeOutput, Value, ValueMap};
use weaveruntime::{NodeFactory, NodeKind, NodeMetadata, PortDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
    Exists,
}

impl FromStr for Operator {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "equals" | "==" => Operator::Equals,
            "not_equals" | "!=" => Operator::NotEquals,
            "greater_than" | ">" => Operator::GreaterThan,
            "greater_than_or_equal" | ">=" => Operator::GreaterThanOrEqual,
            "less_than" | "<" => Operator::LessThan,
            "less_than_or_equal" | "<=" => Operator::LessThanOrEqual,
            "contains" => Operator::Contains,
            "not_contains" => Operator::NotContains,
            "starts_with" => Operator::StartsWith,
            "ends_with" => Operator::EndsWith,
            "is_empty" => Operator::IsEmpty,
            "is_not_empty" => Operator::IsNotEmpty,
            "exists" => Operator::Exists,
            other => {
                return Err(NodeError::Configuration(format!(
                    "Unsupported condition operator: {}",
                    other
                )))
            }
        })
    }
}

impl Operator {
    /// Evaluate `actual <op> expected`. A missing field is `None`.
    pub fn evaluate(self, actual: Option<&Value>, expected: &Value) -> bool {
        let Some(actual) = actual else {
            return matches!(self, Operator::IsEmpty | Operator::NotEquals | Operator::NotContains);
        };

        let numbers = || Some((actual.to_number()?, expected.to_number()?));
        match self {
            Operator::Equals => actual.loosely_equals(expected),
            Operator::NotEquals => !actual.loosely_equals(expected),
            Operator::GreaterThan => numbers().is_some_and(|(a, b)| a > b),
            Operator::GreaterThanOrEqual => numbers().is_some_and(|(a, b)| a >= b),
            Operator::LessThan => numbers().is_some_and(|(a, b)| a < b),
            Operator::LessThanOrEqual => numbers().is_some_and(|(a, b)| a <= b),
            Operator::Contains => contains(actual, expected),
            Operator::NotContains => !contains(actual, expected),
            Operator::StartsWith => actual.to_text().starts_with(&expected.to_text()),
            Operator::EndsWith => actual.to_text().ends_with(&expected.to_text()),
            Operator::IsEmpty => is_empty(actual),
            Operator::IsNotEmpty => !is_empty(actual),
            Operator::Exists => true,
        }
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| item.loosely_equals(needle)),
        Value::Object(map) => needle.as_str().is_some_and(|key| map.contains_key(key)),
        other => other.to_text().contains(&needle.to_text()),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Parse `"field == value"` into its halves
fn parse_expression(expr: &str) -> Result<(&str, &str), NodeError> {
    let (left, right) = expr
        .split_once("==")
        .ok_or_else(|| NodeError::Configuration(format!("Unsupported condition: {}", expr)))?;
    let right = right.trim().trim_matches(|c| c == '"' || c == '\'');
    Ok((left.trim(), right))
}

pub struct ConditionNode;

impl ConditionNode {
    fn evaluate(config: &ValueMap, input: &Value) -> Result<bool, NodeError> {
        if let Some(field) = config.get("field") {
            let field = field.as_str().ok_or_else(|| NodeError::InvalidInputType {
                field: "field".to_string(),
                expected: "string".to_string(),
                actual: field.type_name().to_string(),
            })?;
            let operator = match config.get("operator") {
                Some(op) => op.as_str().unwrap_or_default().parse()?,
                None => Operator::Equals,
            };
            let expected = config.get("value").cloned().unwrap_or_default();
            return Ok(operator.evaluate(input.get_path(field), &expected));
        }

        match config.get("condition") {
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(expr)) => {
                let (field, expected) = parse_expression(expr)?;
                Ok(Operator::Equals.evaluate(input.get_path(field), &Value::from(expected)))
            }
            Some(other) => Err(NodeError::InvalidInputType {
                field: "condition".to_string(),
                expected: "boolean or string".to_string(),
                actual: other.type_name().to_string(),
            }),
            None => Err(NodeError::Configuration(
                "Missing config: field or condition".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Node for ConditionNode {
    fn node_type(&self) -> &str {
        BuiltinNode::Condition.as_str()
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let met = Self::evaluate(&ctx.config, &ctx.input_value())?;
        let port = if met { "true" } else { "false" };

        ctx.events.info(format!("Condition evaluated to {}", met));
        Ok(NodeOutput::from_data(ctx.inputs)
            .with_output("conditionMet", met)
            .on_port(port))
    }

    fn validate_config(&self, config: &ValueMap) -> Result<(), NodeError> {
        if let Some(op) = config.get("operator") {
            op.as_str().unwrap_or_default().parse::<Operator>()?;
        }
        if !config.contains_key("field") && !config.contains_key("condition") {
            return Err(NodeError::Configuration(
                "Missing config: field or condition".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct ConditionNodeFactory;

impl NodeFactory for ConditionNodeFactory {
    fn create(&self, _config: &ValueMap) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(ConditionNode))
    }

    fn node_type(&self) -> &str {
        BuiltinNode::Condition.as_str()
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Branch on a field comparison".to_string(),
            category: "logic".to_string(),
            kind: NodeKind::Branch,
            inputs: vec![PortDefinition::new("input", "Data to test").required()],
            outputs: vec![
                PortDefinition::new("true", "Taken when the condition holds"),
                PortDefinition::new("false", "Taken otherwise"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(pairs: serde_json::Value) -> ValueMap {
        match Value::from(pairs) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn equals_on_matching_string() {
        let cfg = config(json!({ "field": "status", "operator": "equals", "value": "success" }));
        let input = Value::from(json!({ "status": "success" }));
        assert!(ConditionNode::evaluate(&cfg, &input).unwrap());
    }

    #[test]
    fn greater_than_coerces_numeric_strings() {
        let cfg = config(json!({ "field": "order.total", "operator": "greater_than", "value": "100" }));
        assert!(ConditionNode::evaluate(&cfg, &Value::from(json!({ "order": { "total": 150 } }))).unwrap());
        assert!(!ConditionNode::evaluate(&cfg, &Value::from(json!({ "order": { "total": 50 } }))).unwrap());
        assert!(!ConditionNode::evaluate(&cfg, &Value::from(json!({}))).unwrap());
    }

    #[test]
    fn contains_checks_strings_and_arrays() {
        assert!(Operator::Contains.evaluate(Some(&Value::from("hello world")), &Value::from("world")));
        let tags = Value::from(json!(["a", "b"]));
        assert!(Operator::Contains.evaluate(Some(&tags), &Value::from("b")));
        assert!(Operator::NotContains.evaluate(Some(&tags), &Value::from("c")));
    }

    #[test]
    fn missing_field_only_satisfies_negative_checks() {
        assert!(!Operator::Equals.evaluate(None, &Value::from("x")));
        assert!(Operator::NotEquals.evaluate(None, &Value::from("x")));
        assert!(Operator::IsEmpty.evaluate(None, &Value::Null));
        assert!(!Operator::Exists.evaluate(None, &Value::Null));
    }

    #[test]
    fn legacy_expression_form() {
        let cfg = config(json!({ "condition": "status == 'active'" }));
        assert!(ConditionNode::evaluate(&cfg, &Value::from(json!({ "status": "active" }))).unwrap());

        let fixed = config(json!({ "condition": false }));
        assert!(!ConditionNode::evaluate(&fixed, &Value::Null).unwrap());
    }

    #[test]
    fn unknown_operator_is_a_configuration_error() {
        let cfg = config(json!({ "field": "a", "operator": "roughly" }));
        assert!(matches!(
            ConditionNode.validate_config(&cfg),
            Err(NodeError::Configuration(_))
        ));
    }
}
