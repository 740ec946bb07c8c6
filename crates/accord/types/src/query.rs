//! Store filter expressions and query specifications.

use crate::error::QueryError;
use crate::negotiation::NegotiationType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Comparison operator of a [`Criterion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    NotEq,
    In,
    Lt,
    Gt,
    /// SQL style pattern: `%` matches any run of characters, `_` one character.
    Like,
}

impl FromStr for Operator {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "=" => Ok(Self::Eq),
            "!=" => Ok(Self::NotEq),
            "in" => Ok(Self::In),
            "<" => Ok(Self::Lt),
            ">" => Ok(Self::Gt),
            "like" => Ok(Self::Like),
            other => Err(QueryError::UnsupportedOperator(other.to_string())),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::In => "in",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Like => "like",
        })
    }
}

/// `(field, operator, value)`. A list of criteria is a conjunction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub operand_left: String,
    pub operator: Operator,
    pub operand_right: Value,
}

impl Criterion {
    pub fn new(operand_left: impl Into<String>, operator: Operator, operand_right: impl Into<Value>) -> Self {
        Self {
            operand_left: operand_left.into(),
            operator,
            operand_right: operand_right.into(),
        }
    }

    /// Build a criterion from a textual operator, checking the operand shape.
    pub fn parse(
        operand_left: impl Into<String>,
        operator: &str,
        operand_right: Value,
    ) -> Result<Self, QueryError> {
        let operator: Operator = operator.parse()?;
        match (operator, &operand_right) {
            (Operator::In, Value::Array(_)) | (Operator::Like, Value::String(_)) => {}
            (Operator::In, _) => {
                return Err(QueryError::InvalidOperand {
                    operator: operator.to_string(),
                    expected: "a list",
                })
            }
            (Operator::Like, _) => {
                return Err(QueryError::InvalidOperand {
                    operator: operator.to_string(),
                    expected: "a string pattern",
                })
            }
            _ => {}
        }
        Ok(Self::new(operand_left, operator, operand_right))
    }

    pub fn has_state(code: i32) -> Self {
        Self::new("state", Operator::Eq, code)
    }

    pub fn has_states(codes: &[i32]) -> Self {
        Self::new(
            "state",
            Operator::In,
            Value::Array(codes.iter().copied().map(Value::from).collect()),
        )
    }

    pub fn is_not_pending() -> Self {
        Self::new("pending", Operator::Eq, false)
    }

    pub fn has_type(negotiation_type: NegotiationType) -> Self {
        Self::new("type", Operator::Eq, negotiation_type.as_str())
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.operand_left, self.operator, self.operand_right)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Filter, sort and page for store queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    #[serde(default)]
    pub filter: Vec<Criterion>,
    pub sort_field: Option<String>,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self {
            filter: Vec::new(),
            sort_field: None,
            sort_order: SortOrder::Asc,
            offset: 0,
            limit: default_limit(),
        }
    }
}

impl QuerySpec {
    pub fn filter(mut self, criterion: Criterion) -> Self {
        self.filter.push(criterion);
        self
    }

    pub fn sorted_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort_field = Some(field.into());
        self.sort_order = order;
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operators_parse_case_insensitively() {
        assert_eq!("LIKE".parse::<Operator>(), Ok(Operator::Like));
        assert_eq!(" != ".parse::<Operator>(), Ok(Operator::NotEq));
        assert_eq!(
            "contains".parse::<Operator>(),
            Err(QueryError::UnsupportedOperator("contains".to_string()))
        );
    }

    #[test]
    fn parse_checks_operand_shape() {
        assert!(Criterion::parse("state", "in", json!([100, 200])).is_ok());
        assert!(matches!(
            Criterion::parse("state", "in", json!(100)),
            Err(QueryError::InvalidOperand { .. })
        ));
        assert!(matches!(
            Criterion::parse("protocol", "like", json!(1)),
            Err(QueryError::InvalidOperand { .. })
        ));
    }

    #[test]
    fn query_spec_defaults() {
        let spec: QuerySpec = serde_json::from_value(json!({ "sort_field": null })).unwrap();
        assert_eq!(spec, QuerySpec::default());
        assert_eq!(spec.limit, 50);
    }
}
