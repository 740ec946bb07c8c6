//! Criterion evaluation over entity fields.
//!
//! Fields are resolved through [`StatefulEntity::field`]. Filtering by a field
//! the entity type does not declare, or sorting by one, is a query error
//! rather than an empty result.

use accord_types::{Criterion, Operator, QueryError, QuerySpec, SortOrder, StatefulEntity};
use serde_json::Value;
use std::cmp::Ordering;

/// Whether `entity` satisfies every criterion.
pub fn matches<E: StatefulEntity>(entity: &E, criteria: &[Criterion]) -> Result<bool, QueryError> {
    for criterion in criteria {
        if !evaluate(entity, criterion)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Check that every field referenced by `criteria` exists on `E`.
pub fn validate_criteria<E: StatefulEntity>(criteria: &[Criterion]) -> Result<(), QueryError> {
    for criterion in criteria {
        if !E::FIELDS.contains(&criterion.operand_left.as_str()) {
            return Err(QueryError::UnknownField(criterion.operand_left.clone()));
        }
        check_operand(criterion)?;
    }
    Ok(())
}

/// Apply filter, sort and paging to `entities`.
pub fn resolve<E: StatefulEntity>(
    entities: impl IntoIterator<Item = E>,
    spec: &QuerySpec,
) -> Result<Vec<E>, QueryError> {
    validate_criteria::<E>(&spec.filter)?;
    if let Some(field) = &spec.sort_field {
        if !E::FIELDS.contains(&field.as_str()) {
            return Err(QueryError::UnknownSortField(field.clone()));
        }
    }

    let mut selected = Vec::new();
    for entity in entities {
        if matches(&entity, &spec.filter)? {
            selected.push(entity);
        }
    }

    match &spec.sort_field {
        Some(field) => selected.sort_by(|a, b| {
            let ordering = compare_fields(a.field(field), b.field(field));
            match spec.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        }),
        // deterministic default order
        None => selected.sort_by(|a, b| a.id().cmp(b.id())),
    }

    Ok(selected
        .into_iter()
        .skip(spec.offset)
        .take(spec.limit)
        .collect())
}

fn evaluate<E: StatefulEntity>(entity: &E, criterion: &Criterion) -> Result<bool, QueryError> {
    let left = entity
        .field(&criterion.operand_left)
        .ok_or_else(|| QueryError::UnknownField(criterion.operand_left.clone()))?;
    let right = &criterion.operand_right;

    Ok(match criterion.operator {
        Operator::Eq => values_equal(&left, right),
        Operator::NotEq => !values_equal(&left, right),
        Operator::Lt => compare_values(&left, right) == Some(Ordering::Less),
        Operator::Gt => compare_values(&left, right) == Some(Ordering::Greater),
        Operator::In => match right {
            Value::Array(items) => items.iter().any(|item| values_equal(&left, item)),
            _ => return Err(invalid_operand(criterion.operator, "a list")),
        },
        Operator::Like => match (right, &left) {
            (Value::String(pattern), Value::String(text)) => like(text, pattern),
            (Value::String(_), _) => false,
            _ => return Err(invalid_operand(criterion.operator, "a string pattern")),
        },
    })
}

fn check_operand(criterion: &Criterion) -> Result<(), QueryError> {
    match (criterion.operator, &criterion.operand_right) {
        (Operator::In, Value::Array(_)) | (Operator::Like, Value::String(_)) => Ok(()),
        (Operator::In, _) => Err(invalid_operand(Operator::In, "a list")),
        (Operator::Like, _) => Err(invalid_operand(Operator::Like, "a string pattern")),
        _ => Ok(()),
    }
}

fn invalid_operand(operator: Operator, expected: &'static str) -> QueryError {
    QueryError::InvalidOperand {
        operator: operator.to_string(),
        expected,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Ordering between two scalar values of the same kind.
fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Sort comparator. Missing and null values compare equal to anything.
fn compare_fields(left: Option<Value>, right: Option<Value>) -> Ordering {
    match (left, right) {
        (Some(a), Some(b)) => compare_values(&a, &b).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

/// SQL `LIKE`: `%` is any run of characters, `_` exactly one.
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    // dp[j]: pattern[..i] matches text[..j]
    let mut dp = vec![false; text.len() + 1];
    dp[0] = true;
    for p in &pattern {
        let mut next = vec![false; text.len() + 1];
        match p {
            '%' => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= dp[j];
                    next[j] = seen;
                }
            }
            '_' => {
                for j in 1..=text.len() {
                    next[j] = dp[j - 1];
                }
            }
            c => {
                for j in 1..=text.len() {
                    next[j] = dp[j - 1] && text[j - 1] == *c;
                }
            }
        }
        dp = next;
    }
    dp[text.len()]
}
