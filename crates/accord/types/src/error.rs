use thiserror::Error;

/// Rejected state changes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("illegal transition for {entity_id}: {from} -> {to}")]
    IllegalTransition {
        entity_id: String,
        from: String,
        to: String,
    },

    #[error("contract agreement already set on {0}")]
    AgreementAlreadySet(String),

    #[error("unknown state code {0}")]
    UnknownState(i32),
}

/// Malformed filter or sort expressions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("cannot filter by {0}, the field does not exist")]
    UnknownField(String),

    #[error("cannot sort by {0}, the field does not exist")]
    UnknownSortField(String),

    #[error("operator {operator} requires {expected}")]
    InvalidOperand {
        operator: String,
        expected: &'static str,
    },
}
