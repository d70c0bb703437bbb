//! Filter Compiler
//!
//! Translates a declarative constraint set into a composable read predicate:
//! - input: field name → `{operator, value}`
//! - operators: `==`, `!=`, `>`, `>=`, `<`, `<=`, `like`, `in`
//! - all conditions combine with AND
//!
//! Field names are resolved against the entity descriptor before any SQL is
//! produced. Identifiers only ever come from static descriptors; operands are
//! always bound parameters.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::schema::ddl::quote;
use crate::schema::{EntityDef, SqlType};
use crate::value::Value;
use crate::{Error, Result};

/// Comparison operators understood by the compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    /// SQL LIKE pattern match
    Like,
    /// Set membership
    In,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::NotEq => "!=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Like => "like",
            Operator::In => "in",
        }
    }

    fn sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "<>",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Like => "LIKE",
            Operator::In => "IN",
        }
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "==" | "=" | "eq" => Ok(Operator::Eq),
            "!=" | "<>" | "ne" => Ok(Operator::NotEq),
            ">" | "gt" => Ok(Operator::Gt),
            ">=" | "ge" => Ok(Operator::Ge),
            "<" | "lt" => Ok(Operator::Lt),
            "<=" | "le" => Ok(Operator::Le),
            "like" => Ok(Operator::Like),
            "in" => Ok(Operator::In),
            _ => Err(Error::InvalidArgument(format!("Unknown filter operator: {}", s))),
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_operator() -> String {
    Operator::Eq.as_str().to_string()
}

/// One field constraint.
///
/// The operator is kept as written so that the compiler, not the
/// deserializer, decides what happens to unknown operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default = "default_operator")]
    pub operator: String,
    pub value: Value,
}

impl Condition {
    pub fn new(operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            operator: operator.as_str().to_string(),
            value: value.into(),
        }
    }

    pub fn eq(value: impl Into<Value>) -> Self {
        Self::new(Operator::Eq, value)
    }

    pub fn is_in(values: impl Into<Value>) -> Self {
        Self::new(Operator::In, values)
    }
}

/// Field name → condition, combined with AND
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filters {
    conditions: BTreeMap<String, Condition>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.conditions.insert(field.into(), condition);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Condition)> {
        self.conditions.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidArgument(format!("invalid filters: {}", e)))
    }
}

/// What to do with an operator the compiler does not know
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownOperatorPolicy {
    /// Fail the whole request
    #[default]
    Reject,
    /// Drop the condition and log it; the read becomes less restrictive
    Ignore,
}

#[derive(Debug, Clone, PartialEq)]
enum ClauseKind {
    Compare(Operator, Value),
    IsNull,
    IsNotNull,
    InList(Vec<Value>),
    /// Membership in the empty set
    Never,
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    column: &'static str,
    kind: ClauseKind,
}

/// A compiled, AND-combined predicate over one entity's columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

impl Predicate {
    /// The predicate that matches every row
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Primary-key lookup
    pub(crate) fn id_eq(id: i64) -> Self {
        Self {
            clauses: vec![Clause {
                column: "id",
                kind: ClauseKind::Compare(Operator::Eq, Value::Integer(id)),
            }],
        }
    }

    /// Conjunction of two predicates over the same entity
    pub fn and(mut self, other: Predicate) -> Self {
        self.clauses.extend(other.clauses);
        self
    }

    /// Render to a SQL fragment and its positional parameters.
    ///
    /// Columns are prefixed with `qualifier.` when one is given. An empty
    /// predicate renders as `1 = 1`.
    pub fn to_sql(&self, qualifier: Option<&str>) -> (String, Vec<Value>) {
        if self.clauses.is_empty() {
            return ("1 = 1".to_string(), Vec::new());
        }

        let mut params = Vec::new();
        let parts: Vec<String> = self
            .clauses
            .iter()
            .map(|clause| {
                let column = match qualifier {
                    Some(q) => format!("{}.{}", q, quote(clause.column)),
                    None => quote(clause.column),
                };
                match &clause.kind {
                    ClauseKind::Compare(op, value) => {
                        params.push(value.clone());
                        format!("{} {} ?", column, op.sql())
                    }
                    ClauseKind::IsNull => format!("{} IS NULL", column),
                    ClauseKind::IsNotNull => format!("{} IS NOT NULL", column),
                    ClauseKind::InList(values) => {
                        params.extend(values.iter().cloned());
                        let marks = vec!["?"; values.len()].join(", ");
                        format!("{} IN ({})", column, marks)
                    }
                    ClauseKind::Never => "0 = 1".to_string(),
                }
            })
            .collect();

        (parts.join(" AND "), params)
    }
}

/// Compiles [`Filters`] against an entity descriptor
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterCompiler {
    policy: UnknownOperatorPolicy,
}

impl FilterCompiler {
    pub fn new(policy: UnknownOperatorPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> UnknownOperatorPolicy {
        self.policy
    }

    pub fn compile(&self, def: &EntityDef, filters: &Filters) -> Result<Predicate> {
        // Resolve every field first so an unknown name fails the request
        // regardless of what else is wrong with it.
        let mut resolved = Vec::new();
        for (field, condition) in filters.iter() {
            resolved.push((def.column(field)?, condition));
        }

        let mut predicate = Predicate::all();
        for (column, condition) in resolved {
            let op = match condition.operator.parse::<Operator>() {
                Ok(op) => op,
                Err(err) => match self.policy {
                    UnknownOperatorPolicy::Reject => return Err(err),
                    UnknownOperatorPolicy::Ignore => {
                        tracing::warn!(
                            "Ignoring filter on {}.{} with unknown operator '{}'",
                            def.name,
                            column.name,
                            condition.operator
                        );
                        continue;
                    }
                },
            };

            let kind = compile_condition(column.name, column.sql_type, op, condition.value.clone())?;
            predicate.clauses.push(Clause {
                column: column.name,
                kind,
            });
        }

        tracing::debug!("Compiled {} filter clause(s) for {}", predicate.clauses.len(), def.name);
        Ok(predicate)
    }
}

fn compile_condition(column: &str, sql_type: SqlType, op: Operator, value: Value) -> Result<ClauseKind> {
    match (op, value) {
        (Operator::In, Value::List(items)) => {
            // NULL never equals anything, so null entries cannot match
            let items = items
                .into_iter()
                .filter(|v| !v.is_null())
                .map(|v| match v {
                    Value::List(_) => Err(Error::InvalidArgument(format!(
                        "'in' on {} takes a list of scalar values",
                        column
                    ))),
                    v => v.coerce(sql_type),
                })
                .collect::<Result<Vec<_>>>()?;
            if items.is_empty() {
                return Ok(ClauseKind::Never);
            }
            Ok(ClauseKind::InList(items))
        }
        (Operator::In, other) => Err(Error::InvalidArgument(format!(
            "'in' on {} takes a list, got {}",
            column,
            other.type_name()
        ))),
        (Operator::Eq, Value::Null) => Ok(ClauseKind::IsNull),
        (Operator::NotEq, Value::Null) => Ok(ClauseKind::IsNotNull),
        (op, Value::Null) => Err(Error::InvalidArgument(format!(
            "'{}' on {} cannot compare against null",
            op, column
        ))),
        (Operator::Like, value) => {
            if sql_type != SqlType::Text {
                return Err(Error::InvalidArgument(format!(
                    "'like' needs a text column, {} is {}",
                    column, sql_type
                )));
            }
            Ok(ClauseKind::Compare(Operator::Like, value.coerce(sql_type)?))
        }
        (op, value) => Ok(ClauseKind::Compare(op, value.coerce(sql_type)?)),
    }
}
