//! Query plan types and parsing of planner output

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::{QueryError, QueryResult};
use crate::llm::extract_json_block;

/// Largest row limit a plan may request
pub const MAX_LIMIT: usize = 200;

/// Kind of operation a plan performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Filter,
    Aggregate,
    GroupAggregate,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Filter => "filter",
            OperationKind::Aggregate => "aggregate",
            OperationKind::GroupAggregate => "group_aggregate",
        }
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "filter" | "select" => Ok(OperationKind::Filter),
            "aggregate" => Ok(OperationKind::Aggregate),
            "group_aggregate" | "group_by" | "groupby" => Ok(OperationKind::GroupAggregate),
            other => Err(other.to_string()),
        }
    }
}

/// Predicate comparator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Neq,
    Contains,
    In,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Eq => "eq",
            Comparator::Neq => "neq",
            Comparator::Contains => "contains",
            Comparator::In => "in",
            Comparator::Gt => "gt",
            Comparator::Gte => "gte",
            Comparator::Lt => "lt",
            Comparator::Lte => "lte",
        }
    }

    /// Whether the comparator orders values rather than testing equality
    pub fn is_ordering(&self) -> bool {
        matches!(self, Comparator::Gt | Comparator::Gte | Comparator::Lt | Comparator::Lte)
    }
}

impl FromStr for Comparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eq" | "=" | "==" | "equals" => Ok(Comparator::Eq),
            "neq" | "ne" | "!=" | "<>" | "not_equals" => Ok(Comparator::Neq),
            "contains" | "like" => Ok(Comparator::Contains),
            "in" => Ok(Comparator::In),
            "gt" | ">" => Ok(Comparator::Gt),
            "gte" | "ge" | ">=" => Ok(Comparator::Gte),
            "lt" | "<" => Ok(Comparator::Lt),
            "lte" | "le" | "<=" => Ok(Comparator::Lte),
            other => Err(format!("unknown comparator '{}'", other)),
        }
    }
}

/// Aggregation function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Mean,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Mean => "mean",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }
}

impl FromStr for AggregateFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "count" => Ok(AggregateFunction::Count),
            "sum" | "total" => Ok(AggregateFunction::Sum),
            "mean" | "avg" | "average" => Ok(AggregateFunction::Mean),
            "min" | "minimum" => Ok(AggregateFunction::Min),
            "max" | "maximum" => Ok(AggregateFunction::Max),
            other => Err(format!("unknown aggregation '{}'", other)),
        }
    }
}

macro_rules! string_serde {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    )*};
}

string_serde!(OperationKind, Comparator, AggregateFunction);

/// Single-field predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    #[serde(alias = "column")]
    pub field: String,
    #[serde(alias = "operator")]
    pub op: Comparator,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Predicate {
    pub fn new(field: impl Into<String>, op: Comparator, value: serde_json::Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Structured plan produced by the planner and executed deterministically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub operation: OperationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<Predicate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregateFunction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Columns to return for filter plans; empty means all
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub select: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Drop duplicate result rows for filter plans
    #[serde(default, deserialize_with = "null_as_default")]
    pub distinct: bool,
}

impl QueryPlan {
    pub fn filter(predicate: Option<Predicate>) -> Self {
        Self {
            operation: OperationKind::Filter,
            predicate,
            group_by: None,
            aggregation: None,
            target: None,
            select: Vec::new(),
            limit: None,
            distinct: false,
        }
    }

    pub fn aggregate(
        predicate: Option<Predicate>,
        aggregation: AggregateFunction,
        target: impl Into<String>,
    ) -> Self {
        Self {
            operation: OperationKind::Aggregate,
            aggregation: Some(aggregation),
            target: Some(target.into()),
            ..Self::filter(predicate)
        }
    }

    pub fn group_aggregate(
        group_by: impl Into<String>,
        aggregation: AggregateFunction,
        target: impl Into<String>,
    ) -> Self {
        Self {
            operation: OperationKind::GroupAggregate,
            group_by: Some(group_by.into()),
            ..Self::aggregate(None, aggregation, target)
        }
    }

    /// Parse planner output, which may be fenced or wrapped in prose.
    ///
    /// An unrecognised `operation` is `UnsupportedOperation`; any other shape
    /// problem, including invariant violations, is `PlanParse`.
    pub fn from_model_output(output: &str) -> QueryResult<Self> {
        let body = extract_json_block(output);
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| QueryError::PlanParse(format!("invalid JSON: {}", e)))?;

        let Some(object) = value.as_object() else {
            return Err(QueryError::PlanParse("plan must be a JSON object".to_string()));
        };
        match object.get("operation") {
            Some(serde_json::Value::String(op)) => {
                if let Err(unknown) = op.parse::<OperationKind>() {
                    return Err(QueryError::UnsupportedOperation(unknown));
                }
            }
            Some(other) => {
                return Err(QueryError::PlanParse(format!(
                    "operation must be a string, got {}",
                    other
                )))
            }
            None => return Err(QueryError::PlanParse("missing field 'operation'".to_string())),
        }

        let plan: QueryPlan =
            serde_json::from_value(value).map_err(|e| QueryError::PlanParse(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Check the structural invariants between operation, aggregation, target and group_by
    pub fn validate(&self) -> QueryResult<()> {
        let fail = |msg: &str| Err(QueryError::PlanParse(msg.to_string()));

        if self.aggregation.is_some() != self.target.is_some() {
            return fail("aggregation and target must be given together");
        }
        if self.group_by.is_some() && self.aggregation.is_none() {
            return fail("group_by requires an aggregation");
        }
        match self.operation {
            OperationKind::Filter if self.aggregation.is_some() => {
                fail("filter plans cannot carry an aggregation")
            }
            OperationKind::Aggregate | OperationKind::GroupAggregate if self.aggregation.is_none() => {
                fail("aggregate plans require an aggregation")
            }
            OperationKind::Aggregate if self.group_by.is_some() => {
                fail("group_by requires the group_aggregate operation")
            }
            OperationKind::GroupAggregate if self.group_by.is_none() => {
                fail("group_aggregate plans require group_by")
            }
            _ => Ok(()),
        }
    }

    /// Row limit for filter output, clamped to `1..=MAX_LIMIT`
    pub fn effective_limit(&self, default_limit: usize) -> usize {
        self.limit.unwrap_or(default_limit).clamp(1, MAX_LIMIT)
    }

    /// Every column name the plan refers to
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        if let Some(p) = &self.predicate {
            fields.push(&p.field);
        }
        if let Some(g) = &self.group_by {
            fields.push(g);
        }
        if let Some(t) = &self.target {
            fields.push(t);
        }
        fields.extend(self.select.iter().map(String::as_str));
        fields
    }
}
