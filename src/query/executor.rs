//! Deterministic plan execution
//!
//! The executor is the only producer of answer values: filtering, grouping and
//! aggregation all happen here against a borrowed table.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::cmp::Ordering;
use thiserror::Error;
use tracing::debug;

use super::plan::{AggregateFunction, Comparator, OperationKind, Predicate, QueryPlan};
use crate::clean::rules::parse_date_str;
use crate::table::{Table, Value};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// One group of a grouped aggregation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRow {
    pub key: Value,
    pub value: Value,
    /// Rows that fell into the group
    pub rows: usize,
}

/// Result of executing a plan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryOutput {
    Rows {
        table: Table,
        /// Rows matching the predicate, before select/distinct/limit
        matched: usize,
    },
    Scalar {
        aggregation: AggregateFunction,
        target: String,
        value: Value,
        rows_matched: usize,
    },
    Groups {
        group_by: String,
        aggregation: AggregateFunction,
        target: String,
        groups: Vec<GroupRow>,
    },
}

impl QueryOutput {
    /// Number of result rows (groups for grouped output, 1 for a scalar)
    pub fn row_count(&self) -> usize {
        match self {
            QueryOutput::Rows { table, .. } => table.len(),
            QueryOutput::Scalar { .. } => 1,
            QueryOutput::Groups { groups, .. } => groups.len(),
        }
    }

    pub fn scalar(&self) -> Option<&Value> {
        match self {
            QueryOutput::Scalar { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Values of one output column; for groups, `key` or `value`
    pub fn column_values(&self, column: &str) -> Option<Vec<Value>> {
        match self {
            QueryOutput::Rows { table, .. } => {
                let col = table.resolve_column(column)?;
                Some(table.column_values(col).cloned().collect())
            }
            QueryOutput::Scalar { value, .. } => Some(vec![value.clone()]),
            QueryOutput::Groups { groups, group_by, .. } => {
                if column == "key" || column.eq_ignore_ascii_case(group_by) {
                    Some(groups.iter().map(|g| g.key.clone()).collect())
                } else if column == "value" {
                    Some(groups.iter().map(|g| g.value.clone()).collect())
                } else {
                    None
                }
            }
        }
    }

    /// JSON form handed to the explanation step
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Running state of one aggregation
#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    Sum { sum: f64, integral: bool },
    Mean { sum: f64, count: i64 },
    Min(Option<Value>),
    Max(Option<Value>),
}

/// Total order used for min/max and group keys; mixed kinds fall back to text.
fn order(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    a.compare(b)
        .unwrap_or_else(|| a.to_string().cmp(&b.to_string()))
}

fn numeric(value: &Value, func: AggregateFunction, target: &str) -> ExecutionResult<f64> {
    let parsed = match value {
        Value::Integer(_) | Value::Float(_) | Value::String(_) => value.as_f64(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        ExecutionError::TypeMismatch(format!(
            "{} over '{}' needs numeric values, found {} '{}'",
            func,
            target,
            value.type_name(),
            value
        ))
    })
}

impl Accumulator {
    fn new(func: AggregateFunction) -> Self {
        match func {
            AggregateFunction::Count => Accumulator::Count(0),
            AggregateFunction::Sum => Accumulator::Sum { sum: 0.0, integral: true },
            AggregateFunction::Mean => Accumulator::Mean { sum: 0.0, count: 0 },
            AggregateFunction::Min => Accumulator::Min(None),
            AggregateFunction::Max => Accumulator::Max(None),
        }
    }

    /// Fold one cell in. Nulls are skipped.
    fn update(&mut self, value: &Value, target: &str) -> ExecutionResult<()> {
        if value.is_null() {
            return Ok(());
        }
        match self {
            Accumulator::Count(c) => *c += 1,
            Accumulator::Sum { sum, integral } => {
                *sum += numeric(value, AggregateFunction::Sum, target)?;
                *integral &= matches!(value, Value::Integer(_));
            }
            Accumulator::Mean { sum, count } => {
                *sum += numeric(value, AggregateFunction::Mean, target)?;
                *count += 1;
            }
            Accumulator::Min(curr) => {
                if curr.as_ref().map_or(true, |c| order(value, c) == Ordering::Less) {
                    *curr = Some(value.clone());
                }
            }
            Accumulator::Max(curr) => {
                if curr.as_ref().map_or(true, |c| order(value, c) == Ordering::Greater) {
                    *curr = Some(value.clone());
                }
            }
        }
        Ok(())
    }

    fn result(&self) -> Value {
        match self {
            Accumulator::Count(c) => Value::Integer(*c),
            Accumulator::Sum { sum, integral: true } => Value::Integer(*sum as i64),
            Accumulator::Sum { sum, .. } => Value::Float(*sum),
            Accumulator::Mean { sum, count } => {
                if *count == 0 {
                    Value::Null
                } else {
                    Value::Float(*sum / *count as f64)
                }
            }
            Accumulator::Min(val) | Accumulator::Max(val) => val.clone().unwrap_or(Value::Null),
        }
    }
}

/// Loose equality between a cell and a predicate value.
///
/// Numbers compare numerically, everything else by case-insensitive text.
fn loosely_equal(cell: &Value, rhs: &Value) -> bool {
    if cell.is_null() || rhs.is_null() {
        return cell.is_null() && rhs.is_null();
    }
    if cell.is_numeric() || rhs.is_numeric() {
        if let (Some(a), Some(b)) = (cell.as_f64(), rhs.as_f64()) {
            return a == b;
        }
    }
    cell.to_string().trim().to_lowercase() == rhs.to_string().trim().to_lowercase()
}

fn as_date(value: &Value) -> Option<chrono::NaiveDate> {
    value.as_date().or_else(|| value.as_str().and_then(parse_date_str))
}

/// A compiled predicate bound to a column index
struct BoundPredicate<'a> {
    col: usize,
    predicate: &'a Predicate,
    rhs: Value,
    options: Vec<Value>,
}

impl<'a> BoundPredicate<'a> {
    fn bind(table: &Table, predicate: &'a Predicate) -> ExecutionResult<Self> {
        let col = resolve(table, &predicate.field)?;
        let rhs = Value::from_json(&predicate.value);
        let options = match &predicate.value {
            serde_json::Value::Array(items) => items.iter().map(Value::from_json).collect(),
            _ => vec![rhs.clone()],
        };

        if predicate.op.is_ordering() && rhs.as_f64().is_none() && as_date(&rhs).is_none() {
            return Err(ExecutionError::TypeMismatch(format!(
                "comparator '{}' on '{}' needs a number or date, got {}",
                predicate.op, predicate.field, predicate.value
            )));
        }
        Ok(Self { col, predicate, rhs, options })
    }

    fn ordering(&self, cell: &Value) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (cell.as_f64(), self.rhs.as_f64()) {
            return a.partial_cmp(&b);
        }
        as_date(cell).zip(as_date(&self.rhs)).map(|(a, b)| a.cmp(&b))
    }

    fn matches(&self, row: &[Value]) -> bool {
        let cell = &row[self.col];
        match self.predicate.op {
            Comparator::Eq => loosely_equal(cell, &self.rhs),
            Comparator::Neq => !loosely_equal(cell, &self.rhs),
            Comparator::Contains => {
                !cell.is_null()
                    && cell
                        .to_string()
                        .to_lowercase()
                        .contains(&self.rhs.to_string().to_lowercase())
            }
            Comparator::In => self.options.iter().any(|o| loosely_equal(cell, o)),
            Comparator::Gt => self.ordering(cell) == Some(Ordering::Greater),
            Comparator::Gte => matches!(self.ordering(cell), Some(Ordering::Greater | Ordering::Equal)),
            Comparator::Lt => self.ordering(cell) == Some(Ordering::Less),
            Comparator::Lte => matches!(self.ordering(cell), Some(Ordering::Less | Ordering::Equal)),
        }
    }
}

fn resolve(table: &Table, field: &str) -> ExecutionResult<usize> {
    table
        .resolve_column(field)
        .ok_or_else(|| ExecutionError::UnknownField(field.to_string()))
}

/// Executes validated plans against tables
#[derive(Debug, Clone)]
pub struct PlanExecutor {
    default_limit: usize,
}

impl Default for PlanExecutor {
    fn default() -> Self {
        Self { default_limit: 50 }
    }
}

impl PlanExecutor {
    pub fn new(default_limit: usize) -> Self {
        Self { default_limit }
    }

    pub fn execute(&self, plan: &QueryPlan, table: &Table) -> ExecutionResult<QueryOutput> {
        // Every referenced field must exist before any row is touched
        for field in plan.referenced_fields() {
            resolve(table, field)?;
        }

        let filtered = match &plan.predicate {
            Some(predicate) => {
                let bound = BoundPredicate::bind(table, predicate)?;
                table.filter(|row| bound.matches(row))
            }
            None => table.clone(),
        };
        debug!(
            "Plan {} matched {} of {} row(s)",
            plan.operation,
            filtered.len(),
            table.len()
        );

        match plan.operation {
            OperationKind::Filter => self.rows(plan, filtered),
            OperationKind::Aggregate => {
                let (func, target, col) = aggregation_parts(plan, &filtered)?;
                let mut acc = Accumulator::new(func);
                for value in filtered.column_values(col) {
                    acc.update(value, &target)?;
                }
                Ok(QueryOutput::Scalar {
                    aggregation: func,
                    target,
                    value: acc.result(),
                    rows_matched: filtered.len(),
                })
            }
            OperationKind::GroupAggregate => {
                let (func, target, col) = aggregation_parts(plan, &filtered)?;
                let group_field = plan.group_by.as_deref().unwrap_or_default();
                let key_col = resolve(&filtered, group_field)?;

                let mut index: FxHashMap<Value, usize> = FxHashMap::default();
                let mut groups: Vec<(Value, Accumulator, usize)> = Vec::new();
                for row in filtered.rows() {
                    let key = &row[key_col];
                    if key.is_null() {
                        continue;
                    }
                    let slot = match index.get(key) {
                        Some(&slot) => slot,
                        None => {
                            index.insert(key.clone(), groups.len());
                            groups.push((key.clone(), Accumulator::new(func), 0));
                            groups.len() - 1
                        }
                    };
                    let (_, acc, rows) = &mut groups[slot];
                    acc.update(&row[col], &target)?;
                    *rows += 1;
                }

                groups.sort_by(|a, b| order(&a.0, &b.0));
                Ok(QueryOutput::Groups {
                    group_by: filtered.columns()[key_col].clone(),
                    aggregation: func,
                    target,
                    groups: groups
                        .into_iter()
                        .map(|(key, acc, rows)| GroupRow { key, value: acc.result(), rows })
                        .collect(),
                })
            }
        }
    }

    fn rows(&self, plan: &QueryPlan, filtered: Table) -> ExecutionResult<QueryOutput> {
        let matched = filtered.len();
        let mut table = if plan.select.is_empty() {
            filtered
        } else {
            let cols = plan
                .select
                .iter()
                .map(|f| resolve(&filtered, f))
                .collect::<ExecutionResult<Vec<_>>>()?;
            filtered.project(&cols)
        };

        if plan.distinct {
            let mut seen: FxHashSet<Vec<Value>> = FxHashSet::default();
            table = table.filter(|row| seen.insert(row.to_vec()));
        }

        Ok(QueryOutput::Rows {
            table: table.head(plan.effective_limit(self.default_limit)),
            matched,
        })
    }
}

fn aggregation_parts(plan: &QueryPlan, table: &Table) -> ExecutionResult<(AggregateFunction, String, usize)> {
    let func = plan
        .aggregation
        .ok_or_else(|| ExecutionError::TypeMismatch("plan has no aggregation".to_string()))?;
    let target = plan
        .target
        .as_deref()
        .ok_or_else(|| ExecutionError::TypeMismatch("plan has no target".to_string()))?;
    let col = resolve(table, target)?;
    Ok((func, table.columns()[col].clone(), col))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn staff() -> Table {
        Table::from_rows(
            ["user_id", "name", "department", "salary", "age"],
            vec![
                vec![1.into(), "Ana".into(), "Engineering".into(), 100.0.into(), 30.into()],
                vec![2.into(), "Ben".into(), "Engineering".into(), 80.0.into(), Value::Null],
                vec![3.into(), "Cid".into(), "Sales".into(), Value::Null, 45.into()],
                vec![4.into(), "Dee".into(), "Finance".into(), 70.0.into(), 52.into()],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_accumulators_skip_nulls() {
        let mut mean = Accumulator::new(AggregateFunction::Mean);
        assert_eq!(mean.result(), Value::Null);
        for v in [Value::Integer(2), Value::Null, Value::Float(4.0)] {
            mean.update(&v, "x").unwrap();
        }
        assert_eq!(mean.result(), Value::Float(3.0));

        let mut sum = Accumulator::new(AggregateFunction::Sum);
        sum.update(&Value::Integer(2), "x").unwrap();
        sum.update(&Value::Integer(5), "x").unwrap();
        assert_eq!(sum.result(), Value::Integer(7));

        let mut count = Accumulator::new(AggregateFunction::Count);
        count.update(&Value::Null, "x").unwrap();
        count.update(&Value::from("a"), "x").unwrap();
        assert_eq!(count.result(), Value::Integer(1));
    }

    #[test]
    fn test_sum_over_text_is_type_mismatch() {
        let mut sum = Accumulator::new(AggregateFunction::Sum);
        let err = sum.update(&Value::from("lots"), "salary").unwrap_err();
        assert!(matches!(err, ExecutionError::TypeMismatch(_)));
    }

    #[test]
    fn test_min_max() {
        let plan = QueryPlan::aggregate(None, AggregateFunction::Max, "age");
        let out = PlanExecutor::default().execute(&plan, &staff()).unwrap();
        assert_eq!(out.scalar(), Some(&Value::Integer(52)));

        let plan = QueryPlan::aggregate(None, AggregateFunction::Min, "name");
        let out = PlanExecutor::default().execute(&plan, &staff()).unwrap();
        assert_eq!(out.scalar(), Some(&Value::from("Ana")));
    }

    #[test]
    fn test_comparators() {
        let table = staff();
        let exec = PlanExecutor::default();
        let count = |op, value| {
            let plan = QueryPlan::filter(Some(Predicate::new("age", op, value)));
            exec.execute(&plan, &table).unwrap().row_count()
        };
        assert_eq!(count(Comparator::Gt, json!(30)), 2);
        assert_eq!(count(Comparator::Gte, json!(30)), 3);
        assert_eq!(count(Comparator::Lt, json!("46")), 2);
        assert_eq!(count(Comparator::Lte, json!(29)), 0);
        assert_eq!(count(Comparator::Eq, json!(null)), 1);
        assert_eq!(count(Comparator::Neq, json!(null)), 3);
        assert_eq!(count(Comparator::In, json!([30, 52])), 2);
    }

    #[test]
    fn test_string_predicates_ignore_case() {
        let table = staff();
        let exec = PlanExecutor::default();
        let plan = QueryPlan::filter(Some(Predicate::new("Department", Comparator::Eq, json!("engineering"))));
        assert_eq!(exec.execute(&plan, &table).unwrap().row_count(), 2);
        let plan = QueryPlan::filter(Some(Predicate::new("name", Comparator::Contains, json!("E"))));
        assert_eq!(exec.execute(&plan, &table).unwrap().row_count(), 2);
    }

    #[test]
    fn test_ordering_needs_number_or_date() {
        let plan = QueryPlan::filter(Some(Predicate::new("age", Comparator::Gt, json!("old"))));
        let err = PlanExecutor::default().execute(&plan, &staff()).unwrap_err();
        assert!(matches!(err, ExecutionError::TypeMismatch(_)));
    }

    #[test]
    fn test_group_aggregate_sorted_by_key() {
        let plan = QueryPlan::group_aggregate("department", AggregateFunction::Mean, "salary");
        let out = PlanExecutor::default().execute(&plan, &staff()).unwrap();
        let QueryOutput::Groups { groups, .. } = out else {
            panic!("expected groups");
        };
        let keys: Vec<String> = groups.iter().map(|g| g.key.to_string()).collect();
        assert_eq!(keys, vec!["Engineering", "Finance", "Sales"]);
        assert_eq!(groups[0].value, Value::Float(90.0));
        assert_eq!(groups[0].rows, 2);
        assert_eq!(groups[2].value, Value::Null);
    }

    #[test]
    fn test_select_distinct_limit() {
        let mut plan = QueryPlan::filter(None);
        plan.select = vec!["department".to_string()];
        plan.distinct = true;
        let out = PlanExecutor::default().execute(&plan, &staff()).unwrap();
        assert_eq!(out.row_count(), 3);

        plan.distinct = false;
        plan.limit = Some(0);
        let QueryOutput::Rows { table, matched } = PlanExecutor::default().execute(&plan, &staff()).unwrap() else {
            panic!("expected rows");
        };
        assert_eq!(table.len(), 1);
        assert_eq!(matched, 4);
    }

    #[test]
    fn test_unknown_field() {
        let plan = QueryPlan::aggregate(None, AggregateFunction::Sum, "bonus");
        let err = PlanExecutor::default().execute(&plan, &staff()).unwrap_err();
        assert_eq!(err, ExecutionError::UnknownField("bonus".to_string()));
    }
}
