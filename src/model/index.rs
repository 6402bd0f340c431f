use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Derived, queryable mirror of one instance file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRow {
    #[serde(rename = "instance_uid")]
    pub uid: String,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
    /// Location of the payload relative to the file store root
    #[serde(skip)]
    pub file_path: String,
}

/// Derived, queryable mirror of one solution file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionRow {
    pub solution_uid: String,
    pub instance_uid: String,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(skip)]
    pub file_path: String,
}

/// Observed minimum and maximum of a range-filter attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeBounds {
    pub problem_uid: String,
    pub field_name: String,
    pub min_val: Option<f64>,
    pub max_val: Option<f64>,
}

impl RangeBounds {
    pub fn empty(problem_uid: &str, field_name: &str) -> Self {
        Self {
            problem_uid: problem_uid.to_string(),
            field_name: field_name.to_string(),
            min_val: None,
            max_val: None,
        }
    }

    /// Widen the bounds to include `value`; non-finite values are ignored.
    pub fn update(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match (self.min_val, self.max_val) {
            (Some(min), Some(max)) => {
                let mut changed = false;
                if value < min {
                    self.min_val = Some(value);
                    changed = true;
                }
                if value > max {
                    self.max_val = Some(value);
                    changed = true;
                }
                changed
            }
            _ => {
                self.min_val = Some(value);
                self.max_val = Some(value);
                true
            }
        }
    }
}

/// A page of matched instance rows plus the match count before pagination
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    pub rows: Vec<IndexRow>,
    pub total: usize,
}

impl QueryPage {
    pub fn uids(&self) -> Vec<String> {
        self.rows.iter().map(|row| row.uid.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolutionPage {
    pub rows: Vec<SolutionRow>,
    pub total: usize,
}

/// Total order over attribute values, matching PostgreSQL's jsonb ordering:
/// object > array > boolean > number > string > null.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::String(_) => 1,
            Value::Number(_) => 2,
            Value::Bool(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x.len().cmp(&y.len()).then_with(|| {
            x.iter()
                .zip(y)
                .map(|(l, r)| compare_values(l, r))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        }),
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => rank(a).cmp(&rank(b)),
    }
}
