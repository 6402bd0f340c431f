use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::model::{FieldDef, FieldType, ProblemClass};
use crate::schema::{non_negative, positive, TypedSchema, Validate};

pub const PROBLEM_UID: &str = "knapsack";

/// A 0/1 knapsack instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnapsackInstance {
    pub instance_uid: String,
    #[serde(default)]
    pub origin: String,
    pub num_items: u64,
    /// Sum of item weights divided by the capacity
    pub weight_capacity_ratio: f64,
    #[serde(default)]
    pub is_integral: bool,
    pub capacity: f64,
    pub item_values: Vec<f64>,
    pub item_weights: Vec<f64>,
    #[serde(default)]
    pub schema_version: i64,
}

impl Validate for KnapsackInstance {
    fn validate(&self) -> Result<(), String> {
        if self.num_items == 0 {
            return Err("num_items must be positive".to_string());
        }
        positive("weight_capacity_ratio", self.weight_capacity_ratio)?;
        non_negative("capacity", self.capacity)?;

        let expected = self.num_items as usize;
        if self.item_values.len() != expected {
            return Err(format!(
                "expected {} item values, got {}",
                expected,
                self.item_values.len()
            ));
        }
        if self.item_weights.len() != expected {
            return Err(format!(
                "expected {} item weights, got {}",
                expected,
                self.item_weights.len()
            ));
        }
        for value in self.item_values.iter().chain(&self.item_weights) {
            non_negative("item value/weight", *value)?;
        }

        if self.is_integral
            && !self
                .item_values
                .iter()
                .chain(&self.item_weights)
                .chain(std::iter::once(&self.capacity))
                .all(|v| v.fract() == 0.0)
        {
            return Err(
                "all item values, weights, and the capacity must be integers when is_integral is set"
                    .to_string(),
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnapsackSolution {
    pub instance_uid: String,
    /// Total value of the selected items
    pub objective: f64,
    pub authors: String,
    pub selected_items: Vec<u64>,
    #[serde(default)]
    pub schema_version: i64,
}

impl Validate for KnapsackSolution {
    fn validate(&self) -> Result<(), String> {
        non_negative("objective", self.objective)
    }
}

fn instance_fields() -> Vec<FieldDef> {
    vec![
        FieldDef::new("instance_uid", FieldType::String, "The unique identifier of the instance"),
        FieldDef::new("origin", FieldType::String, "The origin or source of the instance").optional(),
        FieldDef::new("num_items", FieldType::Integer, "The number of items available in the instance"),
        FieldDef::new(
            "weight_capacity_ratio",
            FieldType::Number,
            "The ratio of the total weight of all items to the knapsack capacity",
        ),
        FieldDef::new(
            "is_integral",
            FieldType::Boolean,
            "Whether the capacity, values, and weights are all integral",
        )
        .optional(),
        FieldDef::new("capacity", FieldType::Number, "The total capacity of the knapsack"),
        FieldDef::new("item_values", FieldType::Array, "The values assigned to each item"),
        FieldDef::new("item_weights", FieldType::Array, "The weights assigned to each item"),
        FieldDef::new("schema_version", FieldType::Integer, "Schema version of the instance").optional(),
    ]
}

fn solution_fields() -> Vec<FieldDef> {
    vec![
        FieldDef::new(
            "instance_uid",
            FieldType::String,
            "The unique identifier of the corresponding instance",
        ),
        FieldDef::new("objective", FieldType::Number, "The objective value of the solution"),
        FieldDef::new("authors", FieldType::String, "The authors or contributors of the solution"),
        FieldDef::new("selected_items", FieldType::Array, "Indices of the selected items"),
        FieldDef::new("schema_version", FieldType::Integer, "Schema version of the solution").optional(),
    ]
}

pub fn problem_class() -> ProblemClass {
    ProblemClass::new(
        PROBLEM_UID,
        Arc::new(TypedSchema::<KnapsackInstance>::new("KnapsackInstance", instance_fields())),
    )
    .with_name(
        "Knapsack",
        Some("Select a subset of items maximizing total value without exceeding the capacity."),
    )
    .with_range_filters(&["num_items", "weight_capacity_ratio"])
    .with_boolean_filters(&["is_integral"])
    .with_sort_fields(&["num_items", "weight_capacity_ratio"])
    .with_display_fields(&[
        "instance_uid",
        "num_items",
        "weight_capacity_ratio",
        "is_integral",
        "origin",
    ])
    .with_asset("thumbnail", "png")
    .with_asset("image", "png")
    .with_solutions(
        Arc::new(TypedSchema::<KnapsackSolution>::new("KnapsackSolution", solution_fields())),
        &["objective"],
        &["objective", "authors"],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instance(num_items: u64, integral: bool) -> serde_json::Value {
        json!({
            "instance_uid": "k1",
            "num_items": num_items,
            "weight_capacity_ratio": 1.5,
            "is_integral": integral,
            "capacity": 10,
            "item_values": vec![1.0; num_items as usize],
            "item_weights": vec![2.0; num_items as usize],
        })
    }

    #[test]
    fn test_valid_instance() {
        let class = problem_class();
        let payload = serde_json::to_vec(&instance(3, true)).unwrap();
        let record = class.instance_schema.validate(&payload).unwrap();
        let attributes = class.instance_attributes(&record);
        assert_eq!(attributes["num_items"], json!(3));
        assert_eq!(attributes["is_integral"], json!(true));
        assert_eq!(attributes["origin"], json!(""));
        assert!(!attributes.contains_key("instance_uid"));
    }

    #[test]
    fn test_item_count_mismatch() {
        let mut value = instance(3, false);
        value["item_values"] = json!([1.0]);
        let payload = serde_json::to_vec(&value).unwrap();
        assert!(problem_class().instance_schema.validate(&payload).is_err());
    }

    #[test]
    fn test_integral_check() {
        let mut value = instance(2, true);
        value["item_weights"] = json!([1.5, 2.0]);
        let payload = serde_json::to_vec(&value).unwrap();
        assert!(problem_class().instance_schema.validate(&payload).is_err());
    }
}
