use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::model::{FieldDef, FieldType, ProblemClass};
use crate::schema::{TypedSchema, Validate};

pub const PROBLEM_UID: &str = "cvrp_2d";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Depot {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub x: f64,
    pub y: f64,
    pub customer_id: u64,
    pub demand: u64,
}

/// Capacitated vehicle routing instance in the euclidean plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cvrp2dInstance {
    pub instance_uid: String,
    #[serde(default)]
    pub origin: String,
    pub vehicle_capacity: u64,
    pub depot: Depot,
    pub customers: Vec<Customer>,
    pub num_customers: u64,
    #[serde(default)]
    pub schema_version: i64,
}

impl Validate for Cvrp2dInstance {
    fn validate(&self) -> Result<(), String> {
        if self.vehicle_capacity == 0 {
            return Err("vehicle_capacity must be positive".to_string());
        }
        if self.customers.len() as u64 != self.num_customers {
            return Err(format!(
                "expected {} customers, got {}",
                self.num_customers,
                self.customers.len()
            ));
        }
        if self
            .customers
            .iter()
            .enumerate()
            .any(|(idx, customer)| customer.customer_id != idx as u64)
        {
            return Err("customer ids must be sequential starting from 0".to_string());
        }
        let coordinates = std::iter::once((self.depot.x, self.depot.y))
            .chain(self.customers.iter().map(|c| (c.x, c.y)));
        for (x, y) in coordinates {
            if !x.is_finite() || !y.is_finite() {
                return Err("coordinates must be finite".to_string());
            }
        }
        Ok(())
    }
}

fn instance_fields() -> Vec<FieldDef> {
    vec![
        FieldDef::new("instance_uid", FieldType::String, "Unique instance ID"),
        FieldDef::new("origin", FieldType::String, "Dataset or benchmark source").optional(),
        FieldDef::new("vehicle_capacity", FieldType::Integer, "Vehicle capacity"),
        FieldDef::new("depot", FieldType::Object, "Depot location"),
        FieldDef::new("customers", FieldType::Array, "List of customers"),
        FieldDef::new(
            "num_customers",
            FieldType::Integer,
            "Total number of customers in the instance",
        ),
        FieldDef::new("schema_version", FieldType::Integer, "Schema version of the instance").optional(),
    ]
}

pub fn problem_class() -> ProblemClass {
    ProblemClass::new(
        PROBLEM_UID,
        Arc::new(TypedSchema::<Cvrp2dInstance>::new("Cvrp2dInstance", instance_fields())),
    )
    .with_name("CVRP (2D)", None)
    .with_range_filters(&["vehicle_capacity", "num_customers"])
    .with_sort_fields(&["vehicle_capacity", "num_customers"])
    .with_display_fields(&["instance_uid", "num_customers", "vehicle_capacity", "origin"])
    .with_asset("thumbnail", "png")
    .with_asset("image", "png")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_customer_ids_must_be_sequential() {
        let payload = json!({
            "instance_uid": "c1",
            "vehicle_capacity": 10,
            "depot": {"x": 0.0, "y": 0.0},
            "customers": [
                {"x": 1.0, "y": 1.0, "customer_id": 1, "demand": 2}
            ],
            "num_customers": 1
        });
        let payload = serde_json::to_vec(&payload).unwrap();
        assert!(problem_class().instance_schema.validate(&payload).is_err());
    }

    #[test]
    fn test_has_no_solutions() {
        assert!(problem_class().solution_spec().is_err());
    }
}
