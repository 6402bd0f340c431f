use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::model::{FieldDef, FieldType, ProblemClass};
use crate::schema::{TypedSchema, Validate};

pub const PROBLEM_UID: &str = "job_shop";

/// Job shop scheduling instance.
///
/// Row `j` of `times` holds the processing times of job `j`'s operations and
/// row `j` of `machines` the machine each operation runs on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobShopInstance {
    pub instance_uid: String,
    #[serde(default)]
    pub origin: String,
    pub number_of_jobs: u64,
    pub number_of_machines: u64,
    pub time_seed: u64,
    pub machine_seed: u64,
    pub upper_bound: u64,
    pub lower_bound: u64,
    pub times: Vec<Vec<i64>>,
    pub machines: Vec<Vec<i64>>,
}

impl Validate for JobShopInstance {
    fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("number_of_jobs", self.number_of_jobs),
            ("number_of_machines", self.number_of_machines),
            ("time_seed", self.time_seed),
            ("machine_seed", self.machine_seed),
            ("upper_bound", self.upper_bound),
            ("lower_bound", self.lower_bound),
        ] {
            if value == 0 {
                return Err(format!("{} must be positive", name));
            }
        }
        if self.lower_bound > self.upper_bound {
            return Err(format!(
                "lower_bound {} exceeds upper_bound {}",
                self.lower_bound, self.upper_bound
            ));
        }
        if self.times.len() != self.machines.len() {
            return Err("times and machines must have the same number of jobs".to_string());
        }
        for (job, (times, machines)) in self.times.iter().zip(&self.machines).enumerate() {
            if times.is_empty() {
                return Err(format!("job {} has no operations", job));
            }
            if times.len() != machines.len() {
                return Err(format!(
                    "job {} has {} processing times but {} machine assignments",
                    job,
                    times.len(),
                    machines.len()
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobShopSolution {
    pub instance_uid: String,
    #[serde(default)]
    pub makespan: Option<i64>,
    #[serde(default)]
    pub authors: Option<String>,
}

impl Validate for JobShopSolution {
    fn validate(&self) -> Result<(), String> {
        match self.makespan {
            Some(makespan) if makespan < 0 => Err("makespan must be non-negative".to_string()),
            _ => Ok(()),
        }
    }
}

fn instance_fields() -> Vec<FieldDef> {
    vec![
        FieldDef::new("instance_uid", FieldType::String, "The unique identifier of the instance"),
        FieldDef::new("origin", FieldType::String, "The origin or source of the instance").optional(),
        FieldDef::new("number_of_jobs", FieldType::Integer, "The number of jobs"),
        FieldDef::new("number_of_machines", FieldType::Integer, "The number of machines"),
        FieldDef::new("time_seed", FieldType::Integer, "Seed used for generating processing times"),
        FieldDef::new(
            "machine_seed",
            FieldType::Integer,
            "Seed used for assigning machines to operations",
        ),
        FieldDef::new("upper_bound", FieldType::Integer, "Upper bound on the makespan"),
        FieldDef::new("lower_bound", FieldType::Integer, "Lower bound on the makespan"),
        FieldDef::new("times", FieldType::Array, "Processing times per job and operation"),
        FieldDef::new("machines", FieldType::Array, "Machine index per job and operation"),
    ]
}

fn solution_fields() -> Vec<FieldDef> {
    vec![
        FieldDef::new(
            "instance_uid",
            FieldType::String,
            "The unique identifier of the corresponding instance",
        ),
        FieldDef::new("makespan", FieldType::Integer, "Makespan of the schedule").optional(),
        FieldDef::new("authors", FieldType::String, "The authors of the solution").optional(),
    ]
}

pub fn problem_class() -> ProblemClass {
    ProblemClass::new(
        PROBLEM_UID,
        Arc::new(TypedSchema::<JobShopInstance>::new("JobShopInstance", instance_fields())),
    )
    .with_name("Job Shop Scheduling", None)
    .with_range_filters(&[
        "number_of_jobs",
        "number_of_machines",
        "upper_bound",
        "lower_bound",
    ])
    .with_sort_fields(&[
        "number_of_jobs",
        "number_of_machines",
        "upper_bound",
        "lower_bound",
    ])
    .with_display_fields(&[
        "instance_uid",
        "number_of_jobs",
        "number_of_machines",
        "time_seed",
        "machine_seed",
        "upper_bound",
        "lower_bound",
    ])
    .with_asset("thumbnail", "png")
    .with_asset("image", "png")
    .with_solutions(
        Arc::new(TypedSchema::<JobShopSolution>::new("JobShopSolution", solution_fields())),
        &["makespan"],
        &["makespan", "authors"],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shape_mismatch_rejected() {
        let payload = json!({
            "instance_uid": "ft06",
            "number_of_jobs": 2,
            "number_of_machines": 2,
            "time_seed": 1,
            "machine_seed": 2,
            "upper_bound": 60,
            "lower_bound": 55,
            "times": [[1, 2], [3, 4]],
            "machines": [[0, 1], [1]]
        });
        let payload = serde_json::to_vec(&payload).unwrap();
        assert!(problem_class().instance_schema.validate(&payload).is_err());
    }

    #[test]
    fn test_solution_without_makespan() {
        let class = problem_class();
        let record = class
            .solution_spec()
            .unwrap()
            .schema
            .validate(br#"{"instance_uid": "ft06"}"#)
            .unwrap();
        let attributes = class.solution_attributes(&record);
        assert_eq!(attributes["makespan"], serde_json::Value::Null);
    }
}
