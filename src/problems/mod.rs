//! Built-in problem class descriptors.
//!
//! Each module defines the instance (and optional solution) model of one
//! problem class and its declared query surface. Adding a class means adding
//! a module here and listing it in [`builtin`]; the query engine and index
//! store need no changes.

pub mod cvrp_2d;
pub mod job_shop;
pub mod knapsack;

use crate::model::ProblemClass;

pub fn builtin() -> Vec<ProblemClass> {
    vec![
        knapsack::problem_class(),
        cvrp_2d::problem_class(),
        job_shop::problem_class(),
    ]
}
