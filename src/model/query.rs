use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::model::{RangeBounds, SolutionRow};

/// Inclusive bounds on a numeric attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeFilter {
    pub field: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Exact match on a boolean attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BooleanFilter {
    pub field: String,
    pub value: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

impl SortSpec {
    /// Parse `field` or `-field`
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('-') {
            Some(field) => Self {
                field: field.to_string(),
                descending: true,
            },
            None => Self {
                field: raw.to_string(),
                descending: false,
            },
        }
    }
}

/// A filter/sort/pagination request scoped to one problem class.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstanceQuery {
    pub ranges: Vec<RangeFilter>,
    pub booleans: Vec<BooleanFilter>,
    /// Substring of the instance uid
    pub search: Option<String>,
    pub sort: Option<SortSpec>,
    pub offset: usize,
    pub limit: usize,
}

/// Query response in the shape consumed by the web frontend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceListing {
    pub sorted_uids: Vec<String>,
    pub data: BTreeMap<String, BTreeMap<String, Value>>,
    pub assets: BTreeMap<String, BTreeMap<String, String>>,
    pub download_links: BTreeMap<String, String>,
    pub offset: usize,
    pub limit: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionListing {
    pub items: Vec<SolutionRow>,
    pub offset: usize,
    pub limit: usize,
    pub total: usize,
}

/// Metadata about a problem including the current range filter bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemInfoResponse {
    pub problem_uid: String,
    pub range_filters: Vec<RangeBounds>,
    pub boolean_filters: Vec<String>,
    pub sort_fields: Vec<String>,
    pub display_fields: Vec<String>,
    pub assets: BTreeMap<String, String>,
}

/// Outcome of an instance delete, including dependent records removed
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CascadeReport {
    pub instance_uid: String,
    pub solutions_deleted: usize,
    pub assets_deleted: usize,
    pub failures: Vec<String>,
}

impl CascadeReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetLocation {
    pub instance_uid: String,
    pub asset_class: String,
    /// Path relative to the file store root
    pub path: String,
    pub url: String,
}
