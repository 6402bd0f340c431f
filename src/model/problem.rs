use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{RepositoryError, Result};
use crate::schema::{Record, RecordSchema};

/// Attribute shared by instances and solutions that holds the instance uid
pub const INSTANCE_UID_FIELD: &str = "instance_uid";

/// Attribute under which solution rows expose their generated uid
pub const SOLUTION_UID_FIELD: &str = "solution_uid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Number,
    Boolean,
    String,
    Array,
    Object,
}

impl FieldType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Number)
    }

    /// Name of the type in JSON-Schema vocabulary
    pub fn json_type(&self) -> &'static str {
        match self {
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::String => "string",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.json_type())
    }
}

/// One typed attribute of an instance or solution schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub description: String,
    pub required: bool,
}

impl FieldDef {
    pub fn new(name: &str, field_type: FieldType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            description: description.to_string(),
            required: true,
        }
    }

    /// Mark the field as optional (it has a default in the payload model)
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Solution half of a problem class
#[derive(Clone)]
pub struct SolutionSpec {
    pub schema: Arc<dyn RecordSchema>,
    /// Fields ordering solutions by quality; a leading `-` sorts descending
    pub sort_by: Vec<String>,
    pub display_fields: Vec<String>,
}

/// A configured category of benchmark problem with its schemas and query surface.
#[derive(Clone)]
pub struct ProblemClass {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub instance_schema: Arc<dyn RecordSchema>,
    pub solution: Option<SolutionSpec>,
    pub range_filters: Vec<String>,
    pub boolean_filters: Vec<String>,
    pub sort_fields: Vec<String>,
    pub display_fields: Vec<String>,
    /// Asset class name to file extension, e.g. `thumbnail -> png`
    pub assets: BTreeMap<String, String>,
    pub postfix_query: String,
    pub postfix_query_geq: String,
    pub postfix_query_leq: String,
}

impl fmt::Debug for ProblemClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProblemClass")
            .field("id", &self.id)
            .field("range_filters", &self.range_filters)
            .field("boolean_filters", &self.boolean_filters)
            .field("sort_fields", &self.sort_fields)
            .field("display_fields", &self.display_fields)
            .field("assets", &self.assets)
            .field("has_solutions", &self.solution.is_some())
            .finish()
    }
}

impl ProblemClass {
    pub fn new(id: &str, instance_schema: Arc<dyn RecordSchema>) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            instance_schema,
            solution: None,
            range_filters: Vec::new(),
            boolean_filters: Vec::new(),
            sort_fields: Vec::new(),
            display_fields: Vec::new(),
            assets: BTreeMap::new(),
            postfix_query: String::new(),
            postfix_query_geq: "__geq".to_string(),
            postfix_query_leq: "__leq".to_string(),
        }
    }

    pub fn with_name(mut self, name: &str, description: Option<&str>) -> Self {
        self.name = name.to_string();
        self.description = description.map(str::to_string);
        self
    }

    pub fn with_range_filters(mut self, fields: &[&str]) -> Self {
        self.range_filters = to_strings(fields);
        self
    }

    pub fn with_boolean_filters(mut self, fields: &[&str]) -> Self {
        self.boolean_filters = to_strings(fields);
        self
    }

    pub fn with_sort_fields(mut self, fields: &[&str]) -> Self {
        self.sort_fields = to_strings(fields);
        self
    }

    pub fn with_display_fields(mut self, fields: &[&str]) -> Self {
        self.display_fields = to_strings(fields);
        self
    }

    pub fn with_asset(mut self, asset_class: &str, extension: &str) -> Self {
        self.assets
            .insert(asset_class.to_string(), extension.to_string());
        self
    }

    pub fn with_solutions(
        mut self,
        schema: Arc<dyn RecordSchema>,
        sort_by: &[&str],
        display_fields: &[&str],
    ) -> Self {
        self.solution = Some(SolutionSpec {
            schema,
            sort_by: to_strings(sort_by),
            display_fields: to_strings(display_fields),
        });
        self
    }

    pub fn solution_spec(&self) -> Result<&SolutionSpec> {
        self.solution
            .as_ref()
            .ok_or_else(|| RepositoryError::not_found(format!("solutions for problem '{}'", self.id)))
    }

    pub fn asset_extension(&self, asset_class: &str) -> Result<&str> {
        self.assets.get(asset_class).map(String::as_str).ok_or_else(|| {
            RepositoryError::not_found(format!(
                "asset class '{}' for problem '{}'",
                asset_class, self.id
            ))
        })
    }

    /// Query parameter names for the lower and upper bound of a range filter
    pub fn range_param_names(&self, field: &str) -> (String, String) {
        (
            format!("{}{}{}", field, self.postfix_query, self.postfix_query_geq),
            format!("{}{}{}", field, self.postfix_query, self.postfix_query_leq),
        )
    }

    pub fn boolean_param_name(&self, field: &str) -> String {
        format!("{}{}", field, self.postfix_query)
    }

    /// Attributes mirrored into an instance index row, in declaration order.
    pub fn instance_index_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        for field in self
            .range_filters
            .iter()
            .chain(&self.boolean_filters)
            .chain(&self.sort_fields)
            .chain(&self.display_fields)
        {
            if field != INSTANCE_UID_FIELD && !fields.contains(&field.as_str()) {
                fields.push(field);
            }
        }
        fields
    }

    pub fn solution_index_fields(&self) -> Vec<&str> {
        let Some(solution) = &self.solution else {
            return Vec::new();
        };
        let mut fields: Vec<&str> = Vec::new();
        for field in solution
            .sort_by
            .iter()
            .map(|f| f.trim_start_matches('-'))
            .chain(solution.display_fields.iter().map(String::as_str))
        {
            if field != INSTANCE_UID_FIELD && !fields.contains(&field) {
                fields.push(field);
            }
        }
        fields
    }

    pub fn instance_attributes(&self, record: &Record) -> BTreeMap<String, Value> {
        extract(record, &self.instance_index_fields())
    }

    pub fn solution_attributes(&self, record: &Record) -> BTreeMap<String, Value> {
        extract(record, &self.solution_index_fields())
    }

    /// Public, serializable description of the class.
    pub fn info(&self, url_root: &str) -> ProblemInfo {
        let base = format!("{}/{}", url_root.trim_end_matches('/'), self.id);
        ProblemInfo {
            problem_uid: self.id.clone(),
            problem_name: self.name.clone(),
            problem_description: self.description.clone(),
            uid_attribute: INSTANCE_UID_FIELD.to_string(),
            range_filters: self.range_filters.clone(),
            boolean_filters: self.boolean_filters.clone(),
            sort_fields: self.sort_fields.clone(),
            display_fields: self.display_fields.clone(),
            assets_url_root: format!("{}/assets/", base),
            instances_url_root: format!("{}/instances/", base),
            solutions_url_root: format!("{}/solutions/", base),
            postfix_query: self.postfix_query.clone(),
            postfix_query_leq: self.postfix_query_leq.clone(),
            postfix_query_geq: self.postfix_query_geq.clone(),
            assets: self.assets.clone(),
            solution_index_field: SOLUTION_UID_FIELD.to_string(),
            solution_display_fields: self
                .solution
                .as_ref()
                .map(|s| s.display_fields.clone())
                .unwrap_or_default(),
            solution_sort_by: self
                .solution
                .as_ref()
                .map(|s| s.sort_by.clone())
                .unwrap_or_default(),
        }
    }
}

fn to_strings(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}

fn extract(record: &Record, fields: &[&str]) -> BTreeMap<String, Value> {
    fields
        .iter()
        .map(|field| {
            let value = record.get(*field).cloned().unwrap_or(Value::Null);
            (field.to_string(), value)
        })
        .collect()
}

/// Discoverable metadata of a problem class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemInfo {
    pub problem_uid: String,
    pub problem_name: String,
    pub problem_description: Option<String>,
    pub uid_attribute: String,
    pub range_filters: Vec<String>,
    pub boolean_filters: Vec<String>,
    pub sort_fields: Vec<String>,
    pub display_fields: Vec<String>,
    pub assets_url_root: String,
    pub instances_url_root: String,
    pub solutions_url_root: String,
    pub postfix_query: String,
    pub postfix_query_leq: String,
    pub postfix_query_geq: String,
    pub assets: BTreeMap<String, String>,
    pub solution_index_field: String,
    pub solution_display_fields: Vec<String>,
    pub solution_sort_by: Vec<String>,
}
