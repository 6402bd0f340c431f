use itertools::Itertools;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::error::{RepositoryError, Result};
use crate::model::{check_name, FieldType, ProblemClass, ProblemInfo, INSTANCE_UID_FIELD};
use crate::schema::RecordSchema;

/// Query parameter names the query engine reserves for itself
pub const RESERVED_QUERY_PARAMS: [&str; 4] = ["sort_by", "search", "offset", "limit"];

/// Immutable set of problem classes, validated once at startup.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    classes: BTreeMap<String, Arc<ProblemClass>>,
}

impl SchemaRegistry {
    /// Validate and register the given classes. When `enabled` is set, only
    /// the listed ids are kept (and every listed id must exist).
    pub fn load(classes: Vec<ProblemClass>, enabled: Option<&[String]>) -> Result<Self> {
        let mut registered = BTreeMap::new();
        for class in classes {
            if let Some(enabled) = enabled {
                if !enabled.contains(&class.id) {
                    log::info!("Skipping problem class '{}' (not enabled)", class.id);
                    continue;
                }
            }
            validate_class(&class)?;
            if registered.contains_key(&class.id) {
                return Err(RepositoryError::Configuration(format!(
                    "problem class '{}' is registered twice",
                    class.id
                )));
            }
            log::info!(
                "Registered problem class '{}' (range filters: [{}], boolean filters: [{}], sort fields: [{}])",
                class.id,
                class.range_filters.iter().join(", "),
                class.boolean_filters.iter().join(", "),
                class.sort_fields.iter().join(", ")
            );
            registered.insert(class.id.clone(), Arc::new(class));
        }

        if let Some(enabled) = enabled {
            let missing: Vec<&String> = enabled
                .iter()
                .filter(|id| !registered.contains_key(*id))
                .collect();
            if !missing.is_empty() {
                return Err(RepositoryError::Configuration(format!(
                    "enabled problem classes are not defined: {}",
                    missing.iter().join(", ")
                )));
            }
        }

        Ok(Self {
            classes: registered,
        })
    }

    pub fn describe(&self, problem_class_id: &str) -> Result<Arc<ProblemClass>> {
        self.classes
            .get(problem_class_id)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(format!("problem '{}'", problem_class_id)))
    }

    /// Registered ids in ascending order
    pub fn list_problem_classes(&self) -> Vec<String> {
        self.classes.keys().cloned().collect()
    }

    pub fn classes(&self) -> impl Iterator<Item = &Arc<ProblemClass>> {
        self.classes.values()
    }

    pub fn infos(&self, url_root: &str) -> Vec<ProblemInfo> {
        self.classes.values().map(|c| c.info(url_root)).collect()
    }
}

fn config_error(class: &ProblemClass, message: String) -> RepositoryError {
    RepositoryError::Configuration(format!("problem class '{}': {}", class.id, message))
}

fn validate_class(class: &ProblemClass) -> Result<()> {
    check_name("problem class", &class.id).map_err(|e| config_error(class, e.to_string()))?;

    let instance = class.instance_schema.as_ref();
    match instance.field(INSTANCE_UID_FIELD) {
        Some(field) if field.field_type == FieldType::String => {}
        _ => {
            return Err(config_error(
                class,
                format!("instance schema must declare a string '{}'", INSTANCE_UID_FIELD),
            ))
        }
    }

    check_declared(class, instance, "range filter", &class.range_filters, |t| {
        t.is_numeric()
    })?;
    check_declared(class, instance, "boolean filter", &class.boolean_filters, |t| {
        t == FieldType::Boolean
    })?;
    check_declared(class, instance, "sort field", &class.sort_fields, |_| true)?;
    check_declared(class, instance, "display field", &class.display_fields, |_| true)?;

    if let Some(solution) = &class.solution {
        let schema = solution.schema.as_ref();
        if schema.field(INSTANCE_UID_FIELD).is_none() {
            return Err(config_error(
                class,
                format!("solution schema must declare '{}'", INSTANCE_UID_FIELD),
            ));
        }
        let sort_fields: Vec<String> = solution
            .sort_by
            .iter()
            .map(|f| f.trim_start_matches('-').to_string())
            .collect();
        check_declared(class, schema, "solution sort field", &sort_fields, |_| true)?;
        check_declared(
            class,
            schema,
            "solution display field",
            &solution.display_fields,
            |_| true,
        )?;
    }

    for (asset_class, extension) in &class.assets {
        check_name("asset class", asset_class).map_err(|e| config_error(class, e.to_string()))?;
        if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(config_error(
                class,
                format!("asset '{}' has invalid extension '{}'", asset_class, extension),
            ));
        }
    }

    for postfix in [
        &class.postfix_query,
        &class.postfix_query_geq,
        &class.postfix_query_leq,
    ] {
        if !postfix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(config_error(
                class,
                format!(
                    "query postfix '{}' may only contain alphanumeric characters and underscores",
                    postfix
                ),
            ));
        }
    }
    if class.postfix_query_geq == class.postfix_query_leq {
        return Err(config_error(
            class,
            "lower and upper bound postfixes must differ".to_string(),
        ));
    }

    let mut params: HashSet<String> = HashSet::new();
    let generated = class
        .range_filters
        .iter()
        .flat_map(|f| {
            let (geq, leq) = class.range_param_names(f);
            [geq, leq]
        })
        .chain(class.boolean_filters.iter().map(|f| class.boolean_param_name(f)));
    for param in generated {
        if RESERVED_QUERY_PARAMS.contains(&param.as_str()) {
            return Err(config_error(
                class,
                format!("query parameter '{}' is a reserved name", param),
            ));
        }
        if !params.insert(param.clone()) {
            return Err(config_error(
                class,
                format!("query parameter '{}' is generated twice", param),
            ));
        }
    }

    Ok(())
}

fn check_declared(
    class: &ProblemClass,
    schema: &dyn RecordSchema,
    kind: &str,
    fields: &[String],
    type_ok: impl Fn(FieldType) -> bool,
) -> Result<()> {
    for name in fields {
        let Some(field) = schema.field(name) else {
            return Err(config_error(
                class,
                format!("{} '{}' is not defined in schema {}", kind, name, schema.title()),
            ));
        };
        if !type_ok(field.field_type) {
            return Err(config_error(
                class,
                format!("{} '{}' has unsupported type {}", kind, name, field.field_type),
            ));
        }
    }
    Ok(())
}
