use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{RepositoryError, Result};
use crate::logic::write::strip_extension;
use crate::logic::{blocking, Repository};
use crate::model::{
    check_uid, AssetLocation, BooleanFilter, IndexRow, InstanceListing, InstanceQuery,
    ProblemClass, ProblemInfo, ProblemInfoResponse, RangeFilter, SolutionListing, SortSpec,
    INSTANCE_UID_FIELD,
};
use crate::schema::RESERVED_QUERY_PARAMS;
use crate::store::PAYLOAD_SUFFIX;

#[derive(Debug, Clone)]
pub struct QuerySettings {
    /// Public URL prefix of the static file mirror
    pub url_root: String,
    pub default_page_limit: usize,
    pub max_page_limit: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            url_root: "/files".to_string(),
            default_page_limit: 100,
            max_page_limit: 1000,
        }
    }
}

/// Read side of the repository: validated, generic queries over the index
/// plus payload reads from the file store.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    repo: Repository,
    settings: QuerySettings,
}

impl QueryEngine {
    pub fn new(repo: Repository, settings: QuerySettings) -> Self {
        Self { repo, settings }
    }

    pub fn settings(&self) -> &QuerySettings {
        &self.settings
    }

    pub fn get_info(&self, class: &str) -> Result<Arc<ProblemClass>> {
        self.repo.registry.describe(class)
    }

    pub fn list_problems(&self) -> Vec<ProblemInfo> {
        self.repo.registry.infos(&self.settings.url_root)
    }

    /// Turn raw query-string parameters into a typed query for `class`.
    pub fn parse(&self, class: &ProblemClass, params: &BTreeMap<String, String>) -> Result<InstanceQuery> {
        let mut query = InstanceQuery {
            limit: self.settings.default_page_limit,
            ..Default::default()
        };

        let mut remaining: BTreeMap<&str, &str> = params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        for field in &class.range_filters {
            let (geq, leq) = class.range_param_names(field);
            let min = remaining.remove(geq.as_str()).map(|v| parse_bound(&geq, v)).transpose()?;
            let max = remaining.remove(leq.as_str()).map(|v| parse_bound(&leq, v)).transpose()?;
            if min.is_some() || max.is_some() {
                query.ranges.push(RangeFilter {
                    field: field.clone(),
                    min,
                    max,
                });
            }
        }
        for field in &class.boolean_filters {
            let name = class.boolean_param_name(field);
            if let Some(raw) = remaining.remove(name.as_str()) {
                query.booleans.push(BooleanFilter {
                    field: field.clone(),
                    value: parse_bool(&name, raw)?,
                });
            }
        }

        for reserved in RESERVED_QUERY_PARAMS {
            let Some(raw) = remaining.remove(reserved) else {
                continue;
            };
            match reserved {
                "sort_by" if !raw.is_empty() => query.sort = Some(SortSpec::parse(raw)),
                "search" if !raw.is_empty() => query.search = Some(raw.to_string()),
                "offset" => query.offset = parse_count(reserved, raw)?,
                "limit" => query.limit = parse_count(reserved, raw)?,
                _ => {}
            }
        }

        if let Some((name, _)) = remaining.into_iter().next() {
            return Err(RepositoryError::validation(format!(
                "unknown query parameter '{}' for problem '{}'",
                name, class.id
            )));
        }
        Ok(query)
    }

    /// Check a query against the declared surface of `class` and clamp its limit.
    pub fn validate(&self, class: &ProblemClass, query: &InstanceQuery) -> Result<InstanceQuery> {
        let mut query = query.clone();
        for range in &query.ranges {
            if !class.range_filters.contains(&range.field) {
                return Err(undeclared(class, "range filter", &range.field));
            }
            for bound in [range.min, range.max].into_iter().flatten() {
                if !bound.is_finite() {
                    return Err(RepositoryError::validation(format!(
                        "bound on '{}' must be a finite number",
                        range.field
                    )));
                }
            }
            if let (Some(min), Some(max)) = (range.min, range.max) {
                if min > max {
                    return Err(RepositoryError::validation(format!(
                        "lower bound {} on '{}' exceeds upper bound {}",
                        min, range.field, max
                    )));
                }
            }
        }
        for filter in &query.booleans {
            if !class.boolean_filters.contains(&filter.field) {
                return Err(undeclared(class, "boolean filter", &filter.field));
            }
        }
        if let Some(sort) = &query.sort {
            if !class.sort_fields.contains(&sort.field) {
                return Err(undeclared(class, "sort field", &sort.field));
            }
        }
        check_offset(query.offset)?;
        if query.limit > self.settings.max_page_limit {
            log::debug!(
                "Clamping limit {} to {}",
                query.limit,
                self.settings.max_page_limit
            );
            query.limit = self.settings.max_page_limit;
        }
        Ok(query)
    }

    /// Filtered, sorted, paginated instance listing.
    pub async fn query(&self, class_id: &str, query: &InstanceQuery) -> Result<InstanceListing> {
        let class = self.repo.registry.describe(class_id)?;
        let query = self.validate(&class, query)?;
        let page = self.repo.index.query_instances(&class.id, &query).await?;
        log::debug!(
            "Query on '{}' matched {} instances, returning {}",
            class.id,
            page.total,
            page.rows.len()
        );

        let info = class.info(&self.settings.url_root);
        let uids = page.uids();
        let assets = {
            let files = self.repo.files.clone();
            let class = class.clone();
            let uids = uids.clone();
            let url_root = self.settings.url_root.clone();
            blocking(move || {
                let mut assets = BTreeMap::new();
                for uid in &uids {
                    let found = files.available_assets(&class.id, uid, &class.assets)?;
                    let urls = found
                        .into_iter()
                        .map(|(asset_class, path)| (asset_class, file_url(&url_root, &path)))
                        .collect();
                    assets.insert(uid.clone(), urls);
                }
                Ok(assets)
            })
            .await?
        };

        let mut data = BTreeMap::new();
        let mut download_links = BTreeMap::new();
        for row in page.rows {
            download_links.insert(
                row.uid.clone(),
                format!("{}{}{}", info.instances_url_root, row.uid, PAYLOAD_SUFFIX),
            );
            data.insert(row.uid.clone(), display_attributes(&class, row));
        }

        Ok(InstanceListing {
            sorted_uids: uids,
            data,
            assets,
            download_links,
            offset: query.offset,
            limit: query.limit,
            total: page.total,
        })
    }

    /// Parse and run a raw query string.
    pub async fn search(&self, class_id: &str, params: &BTreeMap<String, String>) -> Result<InstanceListing> {
        let class = self.repo.registry.describe(class_id)?;
        let query = self.parse(&class, params)?;
        self.query(class_id, &query).await
    }

    /// Declared query surface of a class plus the current range filter bounds
    pub async fn problem_info(&self, class_id: &str) -> Result<ProblemInfoResponse> {
        let class = self.repo.registry.describe(class_id)?;
        let range_filters = self
            .repo
            .index
            .range_bounds(&class.id, &class.range_filters)
            .await?;
        Ok(ProblemInfoResponse {
            problem_uid: class.id.clone(),
            range_filters,
            boolean_filters: class.boolean_filters.clone(),
            sort_fields: class.sort_fields.clone(),
            display_fields: class.display_fields.clone(),
            assets: class.assets.clone(),
        })
    }

    pub async fn instance_info(&self, class_id: &str, uid: &str) -> Result<IndexRow> {
        let class = self.repo.registry.describe(class_id)?;
        check_uid(uid)?;
        self.repo
            .index
            .get_instance_row(&class.id, uid)
            .await?
            .ok_or_else(|| RepositoryError::not_found(format!("instance '{}'", uid)))
    }

    /// Solutions of one instance in the declared solution order.
    pub async fn solution_info(
        &self,
        class_id: &str,
        instance_uid: &str,
        offset: usize,
        limit: usize,
    ) -> Result<SolutionListing> {
        let class = self.repo.registry.describe(class_id)?;
        let solution = class.solution_spec()?;
        self.instance_info(&class.id, instance_uid).await?;
        check_offset(offset)?;

        let order: Vec<SortSpec> = solution.sort_by.iter().map(|f| SortSpec::parse(f)).collect();
        let limit = limit.min(self.settings.max_page_limit);
        let page = self
            .repo
            .index
            .query_solutions(&class.id, instance_uid, &order, offset, limit)
            .await?;
        Ok(SolutionListing {
            items: page.rows,
            offset,
            limit,
            total: page.total,
        })
    }

    /// Public URLs of the assets present for an instance, keyed by asset class.
    pub async fn asset_info(&self, class_id: &str, uid: &str) -> Result<BTreeMap<String, String>> {
        let class = self.repo.registry.describe(class_id)?;
        check_uid(uid)?;
        let files = self.repo.files.clone();
        let url_root = self.settings.url_root.clone();
        let uid = uid.to_string();
        blocking(move || {
            if !files.instance_exists(&class.id, &uid)? {
                return Err(RepositoryError::not_found(format!("instance '{}'", uid)));
            }
            let found = files.available_assets(&class.id, &uid, &class.assets)?;
            Ok(found
                .into_iter()
                .map(|(asset_class, path)| (asset_class, file_url(&url_root, &path)))
                .collect())
        })
        .await
    }

    pub async fn get_asset(&self, class_id: &str, uid: &str, asset_class: &str) -> Result<AssetLocation> {
        let class = self.repo.registry.describe(class_id)?;
        let extension = class.asset_extension(asset_class)?.to_string();
        let uid = strip_extension(uid, &extension)?;
        let files = self.repo.files.clone();
        let url_root = self.settings.url_root.clone();
        let asset_class = asset_class.to_string();
        blocking(move || {
            let path = files.asset_location(&class.id, &uid, &asset_class, &extension)?;
            Ok(AssetLocation {
                url: file_url(&url_root, &path),
                instance_uid: uid,
                asset_class,
                path,
            })
        })
        .await
    }

    /// Raw instance payload, re-read from the file store
    pub async fn get_instance(&self, class_id: &str, uid: &str) -> Result<Vec<u8>> {
        let class = self.repo.registry.describe(class_id)?;
        let files = self.repo.files.clone();
        let uid = uid.to_string();
        blocking(move || files.get_instance(&class.id, &uid)).await
    }

    pub async fn get_solution(&self, class_id: &str, solution_uid: &str) -> Result<Vec<u8>> {
        let class = self.repo.registry.describe(class_id)?;
        class.solution_spec()?;
        let files = self.repo.files.clone();
        let solution_uid = solution_uid.to_string();
        blocking(move || files.get_solution(&class.id, &solution_uid)).await
    }

    pub fn instance_schema(&self, class_id: &str) -> Result<Value> {
        Ok(self.repo.registry.describe(class_id)?.instance_schema.json_schema())
    }

    pub fn solution_schema(&self, class_id: &str) -> Result<Value> {
        let class = self.repo.registry.describe(class_id)?;
        Ok(class.solution_spec()?.schema.json_schema())
    }
}

fn undeclared(class: &ProblemClass, kind: &str, field: &str) -> RepositoryError {
    RepositoryError::validation(format!(
        "'{}' is not a declared {} of problem '{}'",
        field, kind, class.id
    ))
}

fn parse_bound(name: &str, raw: &str) -> Result<f64> {
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(RepositoryError::validation(format!(
            "query parameter '{}' must be a finite number, got '{}'",
            name, raw
        ))),
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(RepositoryError::validation(format!(
            "query parameter '{}' must be a boolean, got '{}'",
            name, raw
        ))),
    }
}

/// Offsets must fit a signed 64-bit integer for the SQL backend
fn check_offset(offset: usize) -> Result<()> {
    if offset > i64::MAX as usize {
        return Err(RepositoryError::validation(format!(
            "offset {} is out of range",
            offset
        )));
    }
    Ok(())
}

fn parse_count(name: &str, raw: &str) -> Result<usize> {
    raw.trim().parse::<usize>().map_err(|_| {
        RepositoryError::validation(format!(
            "query parameter '{}' must be a non-negative integer, got '{}'",
            name, raw
        ))
    })
}

/// Public URL of a path relative to the file store root
pub fn file_url(url_root: &str, path: &str) -> String {
    format!("{}/{}", url_root.trim_end_matches('/'), path)
}

fn display_attributes(class: &ProblemClass, row: IndexRow) -> BTreeMap<String, Value> {
    let mut attributes = row.attributes;
    attributes.retain(|field, _| class.display_fields.contains(field));
    if class.display_fields.iter().any(|f| f == INSTANCE_UID_FIELD) {
        attributes.insert(INSTANCE_UID_FIELD.to_string(), Value::String(row.uid));
    }
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::testing::{bytes, knapsack, repository};
    use crate::logic::WriteCoordinator;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn seeded() -> (tempfile::TempDir, QueryEngine) {
        let (dir, repo) = repository();
        let writer = WriteCoordinator::new(repo.clone());
        for (uid, n, integral) in [("k1", 5, true), ("k2", 10, false), ("k3", 15, true)] {
            writer
                .create_instance("knapsack", &bytes(&knapsack(uid, n, integral)))
                .await
                .unwrap();
        }
        (dir, QueryEngine::new(repo, QuerySettings::default()))
    }

    #[tokio::test]
    async fn test_parse_query_string() {
        let (_dir, engine) = seeded().await;
        let class = engine.get_info("knapsack").unwrap();
        let query = engine
            .parse(
                &class,
                &params(&[
                    ("num_items__geq", "10"),
                    ("is_integral", "true"),
                    ("sort_by", "-num_items"),
                    ("offset", "2"),
                ]),
            )
            .unwrap();
        assert_eq!(query.ranges.len(), 1);
        assert_eq!(query.ranges[0].min, Some(10.0));
        assert_eq!(query.ranges[0].max, None);
        assert!(query.booleans[0].value);
        assert_eq!(query.sort, Some(SortSpec::parse("-num_items")));
        assert_eq!(query.offset, 2);
        assert_eq!(query.limit, 100);
    }

    #[tokio::test]
    async fn test_parse_rejects_bad_params() {
        let (_dir, engine) = seeded().await;
        let class = engine.get_info("knapsack").unwrap();
        for pairs in [
            vec![("capacity__geq", "1")],
            vec![("num_items__geq", "abc")],
            vec![("num_items__leq", "inf")],
            vec![("is_integral", "maybe")],
            vec![("limit", "-1")],
        ] {
            let err = engine.parse(&class, &params(&pairs)).unwrap_err();
            assert!(matches!(err, RepositoryError::Validation(_)), "{:?}", pairs);
        }
    }

    #[tokio::test]
    async fn test_filter_and_sort() {
        let (_dir, engine) = seeded().await;
        let listing = engine
            .search(
                "knapsack",
                &params(&[("num_items__geq", "10"), ("sort_by", "-num_items")]),
            )
            .await
            .unwrap();
        assert_eq!(listing.sorted_uids, vec!["k3", "k2"]);
        assert_eq!(listing.total, 2);
        assert_eq!(listing.download_links["k3"], "/files/knapsack/instances/k3.json.gz");
        assert_eq!(listing.data["k3"]["num_items"], 15);
        assert_eq!(listing.data["k3"]["instance_uid"], "k3");
    }

    #[tokio::test]
    async fn test_undeclared_sort_and_inverted_bounds() {
        let (_dir, engine) = seeded().await;
        let err = engine
            .search("knapsack", &params(&[("sort_by", "capacity")]))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));

        let err = engine
            .search(
                "knapsack",
                &params(&[("num_items__geq", "20"), ("num_items__leq", "10")]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));

        let err = engine.search("tsp", &params(&[])).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_limit_is_clamped() {
        let (_dir, engine) = seeded().await;
        let listing = engine
            .search("knapsack", &params(&[("limit", "5000")]))
            .await
            .unwrap();
        assert_eq!(listing.limit, 1000);
        assert_eq!(listing.sorted_uids.len(), 3);
    }

    #[tokio::test]
    async fn test_offset_out_of_range() {
        let (_dir, engine) = seeded().await;
        let huge = (i64::MAX as u64 + 1).to_string();
        let err = engine
            .search("knapsack", &params(&[("offset", huge.as_str())]))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));

        let err = engine
            .solution_info("knapsack", "k1", i64::MAX as usize + 1, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));

        let listing = engine
            .search("knapsack", &params(&[("offset", "2")]))
            .await
            .unwrap();
        assert_eq!(listing.sorted_uids.len(), 1);
    }

    #[tokio::test]
    async fn test_problem_info_bounds() {
        let (_dir, engine) = seeded().await;
        let info = engine.problem_info("knapsack").await.unwrap();
        let num_items = info
            .range_filters
            .iter()
            .find(|b| b.field_name == "num_items")
            .unwrap();
        assert_eq!(num_items.min_val, Some(5.0));
        assert_eq!(num_items.max_val, Some(15.0));
    }

    #[tokio::test]
    async fn test_reads() {
        let (_dir, engine) = seeded().await;
        let payload = engine.get_instance("knapsack", "k1").await.unwrap();
        let value: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["num_items"], 5);

        let row = engine.instance_info("knapsack", "k2").await.unwrap();
        assert_eq!(row.attributes["is_integral"], false);

        let err = engine.instance_info("knapsack", "missing").await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
        let err = engine.solution_schema("cvrp_2d").unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }
}
