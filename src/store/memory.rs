use parking_lot::RwLock;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::error::{RepositoryError, Result};
use crate::model::{
    compare_values, IndexRow, InstanceQuery, QueryPage, RangeBounds, SolutionPage, SolutionRow,
    SortSpec,
};
use crate::store::traits::IndexStore;

#[derive(Debug, Default)]
struct Partition {
    instances: BTreeMap<String, IndexRow>,
    solutions: BTreeMap<String, SolutionRow>,
}

/// In-process index backend.
///
/// Since the index is rebuilt from the file store at startup, this is a
/// complete backend for a single server process, and the one tests use.
#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    partitions: RwLock<HashMap<String, Partition>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(row: &IndexRow, query: &InstanceQuery) -> bool {
    let number = |field: &str| row.attributes.get(field).and_then(Value::as_f64);

    for range in &query.ranges {
        if let Some(min) = range.min {
            if !number(&range.field).is_some_and(|v| v >= min) {
                return false;
            }
        }
        if let Some(max) = range.max {
            if !number(&range.field).is_some_and(|v| v <= max) {
                return false;
            }
        }
    }
    for filter in &query.booleans {
        if row.attributes.get(&filter.field) != Some(&Value::Bool(filter.value)) {
            return false;
        }
    }
    if let Some(search) = &query.search {
        if !row.uid.contains(search.as_str()) {
            return false;
        }
    }
    true
}

fn compare_by(
    order: &[SortSpec],
    a: &BTreeMap<String, Value>,
    b: &BTreeMap<String, Value>,
) -> Ordering {
    for spec in order {
        let left = a.get(&spec.field).unwrap_or(&Value::Null);
        let right = b.get(&spec.field).unwrap_or(&Value::Null);
        let ordering = compare_values(left, right);
        let ordering = if spec.descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering.is_ne() {
            return ordering;
        }
    }
    Ordering::Equal
}

#[async_trait::async_trait]
impl IndexStore for MemoryIndexStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get_instance_row(&self, class: &str, uid: &str) -> Result<Option<IndexRow>> {
        let partitions = self.partitions.read();
        Ok(partitions
            .get(class)
            .and_then(|p| p.instances.get(uid))
            .cloned())
    }

    async fn insert_instance_row(&self, class: &str, row: IndexRow) -> Result<()> {
        let mut partitions = self.partitions.write();
        let partition = partitions.entry(class.to_string()).or_default();
        if partition.instances.contains_key(&row.uid) {
            return Err(RepositoryError::Conflict(format!(
                "instance '{}' of problem '{}'",
                row.uid, class
            )));
        }
        partition.instances.insert(row.uid.clone(), row);
        Ok(())
    }

    async fn delete_instance_row(&self, class: &str, uid: &str) -> Result<bool> {
        let mut partitions = self.partitions.write();
        Ok(partitions
            .get_mut(class)
            .and_then(|p| p.instances.remove(uid))
            .is_some())
    }

    async fn query_instances(&self, class: &str, query: &InstanceQuery) -> Result<QueryPage> {
        let partitions = self.partitions.read();
        let Some(partition) = partitions.get(class) else {
            return Ok(QueryPage {
                rows: Vec::new(),
                total: 0,
            });
        };

        // BTreeMap iteration is in uid order, so the stable sort keeps the
        // primary key as tie-breaker.
        let mut matched: Vec<&IndexRow> = partition
            .instances
            .values()
            .filter(|row| matches(row, query))
            .collect();
        if let Some(sort) = &query.sort {
            let order = std::slice::from_ref(sort);
            matched.sort_by(|a, b| compare_by(order, &a.attributes, &b.attributes));
        }

        let total = matched.len();
        let rows = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect();
        Ok(QueryPage { rows, total })
    }

    async fn range_bounds(&self, class: &str, fields: &[String]) -> Result<Vec<RangeBounds>> {
        let partitions = self.partitions.read();
        let mut bounds: Vec<RangeBounds> = fields
            .iter()
            .map(|field| RangeBounds::empty(class, field))
            .collect();
        if let Some(partition) = partitions.get(class) {
            for row in partition.instances.values() {
                for bound in bounds.iter_mut() {
                    if let Some(value) = row.attributes.get(&bound.field_name).and_then(Value::as_f64) {
                        bound.update(value);
                    }
                }
            }
        }
        Ok(bounds)
    }

    async fn instance_rows(&self, class: &str) -> Result<Vec<IndexRow>> {
        let partitions = self.partitions.read();
        Ok(partitions
            .get(class)
            .map(|p| p.instances.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_solution_row(&self, class: &str, solution_uid: &str) -> Result<Option<SolutionRow>> {
        let partitions = self.partitions.read();
        Ok(partitions
            .get(class)
            .and_then(|p| p.solutions.get(solution_uid))
            .cloned())
    }

    async fn insert_solution_row(&self, class: &str, row: SolutionRow) -> Result<()> {
        let mut partitions = self.partitions.write();
        let partition = partitions.entry(class.to_string()).or_default();
        if partition.solutions.contains_key(&row.solution_uid) {
            return Err(RepositoryError::Conflict(format!(
                "solution '{}' of problem '{}'",
                row.solution_uid, class
            )));
        }
        partition.solutions.insert(row.solution_uid.clone(), row);
        Ok(())
    }

    async fn delete_solution_row(&self, class: &str, solution_uid: &str) -> Result<bool> {
        let mut partitions = self.partitions.write();
        Ok(partitions
            .get_mut(class)
            .and_then(|p| p.solutions.remove(solution_uid))
            .is_some())
    }

    async fn delete_solutions_of_instance(&self, class: &str, instance_uid: &str) -> Result<u64> {
        let mut partitions = self.partitions.write();
        let Some(partition) = partitions.get_mut(class) else {
            return Ok(0);
        };
        let before = partition.solutions.len();
        partition
            .solutions
            .retain(|_, row| row.instance_uid != instance_uid);
        Ok((before - partition.solutions.len()) as u64)
    }

    async fn query_solutions(
        &self,
        class: &str,
        instance_uid: &str,
        order: &[SortSpec],
        offset: usize,
        limit: usize,
    ) -> Result<SolutionPage> {
        let partitions = self.partitions.read();
        let mut matched: Vec<&SolutionRow> = partitions
            .get(class)
            .map(|p| {
                p.solutions
                    .values()
                    .filter(|row| row.instance_uid == instance_uid)
                    .collect()
            })
            .unwrap_or_default();
        matched.sort_by(|a, b| compare_by(order, &a.attributes, &b.attributes));

        let total = matched.len();
        let rows = matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok(SolutionPage { rows, total })
    }

    async fn solution_rows(&self, class: &str) -> Result<Vec<SolutionRow>> {
        let partitions = self.partitions.read();
        Ok(partitions
            .get(class)
            .map(|p| p.solutions.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn truncate(&self, class: &str) -> Result<()> {
        self.partitions.write().remove(class);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BooleanFilter, RangeFilter};
    use serde_json::json;

    fn row(uid: &str, num_items: i64, integral: bool) -> IndexRow {
        IndexRow {
            uid: uid.to_string(),
            attributes: BTreeMap::from([
                ("num_items".to_string(), json!(num_items)),
                ("is_integral".to_string(), json!(integral)),
            ]),
            file_path: format!("knapsack/instances/{}.json.gz", uid),
        }
    }

    async fn seeded() -> MemoryIndexStore {
        let store = MemoryIndexStore::new();
        for (uid, n, integral) in [("a", 5, true), ("b", 10, false), ("c", 15, true), ("d", 10, true)] {
            store.insert_instance_row("knapsack", row(uid, n, integral)).await.unwrap();
        }
        store
    }

    fn query() -> InstanceQuery {
        InstanceQuery {
            limit: 100,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_insert_conflict() {
        let store = seeded().await;
        let err = store
            .insert_instance_row("knapsack", row("a", 1, false))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        // Same uid in a different class is fine
        store.insert_instance_row("cvrp_2d", row("a", 1, false)).await.unwrap();
    }

    #[tokio::test]
    async fn test_range_and_boolean_filters() {
        let store = seeded().await;
        let mut q = query();
        q.ranges.push(RangeFilter {
            field: "num_items".to_string(),
            min: Some(10.0),
            max: None,
        });
        let page = store.query_instances("knapsack", &q).await.unwrap();
        assert_eq!(page.uids(), vec!["b", "c", "d"]);

        q.booleans.push(BooleanFilter {
            field: "is_integral".to_string(),
            value: true,
        });
        let page = store.query_instances("knapsack", &q).await.unwrap();
        assert_eq!(page.uids(), vec!["c", "d"]);
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn test_sort_with_ties_uses_uid() {
        let store = seeded().await;
        let mut q = query();
        q.sort = Some(SortSpec::parse("-num_items"));
        let page = store.query_instances("knapsack", &q).await.unwrap();
        assert_eq!(page.uids(), vec!["c", "b", "d", "a"]);

        q.sort = Some(SortSpec::parse("num_items"));
        let page = store.query_instances("knapsack", &q).await.unwrap();
        assert_eq!(page.uids(), vec!["a", "b", "d", "c"]);
    }

    #[tokio::test]
    async fn test_pagination_reports_total() {
        let store = seeded().await;
        let mut q = query();
        q.offset = 1;
        q.limit = 2;
        let page = store.query_instances("knapsack", &q).await.unwrap();
        assert_eq!(page.uids(), vec!["b", "c"]);
        assert_eq!(page.total, 4);
    }

    #[tokio::test]
    async fn test_range_bounds() {
        let store = seeded().await;
        let bounds = store
            .range_bounds("knapsack", &["num_items".to_string()])
            .await
            .unwrap();
        assert_eq!(bounds[0].min_val, Some(5.0));
        assert_eq!(bounds[0].max_val, Some(15.0));
    }

    #[tokio::test]
    async fn test_solutions_by_instance() {
        let store = MemoryIndexStore::new();
        for (uid, instance, objective) in [("a/1", "a", 3), ("a/2", "a", 7), ("b/1", "b", 1)] {
            store
                .insert_solution_row(
                    "knapsack",
                    SolutionRow {
                        solution_uid: uid.to_string(),
                        instance_uid: instance.to_string(),
                        attributes: BTreeMap::from([("objective".to_string(), json!(objective))]),
                        file_path: String::new(),
                    },
                )
                .await
                .unwrap();
        }
        let order = vec![SortSpec::parse("-objective")];
        let page = store
            .query_solutions("knapsack", "a", &order, 0, 10)
            .await
            .unwrap();
        let uids: Vec<&str> = page.rows.iter().map(|r| r.solution_uid.as_str()).collect();
        assert_eq!(uids, vec!["a/2", "a/1"]);

        assert_eq!(store.delete_solutions_of_instance("knapsack", "a").await.unwrap(), 2);
        assert_eq!(store.solution_rows("knapsack").await.unwrap().len(), 1);
    }
}
