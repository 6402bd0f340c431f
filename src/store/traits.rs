use crate::error::Result;
use crate::model::{IndexRow, InstanceQuery, QueryPage, RangeBounds, SolutionPage, SolutionRow, SortSpec};

/// Queryable secondary index, partitioned by problem class.
///
/// The index is a derived cache of the file store: it can be truncated and
/// regenerated at any time by the reconciler.
#[async_trait::async_trait]
pub trait IndexStore: Send + Sync {
    /// Human readable backend name for logs
    fn backend(&self) -> &'static str;

    async fn get_instance_row(&self, class: &str, uid: &str) -> Result<Option<IndexRow>>;
    /// Insert a row; fails with `Conflict` if the uid is already indexed
    async fn insert_instance_row(&self, class: &str, row: IndexRow) -> Result<()>;
    async fn delete_instance_row(&self, class: &str, uid: &str) -> Result<bool>;
    /// Filtered, sorted, paginated scan. Fields are assumed validated.
    async fn query_instances(&self, class: &str, query: &InstanceQuery) -> Result<QueryPage>;
    async fn range_bounds(&self, class: &str, fields: &[String]) -> Result<Vec<RangeBounds>>;
    /// All instance rows of a class ordered by uid
    async fn instance_rows(&self, class: &str) -> Result<Vec<IndexRow>>;

    async fn get_solution_row(&self, class: &str, solution_uid: &str) -> Result<Option<SolutionRow>>;
    async fn insert_solution_row(&self, class: &str, row: SolutionRow) -> Result<()>;
    async fn delete_solution_row(&self, class: &str, solution_uid: &str) -> Result<bool>;
    async fn delete_solutions_of_instance(&self, class: &str, instance_uid: &str) -> Result<u64>;
    /// Solutions of one instance ordered by `order`, ties broken by solution uid
    async fn query_solutions(
        &self,
        class: &str,
        instance_uid: &str,
        order: &[SortSpec],
        offset: usize,
        limit: usize,
    ) -> Result<SolutionPage>;
    /// All solution rows of a class ordered by solution uid
    async fn solution_rows(&self, class: &str) -> Result<Vec<SolutionRow>>;

    /// Drop every row of a class partition
    async fn truncate(&self, class: &str) -> Result<()>;
}
