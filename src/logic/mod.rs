pub mod query;
pub mod reconcile;
pub mod write;

pub use query::*;
pub use reconcile::*;
pub use write::*;

use std::sync::Arc;

use crate::error::{RepositoryError, Result};
use crate::schema::SchemaRegistry;
use crate::store::{FileStore, IndexStore};

/// Handles shared by the query engine, write coordinator and reconciler.
#[derive(Clone)]
pub struct Repository {
    pub registry: Arc<SchemaRegistry>,
    pub files: FileStore,
    pub index: Arc<dyn IndexStore>,
}

impl Repository {
    pub fn new(registry: Arc<SchemaRegistry>, files: FileStore, index: Arc<dyn IndexStore>) -> Self {
        Self {
            registry,
            files,
            index,
        }
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("classes", &self.registry.list_problem_classes())
            .field("files", &self.files.root())
            .field("index", &self.index.backend())
            .finish()
    }
}

/// Run blocking file store work off the async executor.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| RepositoryError::Internal(format!("blocking task failed: {}", e)))?
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::problems;
    use crate::store::MemoryIndexStore;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    /// Repository over a temporary directory and the memory index
    pub fn repository() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let registry = SchemaRegistry::load(problems::builtin(), None).unwrap();
        let files = FileStore::open(dir.path()).unwrap();
        let repo = Repository::new(Arc::new(registry), files, Arc::new(MemoryIndexStore::new()));
        (dir, repo)
    }

    pub fn knapsack(uid: &str, num_items: usize, is_integral: bool) -> Value {
        json!({
            "instance_uid": uid,
            "origin": "generated",
            "num_items": num_items,
            "weight_capacity_ratio": 0.5,
            "is_integral": is_integral,
            "capacity": 10.0,
            "item_values": vec![1.0; num_items],
            "item_weights": vec![1.0; num_items],
        })
    }

    pub fn bytes(value: &Value) -> Vec<u8> {
        serde_json::to_vec(value).unwrap()
    }
}
