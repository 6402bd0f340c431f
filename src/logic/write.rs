use serde_json::Value;

use crate::error::{RepositoryError, Result};
use crate::logic::{blocking, Repository};
use crate::model::{check_uid, CascadeReport, IndexRow, ProblemClass, SolutionRow, INSTANCE_UID_FIELD};
use crate::schema::Record;

/// Write side of the repository.
///
/// Every mutation touches the file store first and the index second. A file
/// written without its index row is repaired by the next rebuild; the reverse
/// never happens.
#[derive(Debug, Clone)]
pub struct WriteCoordinator {
    repo: Repository,
}

impl WriteCoordinator {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Validate and store a new instance, then index it.
    pub async fn create_instance(&self, class_id: &str, payload: &[u8]) -> Result<IndexRow> {
        let class = self.repo.registry.describe(class_id)?;
        let record = class.instance_schema.validate(payload)?;
        let uid = reference(&record, INSTANCE_UID_FIELD)?;
        check_uid(&uid)?;

        let file_path = {
            let files = self.repo.files.clone();
            let (class_id, uid, payload) = (class.id.clone(), uid.clone(), payload.to_vec());
            blocking(move || files.put_instance(&class_id, &uid, &payload)).await?
        };

        let row = IndexRow {
            uid,
            attributes: class.instance_attributes(&record),
            file_path,
        };
        match self.repo.index.insert_instance_row(&class.id, row.clone()).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => return Err(e),
            Err(e) => log::error!(
                "Instance {}/{} stored but not indexed, a rebuild will pick it up: {}",
                class.id,
                row.uid,
                e
            ),
        }

        log::info!("Created instance {}/{}", class.id, row.uid);
        Ok(row)
    }

    /// Delete an instance together with its solutions and assets.
    ///
    /// Dependent records are removed best-effort. Failures among them are
    /// reported as `PartialFailure` once the instance itself is gone.
    pub async fn delete_instance(&self, class_id: &str, uid: &str) -> Result<CascadeReport> {
        let class = self.repo.registry.describe(class_id)?;
        check_uid(uid)?;
        let exists = {
            let files = self.repo.files.clone();
            let (class_id, uid) = (class.id.clone(), uid.to_string());
            blocking(move || files.instance_exists(&class_id, &uid)).await?
        };
        if !exists {
            return Err(RepositoryError::not_found(format!("instance '{}'", uid)));
        }

        let mut report = CascadeReport {
            instance_uid: uid.to_string(),
            ..Default::default()
        };
        if class.solution.is_some() {
            self.delete_solutions_of(&class, uid, &mut report).await;
        }
        self.delete_assets_of(&class, uid, &mut report).await;

        {
            let files = self.repo.files.clone();
            let (class_id, uid) = (class.id.clone(), uid.to_string());
            blocking(move || files.delete_instance(&class_id, &uid)).await?;
        }
        if !self.repo.index.delete_instance_row(&class.id, uid).await? {
            log::warn!("Instance {}/{} had no index row", class.id, uid);
        }

        log::info!(
            "Deleted instance {}/{} with {} solutions and {} assets",
            class.id,
            uid,
            report.solutions_deleted,
            report.assets_deleted
        );
        if report.is_complete() {
            Ok(report)
        } else {
            log::warn!(
                "Cascade delete of {}/{} left {} dependent records behind",
                class.id,
                uid,
                report.failures.len()
            );
            Err(RepositoryError::PartialFailure {
                message: format!("instance '{}' deleted, but some dependent records remain", uid),
                failures: report.failures,
            })
        }
    }

    async fn delete_solutions_of(&self, class: &ProblemClass, uid: &str, report: &mut CascadeReport) {
        let solution_uids = {
            let files = self.repo.files.clone();
            let (class_id, uid) = (class.id.clone(), uid.to_string());
            blocking(move || files.list_solution_uids_of_instance(&class_id, &uid)).await
        };
        let solution_uids = match solution_uids {
            Ok(uids) => uids,
            Err(e) => {
                report.failures.push(format!("listing solutions: {}", e));
                Vec::new()
            }
        };

        for solution_uid in solution_uids {
            let files = self.repo.files.clone();
            let class_id = class.id.clone();
            let target = solution_uid.clone();
            match blocking(move || files.delete_solution(&class_id, &target)).await {
                Ok(()) | Err(RepositoryError::NotFound(_)) => report.solutions_deleted += 1,
                Err(e) => report
                    .failures
                    .push(format!("solution '{}': {}", solution_uid, e)),
            }
        }

        if let Err(e) = self.repo.index.delete_solutions_of_instance(&class.id, uid).await {
            report.failures.push(format!("solution index rows: {}", e));
        }
    }

    async fn delete_assets_of(&self, class: &ProblemClass, uid: &str, report: &mut CascadeReport) {
        let files = self.repo.files.clone();
        let (class_id, uid, declared) = (class.id.clone(), uid.to_string(), class.assets.clone());
        let outcome = blocking(move || {
            let mut deleted = 0;
            let mut failures = Vec::new();
            for (asset_class, extension) in &declared {
                match files.delete_asset(&class_id, &uid, asset_class, extension) {
                    Ok(()) => deleted += 1,
                    Err(RepositoryError::NotFound(_)) => {}
                    Err(e) => failures.push(format!("asset '{}': {}", asset_class, e)),
                }
            }
            Ok((deleted, failures))
        })
        .await;

        match outcome {
            Ok((deleted, failures)) => {
                report.assets_deleted += deleted;
                report.failures.extend(failures);
            }
            Err(e) => report.failures.push(format!("assets: {}", e)),
        }
    }

    /// Validate and store a solution of an existing instance.
    pub async fn create_solution(&self, class_id: &str, payload: &[u8]) -> Result<SolutionRow> {
        let class = self.repo.registry.describe(class_id)?;
        let spec = class.solution_spec()?;
        let record = spec.schema.validate(payload)?;
        let instance_uid = reference(&record, INSTANCE_UID_FIELD)?;
        check_uid(&instance_uid)?;

        let exists = {
            let files = self.repo.files.clone();
            let (class_id, uid) = (class.id.clone(), instance_uid.clone());
            blocking(move || files.instance_exists(&class_id, &uid)).await?
        };
        if !exists {
            return Err(RepositoryError::not_found(format!("instance '{}'", instance_uid)));
        }

        let solution_uid = format!("{}/{}", instance_uid, uuid::Uuid::new_v4().simple());
        let file_path = {
            let files = self.repo.files.clone();
            let (class_id, solution_uid, payload) =
                (class.id.clone(), solution_uid.clone(), payload.to_vec());
            blocking(move || files.put_solution(&class_id, &solution_uid, &payload)).await?
        };

        let row = SolutionRow {
            solution_uid,
            instance_uid,
            attributes: class.solution_attributes(&record),
            file_path,
        };
        match self.repo.index.insert_solution_row(&class.id, row.clone()).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => return Err(e),
            Err(e) => log::error!(
                "Solution {}/{} stored but not indexed, a rebuild will pick it up: {}",
                class.id,
                row.solution_uid,
                e
            ),
        }

        log::info!("Created solution {}/{}", class.id, row.solution_uid);
        Ok(row)
    }

    pub async fn delete_solution(&self, class_id: &str, solution_uid: &str) -> Result<()> {
        let class = self.repo.registry.describe(class_id)?;
        class.solution_spec()?;
        {
            let files = self.repo.files.clone();
            let (class_id, solution_uid) = (class.id.clone(), solution_uid.to_string());
            blocking(move || files.delete_solution(&class_id, &solution_uid)).await?;
        }
        self.repo.index.delete_solution_row(&class.id, solution_uid).await?;
        log::info!("Deleted solution {}/{}", class.id, solution_uid);
        Ok(())
    }

    /// Store (or replace) an asset of an existing instance.
    ///
    /// `uid` may carry the asset file extension, which must then match the
    /// one declared for `asset_class`. Returns the path relative to the
    /// file store root.
    pub async fn put_asset(&self, class_id: &str, uid: &str, asset_class: &str, bytes: Vec<u8>) -> Result<String> {
        let class = self.repo.registry.describe(class_id)?;
        let extension = class.asset_extension(asset_class)?.to_string();
        let uid = strip_extension(uid, &extension)?;

        let files = self.repo.files.clone();
        let (class_id, asset_class) = (class.id.clone(), asset_class.to_string());
        let path = blocking(move || {
            if !files.instance_exists(&class_id, &uid)? {
                return Err(RepositoryError::not_found(format!("instance '{}'", uid)));
            }
            files.put_asset(&class_id, &uid, &asset_class, &extension, &bytes)
        })
        .await?;
        log::info!("Stored asset {}", path);
        Ok(path)
    }

    pub async fn delete_asset(&self, class_id: &str, uid: &str, asset_class: &str) -> Result<()> {
        let class = self.repo.registry.describe(class_id)?;
        let extension = class.asset_extension(asset_class)?.to_string();
        let uid = strip_extension(uid, &extension)?;

        let files = self.repo.files.clone();
        let (class_id, asset_class) = (class.id.clone(), asset_class.to_string());
        blocking(move || files.delete_asset(&class_id, &uid, &asset_class, &extension)).await
    }
}

/// The string value of a reference attribute of a validated record
fn reference(record: &Record, field: &str) -> Result<String> {
    match record.get(field) {
        Some(Value::String(uid)) => Ok(uid.clone()),
        _ => Err(RepositoryError::validation(format!(
            "'{}' must be a string",
            field
        ))),
    }
}

/// Drop a trailing `.<extension>` from an asset uid, rejecting any other suffix.
pub(crate) fn strip_extension(uid: &str, extension: &str) -> Result<String> {
    let Some((stem, suffix)) = uid.rsplit_once('.') else {
        return Ok(uid.to_string());
    };
    if suffix.eq_ignore_ascii_case(extension) && !stem.contains('.') {
        Ok(stem.to_string())
    } else {
        Err(RepositoryError::validation(format!(
            "asset file extension must be '.{}'",
            extension
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::testing::{bytes, knapsack, repository};
    use crate::logic::Reconciler;
    use serde_json::json;

    fn solution(instance_uid: &str, objective: f64) -> Vec<u8> {
        bytes(&json!({
            "instance_uid": instance_uid,
            "objective": objective,
            "authors": "test",
            "selected_items": [0, 1],
        }))
    }

    #[tokio::test]
    async fn test_create_instance_indexes_row() {
        let (_dir, repo) = repository();
        let writer = WriteCoordinator::new(repo.clone());

        let row = writer
            .create_instance("knapsack", &bytes(&knapsack("set/k1", 5, true)))
            .await
            .unwrap();
        assert_eq!(row.uid, "set/k1");
        assert_eq!(row.file_path, "knapsack/instances/set/k1.json.gz");
        assert_eq!(row.attributes["num_items"], 5);

        let indexed = repo.index.get_instance_row("knapsack", "set/k1").await.unwrap();
        assert_eq!(indexed, Some(row));
    }

    #[tokio::test]
    async fn test_duplicate_and_invalid_instances() {
        let (_dir, repo) = repository();
        let writer = WriteCoordinator::new(repo.clone());
        writer
            .create_instance("knapsack", &bytes(&knapsack("k1", 5, true)))
            .await
            .unwrap();

        let err = writer
            .create_instance("knapsack", &bytes(&knapsack("k1", 7, false)))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        // The first payload is untouched
        let stored = repo.files.get_instance("knapsack", "k1").unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&stored).unwrap()["num_items"], 5);

        let mut invalid = knapsack("k2", 5, true);
        invalid["item_values"] = json!([1.0]);
        let err = writer
            .create_instance("knapsack", &bytes(&invalid))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
        assert!(!repo.files.instance_exists("knapsack", "k2").unwrap());

        let err = writer
            .create_instance("knapsack", &bytes(&knapsack("/bad", 5, true)))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_create_has_one_winner() {
        let (_dir, repo) = repository();
        let writer = WriteCoordinator::new(repo.clone());
        let payload = bytes(&knapsack("race", 5, true));

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let writer = writer.clone();
                let payload = payload.clone();
                tokio::spawn(async move { writer.create_instance("knapsack", &payload).await })
            })
            .collect();
        let mut created = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert!(e.is_conflict(), "{}", e),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(repo.index.instance_rows("knapsack").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_solution_lifecycle() {
        let (_dir, repo) = repository();
        let writer = WriteCoordinator::new(repo.clone());
        writer
            .create_instance("knapsack", &bytes(&knapsack("k1", 5, true)))
            .await
            .unwrap();

        let row = writer.create_solution("knapsack", &solution("k1", 3.0)).await.unwrap();
        assert!(row.solution_uid.starts_with("k1/"));
        assert_eq!(row.attributes["objective"], 3.0);

        let err = writer
            .create_solution("knapsack", &solution("missing", 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));

        let err = writer
            .create_solution("cvrp_2d", &solution("k1", 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));

        writer.delete_solution("knapsack", &row.solution_uid).await.unwrap();
        assert!(repo.index.solution_rows("knapsack").await.unwrap().is_empty());
        let err = writer
            .delete_solution("knapsack", &row.solution_uid)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_instance_cascades() {
        let (_dir, repo) = repository();
        let writer = WriteCoordinator::new(repo.clone());
        for uid in ["k1", "k1/nested"] {
            writer
                .create_instance("knapsack", &bytes(&knapsack(uid, 5, true)))
                .await
                .unwrap();
        }
        writer.create_solution("knapsack", &solution("k1", 1.0)).await.unwrap();
        writer.create_solution("knapsack", &solution("k1", 2.0)).await.unwrap();
        let nested = writer
            .create_solution("knapsack", &solution("k1/nested", 3.0))
            .await
            .unwrap();
        writer
            .put_asset("knapsack", "k1.png", "thumbnail", b"png".to_vec())
            .await
            .unwrap();

        let report = writer.delete_instance("knapsack", "k1").await.unwrap();
        assert_eq!(report.solutions_deleted, 2);
        assert_eq!(report.assets_deleted, 1);
        assert!(report.is_complete());

        assert!(repo.index.get_instance_row("knapsack", "k1").await.unwrap().is_none());
        let remaining = repo.index.solution_rows("knapsack").await.unwrap();
        assert_eq!(remaining, vec![nested]);
        assert!(repo.files.instance_exists("knapsack", "k1/nested").unwrap());

        let err = writer.delete_instance("knapsack", "k1").await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));

        // Nothing left behind for a rebuild to resurrect
        let instances = repo.index.instance_rows("knapsack").await.unwrap();
        let solutions = repo.index.solution_rows("knapsack").await.unwrap();
        Reconciler::new(repo.clone()).rebuild().await.unwrap();
        assert_eq!(repo.index.instance_rows("knapsack").await.unwrap(), instances);
        assert_eq!(repo.index.solution_rows("knapsack").await.unwrap(), solutions);
    }

    #[tokio::test]
    async fn test_delete_instance_reports_partial_failure() {
        let (dir, repo) = repository();
        let writer = WriteCoordinator::new(repo.clone());
        writer
            .create_instance("knapsack", &bytes(&knapsack("k1", 5, true)))
            .await
            .unwrap();
        writer.create_solution("knapsack", &solution("k1", 1.0)).await.unwrap();
        writer
            .put_asset("knapsack", "k1", "thumbnail", b"png".to_vec())
            .await
            .unwrap();
        // A directory where the image asset should be cannot be removed as a file
        let blocked = dir.path().join("knapsack/assets/image/k1.png");
        std::fs::create_dir_all(&blocked).unwrap();
        std::fs::write(blocked.join("keep"), b"x").unwrap();

        let err = writer.delete_instance("knapsack", "k1").await.unwrap_err();
        match err {
            RepositoryError::PartialFailure { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].starts_with("asset 'image'"));
            }
            other => panic!("expected a partial failure, got {:?}", other),
        }

        assert!(!repo.files.instance_exists("knapsack", "k1").unwrap());
        assert!(repo.index.get_instance_row("knapsack", "k1").await.unwrap().is_none());
        assert!(repo.index.solution_rows("knapsack").await.unwrap().is_empty());
        assert!(!dir.path().join("knapsack/assets/thumbnail/k1.png").exists());
    }

    #[tokio::test]
    async fn test_assets() {
        let (_dir, repo) = repository();
        let writer = WriteCoordinator::new(repo);

        let err = writer
            .put_asset("knapsack", "k1", "thumbnail", b"png".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));

        writer
            .create_instance("knapsack", &bytes(&knapsack("k1", 5, true)))
            .await
            .unwrap();
        let path = writer
            .put_asset("knapsack", "k1", "thumbnail", b"png".to_vec())
            .await
            .unwrap();
        assert_eq!(path, "knapsack/assets/thumbnail/k1.png");
        // Overwrite is allowed
        writer
            .put_asset("knapsack", "k1.png", "thumbnail", b"png2".to_vec())
            .await
            .unwrap();

        let err = writer
            .put_asset("knapsack", "k1.jpg", "thumbnail", b"jpg".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Validation(_)));
        let err = writer
            .put_asset("knapsack", "k1", "video", Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));

        writer.delete_asset("knapsack", "k1", "thumbnail").await.unwrap();
        let err = writer.delete_asset("knapsack", "k1", "thumbnail").await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[test]
    fn test_strip_extension() {
        assert_eq!(strip_extension("a/b.png", "png").unwrap(), "a/b");
        assert_eq!(strip_extension("a/b", "png").unwrap(), "a/b");
        assert!(strip_extension("a/b.jpg", "png").is_err());
        assert!(strip_extension("a.png.png", "png").is_err());
    }
}
