use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tokio::sync::{mpsc, Mutex};

use crate::error::{RepositoryError, Result};
use crate::logic::Repository;
use crate::model::{IndexRow, ProblemClass, SolutionRow, INSTANCE_UID_FIELD};
use crate::store::PayloadScan;

/// Payloads buffered between the blocking directory scan and the indexer
const SCAN_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Instance,
    Solution,
}

/// A file the rebuild could not index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub kind: RecordKind,
    pub uid: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassRebuild {
    pub problem_uid: String,
    pub instances_indexed: usize,
    pub solutions_indexed: usize,
    pub skipped: Vec<SkippedRecord>,
    /// SHA-256 over the resulting rows, hex encoded
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RebuildReport {
    pub classes: Vec<ClassRebuild>,
}

impl RebuildReport {
    pub fn skipped(&self) -> usize {
        self.classes.iter().map(|c| c.skipped.len()).sum()
    }
}

/// Regenerates the index from the file store.
///
/// Each class partition is truncated and refilled from a scan of its files.
/// Identical file trees always produce identical row sets.
#[derive(Debug)]
pub struct Reconciler {
    repo: Repository,
    running: Mutex<()>,
}

impl Reconciler {
    pub fn new(repo: Repository) -> Self {
        Self {
            repo,
            running: Mutex::new(()),
        }
    }

    /// Rebuild every registered class. Concurrent calls run one at a time.
    pub async fn rebuild(&self) -> Result<RebuildReport> {
        let _running = self.running.lock().await;
        let mut report = RebuildReport::default();
        for class in self.repo.registry.classes() {
            report.classes.push(self.rebuild_class(class).await?);
        }
        log::info!(
            "Index rebuild finished for {} problem classes ({} files skipped)",
            report.classes.len(),
            report.skipped()
        );
        Ok(report)
    }

    async fn rebuild_class(&self, class: &ProblemClass) -> Result<ClassRebuild> {
        log::info!("Rebuilding index of problem '{}'", class.id);
        let index = &self.repo.index;
        index.truncate(&class.id).await?;

        let mut report = ClassRebuild {
            problem_uid: class.id.clone(),
            ..Default::default()
        };
        let mut indexed = HashSet::new();

        let mut instances = self.scan(class, RecordKind::Instance);
        while let Some(scanned) = instances.recv().await {
            let (uid, payload) = scanned?;
            let file_path = self.repo.files.instance_location(&class.id, &uid)?;
            match instance_row(class, &uid, file_path, payload) {
                Ok(row) => {
                    already_indexed(index.insert_instance_row(&class.id, row).await)?;
                    indexed.insert(uid);
                    report.instances_indexed += 1;
                }
                Err(reason) => skip(&mut report, RecordKind::Instance, uid, reason),
            }
        }

        if class.solution.is_some() {
            let mut solutions = self.scan(class, RecordKind::Solution);
            while let Some(scanned) = solutions.recv().await {
                let (uid, payload) = scanned?;
                let file_path = self.repo.files.solution_location(&class.id, &uid)?;
                match solution_row(class, &uid, file_path, payload, &indexed) {
                    Ok(row) => {
                        already_indexed(index.insert_solution_row(&class.id, row).await)?;
                        report.solutions_indexed += 1;
                    }
                    Err(reason) => skip(&mut report, RecordKind::Solution, uid, reason),
                }
            }
        }

        report.fingerprint = fingerprint(
            &index.instance_rows(&class.id).await?,
            &index.solution_rows(&class.id).await?,
        )?;
        log::info!(
            "Indexed {} instances and {} solutions of '{}' (fingerprint {})",
            report.instances_indexed,
            report.solutions_indexed,
            class.id,
            report.fingerprint
        );
        Ok(report)
    }

    /// Stream `(uid, payload)` pairs of a class directory from a blocking task.
    ///
    /// Only a failure to list the directory is sent as `Err`; unreadable
    /// files are passed through for the caller to report.
    fn scan(
        &self,
        class: &ProblemClass,
        kind: RecordKind,
    ) -> mpsc::Receiver<Result<(String, Result<Vec<u8>>)>> {
        let (tx, rx) = mpsc::channel(SCAN_BUFFER);
        let files = self.repo.files.clone();
        let class_id = class.id.clone();
        tokio::task::spawn_blocking(move || {
            let scan: Result<PayloadScan> = match kind {
                RecordKind::Instance => files.list_instances(&class_id),
                RecordKind::Solution => files.list_solutions(&class_id),
            };
            match scan {
                Ok(scan) => {
                    log::debug!("Scanning {} {:?} files of '{}'", scan.len(), kind, class_id);
                    for item in scan {
                        if tx.blocking_send(Ok(item)).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                }
            }
        });
        rx
    }
}

// A writer may index a file between the truncate and the scan; its row is
// derived from the same file, so a conflict counts as indexed.
fn already_indexed(inserted: Result<()>) -> Result<()> {
    match inserted {
        Err(RepositoryError::Conflict(what)) => {
            log::debug!("{} was indexed concurrently with the rebuild", what);
            Ok(())
        }
        other => other,
    }
}

fn skip(report: &mut ClassRebuild, kind: RecordKind, uid: String, reason: String) {
    log::warn!(
        "Skipping {:?} '{}' of '{}': {}",
        kind,
        uid,
        report.problem_uid,
        reason
    );
    report.skipped.push(SkippedRecord { kind, uid, reason });
}

fn instance_row(
    class: &ProblemClass,
    uid: &str,
    file_path: String,
    payload: Result<Vec<u8>>,
) -> std::result::Result<IndexRow, String> {
    let payload = payload.map_err(|e| e.to_string())?;
    let record = class
        .instance_schema
        .validate(&payload)
        .map_err(|e| e.to_string())?;
    let declared = record
        .get(INSTANCE_UID_FIELD)
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if declared != uid {
        return Err(format!(
            "payload declares {} '{}' but is stored as '{}'",
            INSTANCE_UID_FIELD, declared, uid
        ));
    }
    Ok(IndexRow {
        uid: uid.to_string(),
        attributes: class.instance_attributes(&record),
        file_path,
    })
}

fn solution_row(
    class: &ProblemClass,
    uid: &str,
    file_path: String,
    payload: Result<Vec<u8>>,
    indexed: &HashSet<String>,
) -> std::result::Result<SolutionRow, String> {
    let spec = class.solution_spec().map_err(|e| e.to_string())?;
    let payload = payload.map_err(|e| e.to_string())?;
    let record = spec.schema.validate(&payload).map_err(|e| e.to_string())?;
    let instance_uid = record
        .get(INSTANCE_UID_FIELD)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("payload has no string {}", INSTANCE_UID_FIELD))?;

    match uid.rsplit_once('/') {
        Some((prefix, _)) if prefix == instance_uid => {}
        _ => {
            return Err(format!(
                "stored under '{}' but references instance '{}'",
                uid, instance_uid
            ))
        }
    }
    if !indexed.contains(instance_uid) {
        return Err(format!("orphan: instance '{}' is not indexed", instance_uid));
    }

    Ok(SolutionRow {
        solution_uid: uid.to_string(),
        instance_uid: instance_uid.to_string(),
        attributes: class.solution_attributes(&record),
        file_path,
    })
}

/// Order-stable digest of a class partition
pub fn fingerprint(instances: &[IndexRow], solutions: &[SolutionRow]) -> Result<String> {
    let mut hasher = Sha256::new();
    for row in instances {
        hasher.update(b"I");
        hasher.update(serde_json::to_vec(&(&row.uid, &row.attributes, &row.file_path))?);
        hasher.update(b"\n");
    }
    for row in solutions {
        hasher.update(b"S");
        hasher.update(serde_json::to_vec(&(
            &row.solution_uid,
            &row.instance_uid,
            &row.attributes,
            &row.file_path,
        ))?);
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::testing::{bytes, knapsack, repository};
    use crate::logic::WriteCoordinator;
    use crate::model::{InstanceQuery, QueryPage, RangeBounds, SolutionPage, SortSpec};
    use crate::store::{FileStore, IndexStore, MemoryIndexStore};
    use serde_json::json;
    use std::sync::Arc;

    fn solution(instance_uid: &str, objective: f64) -> Vec<u8> {
        bytes(&json!({
            "instance_uid": instance_uid,
            "objective": objective,
            "authors": "test",
            "selected_items": [0],
        }))
    }

    #[tokio::test]
    async fn test_rebuild_restores_lost_index() {
        let (_dir, repo) = repository();
        let writer = WriteCoordinator::new(repo.clone());
        for (uid, n) in [("k1", 5), ("set/k2", 10)] {
            writer
                .create_instance("knapsack", &bytes(&knapsack(uid, n, true)))
                .await
                .unwrap();
        }
        writer.create_solution("knapsack", &solution("k1", 4.0)).await.unwrap();

        let before_instances = repo.index.instance_rows("knapsack").await.unwrap();
        let before_solutions = repo.index.solution_rows("knapsack").await.unwrap();
        repo.index.truncate("knapsack").await.unwrap();

        let reconciler = Reconciler::new(repo.clone());
        let report = reconciler.rebuild().await.unwrap();
        let knapsack_report = report
            .classes
            .iter()
            .find(|c| c.problem_uid == "knapsack")
            .unwrap();
        assert_eq!(knapsack_report.instances_indexed, 2);
        assert_eq!(knapsack_report.solutions_indexed, 1);
        assert!(knapsack_report.skipped.is_empty());

        assert_eq!(repo.index.instance_rows("knapsack").await.unwrap(), before_instances);
        assert_eq!(repo.index.solution_rows("knapsack").await.unwrap(), before_solutions);
    }

    #[tokio::test]
    async fn test_rebuild_is_deterministic() {
        let (_dir, repo) = repository();
        let writer = WriteCoordinator::new(repo.clone());
        writer
            .create_instance("knapsack", &bytes(&knapsack("k1", 5, true)))
            .await
            .unwrap();

        let reconciler = Reconciler::new(repo.clone());
        let first = reconciler.rebuild().await.unwrap();
        let second = reconciler.rebuild().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.classes[0].fingerprint.len(), 64);
    }

    #[tokio::test]
    async fn test_invalid_and_orphan_files_are_skipped() {
        let (_dir, repo) = repository();
        repo.files
            .put_instance("knapsack", "good", &bytes(&knapsack("good", 5, true)))
            .unwrap();
        repo.files
            .put_instance("knapsack", "broken", br#"{"instance_uid": "broken"}"#)
            .unwrap();
        repo.files
            .put_instance("knapsack", "renamed", &bytes(&knapsack("other", 5, true)))
            .unwrap();
        repo.files
            .put_solution("knapsack", "good/s1", &solution("good", 1.0))
            .unwrap();
        repo.files
            .put_solution("knapsack", "gone/s1", &solution("gone", 1.0))
            .unwrap();
        repo.files
            .put_solution("knapsack", "good/s2", &solution("elsewhere", 1.0))
            .unwrap();

        let report = Reconciler::new(repo.clone()).rebuild().await.unwrap();
        let knapsack_report = report
            .classes
            .iter()
            .find(|c| c.problem_uid == "knapsack")
            .unwrap();
        assert_eq!(knapsack_report.instances_indexed, 1);
        assert_eq!(knapsack_report.solutions_indexed, 1);

        let skipped: Vec<(RecordKind, &str)> = knapsack_report
            .skipped
            .iter()
            .map(|s| (s.kind, s.uid.as_str()))
            .collect();
        assert_eq!(
            skipped,
            vec![
                (RecordKind::Instance, "broken"),
                (RecordKind::Instance, "renamed"),
                (RecordKind::Solution, "gone/s1"),
                (RecordKind::Solution, "good/s2"),
            ]
        );
        assert_eq!(
            repo.index.instance_rows("knapsack").await.unwrap()[0].uid,
            "good"
        );
    }

    /// Memory index that commits a pending writer row right after a truncate
    struct RacingIndex {
        inner: MemoryIndexStore,
        pending: parking_lot::Mutex<Option<(IndexRow, SolutionRow)>>,
    }

    #[async_trait::async_trait]
    impl IndexStore for RacingIndex {
        fn backend(&self) -> &'static str {
            "racing"
        }
        async fn get_instance_row(&self, class: &str, uid: &str) -> Result<Option<IndexRow>> {
            self.inner.get_instance_row(class, uid).await
        }
        async fn insert_instance_row(&self, class: &str, row: IndexRow) -> Result<()> {
            self.inner.insert_instance_row(class, row).await
        }
        async fn delete_instance_row(&self, class: &str, uid: &str) -> Result<bool> {
            self.inner.delete_instance_row(class, uid).await
        }
        async fn query_instances(&self, class: &str, query: &InstanceQuery) -> Result<QueryPage> {
            self.inner.query_instances(class, query).await
        }
        async fn range_bounds(&self, class: &str, fields: &[String]) -> Result<Vec<RangeBounds>> {
            self.inner.range_bounds(class, fields).await
        }
        async fn instance_rows(&self, class: &str) -> Result<Vec<IndexRow>> {
            self.inner.instance_rows(class).await
        }
        async fn get_solution_row(&self, class: &str, solution_uid: &str) -> Result<Option<SolutionRow>> {
            self.inner.get_solution_row(class, solution_uid).await
        }
        async fn insert_solution_row(&self, class: &str, row: SolutionRow) -> Result<()> {
            self.inner.insert_solution_row(class, row).await
        }
        async fn delete_solution_row(&self, class: &str, solution_uid: &str) -> Result<bool> {
            self.inner.delete_solution_row(class, solution_uid).await
        }
        async fn delete_solutions_of_instance(&self, class: &str, instance_uid: &str) -> Result<u64> {
            self.inner.delete_solutions_of_instance(class, instance_uid).await
        }
        async fn query_solutions(
            &self,
            class: &str,
            instance_uid: &str,
            order: &[SortSpec],
            offset: usize,
            limit: usize,
        ) -> Result<SolutionPage> {
            self.inner
                .query_solutions(class, instance_uid, order, offset, limit)
                .await
        }
        async fn solution_rows(&self, class: &str) -> Result<Vec<SolutionRow>> {
            self.inner.solution_rows(class).await
        }
        async fn truncate(&self, class: &str) -> Result<()> {
            self.inner.truncate(class).await?;
            let pending = if class == "knapsack" {
                self.pending.lock().take()
            } else {
                None
            };
            if let Some((instance, solution)) = pending {
                self.inner.insert_instance_row(class, instance).await?;
                self.inner.insert_solution_row(class, solution).await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_rebuild_tolerates_rows_written_after_truncate() {
        let (dir, seeded) = repository();
        let writer = WriteCoordinator::new(seeded.clone());
        for uid in ["a", "b", "c"] {
            writer
                .create_instance("knapsack", &bytes(&knapsack(uid, 5, true)))
                .await
                .unwrap();
        }
        let solution_row = writer.create_solution("knapsack", &solution("a", 2.0)).await.unwrap();
        let instance_row = seeded
            .index
            .get_instance_row("knapsack", "a")
            .await
            .unwrap()
            .unwrap();

        let index = Arc::new(RacingIndex {
            inner: MemoryIndexStore::new(),
            pending: parking_lot::Mutex::new(Some((instance_row, solution_row))),
        });
        let repo = Repository::new(
            seeded.registry.clone(),
            FileStore::open(dir.path()).unwrap(),
            index.clone(),
        );

        let report = Reconciler::new(repo.clone()).rebuild().await.unwrap();
        assert_eq!(report.classes.len(), 3);
        let knapsack_report = report
            .classes
            .iter()
            .find(|c| c.problem_uid == "knapsack")
            .unwrap();
        assert_eq!(knapsack_report.instances_indexed, 3);
        assert_eq!(knapsack_report.solutions_indexed, 1);
        assert!(knapsack_report.skipped.is_empty());

        let uids: Vec<String> = repo
            .index
            .instance_rows("knapsack")
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.uid)
            .collect();
        assert_eq!(uids, vec!["a", "b", "c"]);
        assert_eq!(repo.index.solution_rows("knapsack").await.unwrap().len(), 1);
        assert_eq!(
            seeded.index.instance_rows("knapsack").await.unwrap(),
            repo.index.instance_rows("knapsack").await.unwrap()
        );
    }

    #[test]
    fn test_fingerprint_changes_with_rows() {
        let empty = fingerprint(&[], &[]).unwrap();
        let row = IndexRow {
            uid: "a".to_string(),
            attributes: Default::default(),
            file_path: "knapsack/instances/a.json.gz".to_string(),
        };
        assert_ne!(empty, fingerprint(&[row], &[]).unwrap());
    }
}
