use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{RepositoryError, Result};
use crate::model::{check_name, check_uid, is_valid_uid};

/// Suffix of stored instance and solution payloads
pub const PAYLOAD_SUFFIX: &str = ".json.gz";

const INSTANCES_DIR: &str = "instances";
const SOLUTIONS_DIR: &str = "solutions";
const ASSETS_DIR: &str = "assets";

/// Authoritative, file-backed store.
///
/// Layout under the root:
/// - `<class>/instances/<uid>.json.gz`
/// - `<class>/solutions/<solution_uid>.json.gz`
/// - `<class>/assets/<asset_class>/<uid>.<ext>`
///
/// All methods block on disk I/O.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        log::info!("File store opened at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // Instances

    pub fn instance_exists(&self, class: &str, uid: &str) -> Result<bool> {
        Ok(self.payload_path(class, INSTANCES_DIR, uid)?.is_file())
    }

    /// Store a new instance payload. Fails with `Conflict` if the uid exists.
    pub fn put_instance(&self, class: &str, uid: &str, payload: &[u8]) -> Result<String> {
        let path = self.payload_path(class, INSTANCES_DIR, uid)?;
        write_atomic(&path, &compress(payload)?, false)
            .map_err(|e| conflict_or(e, format!("instance '{}' of problem '{}'", uid, class)))?;
        log::debug!("Stored instance {}/{} at {}", class, uid, path.display());
        Ok(self.relative(&path))
    }

    pub fn get_instance(&self, class: &str, uid: &str) -> Result<Vec<u8>> {
        let path = self.payload_path(class, INSTANCES_DIR, uid)?;
        read_payload(&path)
            .map_err(|e| not_found_or(e, format!("instance '{}' of problem '{}'", uid, class)))
    }

    pub fn delete_instance(&self, class: &str, uid: &str) -> Result<()> {
        let path = self.payload_path(class, INSTANCES_DIR, uid)?;
        self.remove(&path, INSTANCES_DIR, class)
            .map_err(|e| not_found_or(e, format!("instance '{}' of problem '{}'", uid, class)))
    }

    /// Relative location an instance payload is (or would be) stored at
    pub fn instance_location(&self, class: &str, uid: &str) -> Result<String> {
        Ok(self.relative(&self.payload_path(class, INSTANCES_DIR, uid)?))
    }

    /// Snapshot of all instance files of a class, sorted by uid.
    pub fn list_instances(&self, class: &str) -> Result<PayloadScan> {
        self.scan(class, INSTANCES_DIR)
    }

    // Solutions

    pub fn solution_exists(&self, class: &str, solution_uid: &str) -> Result<bool> {
        Ok(self.payload_path(class, SOLUTIONS_DIR, solution_uid)?.is_file())
    }

    pub fn put_solution(&self, class: &str, solution_uid: &str, payload: &[u8]) -> Result<String> {
        let path = self.payload_path(class, SOLUTIONS_DIR, solution_uid)?;
        write_atomic(&path, &compress(payload)?, false).map_err(|e| {
            conflict_or(e, format!("solution '{}' of problem '{}'", solution_uid, class))
        })?;
        log::debug!("Stored solution {}/{}", class, solution_uid);
        Ok(self.relative(&path))
    }

    pub fn get_solution(&self, class: &str, solution_uid: &str) -> Result<Vec<u8>> {
        let path = self.payload_path(class, SOLUTIONS_DIR, solution_uid)?;
        read_payload(&path).map_err(|e| {
            not_found_or(e, format!("solution '{}' of problem '{}'", solution_uid, class))
        })
    }

    pub fn delete_solution(&self, class: &str, solution_uid: &str) -> Result<()> {
        let path = self.payload_path(class, SOLUTIONS_DIR, solution_uid)?;
        self.remove(&path, SOLUTIONS_DIR, class).map_err(|e| {
            not_found_or(e, format!("solution '{}' of problem '{}'", solution_uid, class))
        })
    }

    pub fn solution_location(&self, class: &str, solution_uid: &str) -> Result<String> {
        Ok(self.relative(&self.payload_path(class, SOLUTIONS_DIR, solution_uid)?))
    }

    pub fn list_solutions(&self, class: &str) -> Result<PayloadScan> {
        self.scan(class, SOLUTIONS_DIR)
    }

    /// Uids of the solutions stored directly under `solutions/<instance_uid>/`.
    pub fn list_solution_uids_of_instance(&self, class: &str, instance_uid: &str) -> Result<Vec<String>> {
        check_uid(instance_uid)?;
        let dir = self.class_dir(class)?.join(SOLUTIONS_DIR).join(instance_uid);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut uids = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(stem) = name.strip_suffix(PAYLOAD_SUFFIX) {
                if is_valid_uid(stem) {
                    uids.push(format!("{}/{}", instance_uid, stem));
                }
            }
        }
        uids.sort();
        Ok(uids)
    }

    // Assets

    pub fn put_asset(
        &self,
        class: &str,
        uid: &str,
        asset_class: &str,
        extension: &str,
        bytes: &[u8],
    ) -> Result<String> {
        let path = self.asset_path(class, uid, asset_class, extension)?;
        write_atomic(&path, bytes, true)?;
        log::debug!("Stored asset {} for {}/{}", asset_class, class, uid);
        Ok(self.relative(&path))
    }

    /// Relative location of an existing asset
    pub fn asset_location(
        &self,
        class: &str,
        uid: &str,
        asset_class: &str,
        extension: &str,
    ) -> Result<String> {
        let path = self.asset_path(class, uid, asset_class, extension)?;
        if path.is_file() {
            Ok(self.relative(&path))
        } else {
            Err(RepositoryError::not_found(format!(
                "asset '{}' of instance '{}'",
                asset_class, uid
            )))
        }
    }

    pub fn delete_asset(&self, class: &str, uid: &str, asset_class: &str, extension: &str) -> Result<()> {
        let path = self.asset_path(class, uid, asset_class, extension)?;
        let subroot = format!("{}/{}", ASSETS_DIR, asset_class);
        self.remove(&path, &subroot, class).map_err(|e| {
            not_found_or(e, format!("asset '{}' of instance '{}'", asset_class, uid))
        })
    }

    /// Relative paths of the assets present for an instance, keyed by asset class.
    pub fn available_assets(
        &self,
        class: &str,
        uid: &str,
        declared: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        let mut found = BTreeMap::new();
        for (asset_class, extension) in declared {
            let path = self.asset_path(class, uid, asset_class, extension)?;
            if path.is_file() {
                found.insert(asset_class.clone(), self.relative(&path));
            }
        }
        Ok(found)
    }

    // Paths

    fn class_dir(&self, class: &str) -> Result<PathBuf> {
        check_name("problem class", class)?;
        Ok(self.root.join(class))
    }

    fn payload_path(&self, class: &str, kind: &str, uid: &str) -> Result<PathBuf> {
        check_uid(uid)?;
        Ok(self
            .class_dir(class)?
            .join(kind)
            .join(format!("{}{}", uid, PAYLOAD_SUFFIX)))
    }

    fn asset_path(&self, class: &str, uid: &str, asset_class: &str, extension: &str) -> Result<PathBuf> {
        check_uid(uid)?;
        check_name("asset class", asset_class)?;
        Ok(self
            .class_dir(class)?
            .join(ASSETS_DIR)
            .join(asset_class)
            .join(format!("{}.{}", uid, extension)))
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Remove a file and prune directories left empty, up to `<class>/<subroot>`.
    fn remove(&self, path: &Path, subroot: &str, class: &str) -> io::Result<()> {
        fs::remove_file(path)?;
        sync_parent(path);

        let stop = self.root.join(class).join(subroot);
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == stop || !current.starts_with(&stop) {
                break;
            }
            if fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
        Ok(())
    }

    fn scan(&self, class: &str, kind: &str) -> Result<PayloadScan> {
        let base = self.class_dir(class)?.join(kind);
        let mut uids = Vec::new();
        if base.is_dir() {
            collect_payload_uids(&base, &base, &mut uids)?;
        }
        uids.sort();
        Ok(PayloadScan {
            base,
            uids: uids.into_iter(),
        })
    }
}

/// Lazy iterator over `(uid, payload)` pairs of a directory snapshot.
///
/// The uid listing is taken when the scan starts; payloads are read on
/// demand. Files removed after the listing are skipped.
#[derive(Debug)]
pub struct PayloadScan {
    base: PathBuf,
    uids: std::vec::IntoIter<String>,
}

impl PayloadScan {
    pub fn len(&self) -> usize {
        self.uids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uids.len() == 0
    }
}

impl Iterator for PayloadScan {
    /// A uid with its payload, or the error reading it
    type Item = (String, Result<Vec<u8>>);

    fn next(&mut self) -> Option<Self::Item> {
        for uid in self.uids.by_ref() {
            let path = self.base.join(format!("{}{}", uid, PAYLOAD_SUFFIX));
            match read_payload(&path) {
                Ok(payload) => return Some((uid, Ok(payload))),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    log::debug!("{} vanished during scan", path.display());
                    continue;
                }
                Err(e) => return Some((uid, Err(e.into()))),
            }
        }
        None
    }
}

fn collect_payload_uids(base: &Path, dir: &Path, uids: &mut Vec<String>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            collect_payload_uids(base, &path, uids)?;
        } else if file_type.is_file() {
            let Ok(relative) = path.strip_prefix(base) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            if let Some(uid) = relative.strip_suffix(PAYLOAD_SUFFIX) {
                if is_valid_uid(uid) {
                    uids.push(uid.to_string());
                } else {
                    log::warn!("Ignoring file with invalid uid: {}", path.display());
                }
            }
        }
    }
    Ok(())
}

fn compress(payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    encoder.finish()
}

fn read_payload(path: &Path) -> io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut payload = Vec::new();
    GzDecoder::new(file).read_to_end(&mut payload)?;
    Ok(payload)
}

/// Write to a temporary sibling, fsync, then move it into place.
///
/// Without `replace` the move is a hard link, which fails with
/// `AlreadyExists` if the target exists, so concurrent creators of the same
/// path cannot overwrite each other.
fn write_atomic(path: &Path, bytes: &[u8], replace: bool) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

    let written = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        if replace {
            fs::rename(&tmp, path)
        } else {
            fs::hard_link(&tmp, path)
        }
    })();
    if written.is_err() || !replace {
        let _ = fs::remove_file(&tmp);
    }
    written?;
    sync_parent(path);
    Ok(())
}

fn sync_parent(path: &Path) {
    // Directory fsync is unsupported on some platforms
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

fn conflict_or(error: io::Error, what: String) -> RepositoryError {
    if error.kind() == io::ErrorKind::AlreadyExists {
        RepositoryError::Conflict(what)
    } else {
        error.into()
    }
}

fn not_found_or(error: impl Into<RepositoryError>, what: String) -> RepositoryError {
    match error.into() {
        RepositoryError::Io(e) if e.kind() == io::ErrorKind::NotFound => RepositoryError::NotFound(what),
        other => other,
    }
}
