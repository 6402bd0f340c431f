use crate::error::{RepositoryError, Result};

/// Check an instance or solution uid.
///
/// Uids may contain alphanumeric characters, dashes, underscores and slashes
/// for subdirectories. They may not start or end with a slash, and may not
/// contain empty path segments.
pub fn check_uid(uid: &str) -> Result<()> {
    if is_valid_uid(uid) {
        Ok(())
    } else {
        log::warn!("Rejected invalid uid '{}'", uid);
        Err(RepositoryError::validation(format!(
            "invalid uid '{}': only alphanumeric characters, '-', '_' and '/' between path segments are allowed",
            uid
        )))
    }
}

pub fn is_valid_uid(uid: &str) -> bool {
    !uid.is_empty()
        && uid.split('/').all(|segment| !segment.is_empty())
        && uid
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/'))
}

/// Check a problem class id or asset class name (no slashes).
pub fn check_name(kind: &str, name: &str) -> Result<()> {
    if !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
    {
        Ok(())
    } else {
        Err(RepositoryError::validation(format!(
            "invalid {} '{}': only alphanumeric characters, '-' and '_' are allowed",
            kind, name
        )))
    }
}
