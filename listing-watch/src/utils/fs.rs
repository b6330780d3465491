//! Filesystem helpers with operation + path error context.

use std::path::Path;

use crate::{Error, Result};

/// Ensure a directory exists, creating it recursively if needed. Used before
/// the runtime's logging is up.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| Error::io_path(op, path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_dir_creates_nested() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b/c");
        ensure_dir_all_sync_with_op("creating test dir", &nested).unwrap();
        assert!(nested.is_dir());

        // Idempotent.
        ensure_dir_all_sync_with_op("creating test dir", &nested).unwrap();
    }

    #[test]
    fn test_error_carries_context() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        // A regular file blocks directory creation beneath it.
        let blocked = tmp.path().join("child");
        let err = ensure_dir_all_sync_with_op("creating log directory", &blocked).unwrap_err();
        assert!(err.to_string().contains("creating log directory"));
    }
}
