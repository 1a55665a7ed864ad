//! Filesystem helpers.

use std::path::Path;

use crate::{Error, Result};

/// Ensure a directory exists and is writable.
///
/// Creates missing parents and probes writability with a throwaway file, so
/// misconfigured output directories fail before any external tool runs.
pub fn ensure_writable_dir(op: &str, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| Error::config(format!("{op}: cannot create {}: {e}", dir.display())))?;

    let probe = dir.join(".tubarr-write-probe");
    std::fs::write(&probe, b"")
        .map_err(|e| Error::config(format!("{op}: {} is not writable: {e}", dir.display())))?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_and_probes_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b/c");
        ensure_writable_dir("test", &nested).unwrap();
        assert!(nested.is_dir());
        assert!(!nested.join(".tubarr-write-probe").exists());
    }

    #[test]
    fn fails_when_target_is_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();
        assert!(ensure_writable_dir("test", &file).is_err());
    }
}
